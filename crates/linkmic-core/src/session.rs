use serde::{Deserialize, Serialize};

use crate::errors::LinkMicError;
use crate::participants::{InteractStatus, MediaState, Participant, Role, Roster};
use crate::seats::{Seat, SeatInfo, SeatLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Living,
    Chatting,
    PkIng,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: String,
    #[serde(default)]
    pub title: String,
    pub host_user_id: String,
    pub status: RoomStatus,
    #[serde(default)]
    pub audience_count: u32,
    #[serde(default = "default_true")]
    pub apply_needs_approval: bool,
}

fn default_true() -> bool {
    true
}

/// Cross-room pairing with another host while the room is in a PK battle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorLink {
    pub peer_room_id: String,
    pub peer_user_id: String,
    #[serde(default)]
    pub peer_user_name: String,
    #[serde(default)]
    pub peer_mic: MediaState,
    #[serde(default)]
    pub peer_camera: MediaState,
    /// The local host muted the peer's audio in this room.
    #[serde(default)]
    pub muted_by_self: bool,
    /// Credential for forwarding the local host's stream into the peer room.
    #[serde(default)]
    pub forward_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfInviteStatus {
    #[default]
    Normal,
    InvitingChat,
    InvitingPk,
}

/// Authoritative room state as returned by create, join and reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub room: Room,
    pub host: Participant,
    pub self_user: Participant,
    #[serde(default)]
    pub seats: Vec<SeatInfo>,
    #[serde(default)]
    pub anchor: Option<AnchorLink>,
    #[serde(default)]
    pub applicants: Vec<String>,
}

/// Derived phase of the local user, mostly useful for tests and UI routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AudienceIdle,
    AudienceApplying,
    AudienceInteracting,
    HostLive,
    HostChatting,
    HostPkIng,
}

/// Owned read model handed to the UI. Built under the session lock, so it is
/// never a half-applied state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub room: Room,
    pub self_user: Participant,
    pub host: Participant,
    pub seats: Vec<SeatView>,
    pub anchor: Option<AnchorLink>,
    pub self_invite_status: SelfInviteStatus,
    pub applicants: Vec<String>,
}

/// What [`SessionState::upsert_seat`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeatUpdate {
    /// The seat's lock or occupant changed, or the occupant moved seats.
    pub placement: bool,
    /// The occupant was already known and its mic or camera differs.
    pub media: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeatView {
    pub index: u32,
    pub lock: SeatLock,
    pub occupant: Option<Participant>,
}

#[derive(Debug, Clone)]
struct SessionData {
    room: Room,
    self_user_id: String,
    roster: Roster,
    seats: Vec<Seat>,
    anchor: Option<AnchorLink>,
    self_invite: SelfInviteStatus,
    invite_target: Option<String>,
    applicants: Vec<String>,
}

impl SessionData {
    fn is_pinned(&self, user_id: &str) -> bool {
        user_id == self.self_user_id || user_id == self.room.host_user_id
    }

    fn seat_mut(&mut self, index: u32) -> Option<&mut Seat> {
        self.seats.iter_mut().find(|s| s.index == index)
    }

    /// Clear `user_id` from its seat. Self and host stay in the roster.
    fn vacate(&mut self, user_id: &str) -> Option<u32> {
        let seat = self
            .seats
            .iter_mut()
            .find(|s| s.occupant.as_deref() == Some(user_id))?;
        seat.occupant = None;
        let index = seat.index;
        if self.is_pinned(user_id) {
            if let Some(p) = self.roster.participant_mut(user_id) {
                p.interact_status = InteractStatus::Normal;
            }
        } else {
            self.roster.remove(user_id);
        }
        Some(index)
    }
}

/// The local model of room, seats, self, host and interaction status.
///
/// Written only by the coordinator. After [`SessionState::clear`] every
/// mutation fails with [`LinkMicError::NoSession`] until a snapshot is
/// installed with [`SessionState::replace_all`].
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    data: Option<SessionData>,
    generation: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.data.is_some()
    }

    /// Bumped whenever the whole session is replaced or cleared. A local
    /// call that started under an older generation must not apply its result.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn room(&self) -> Option<&Room> {
        self.data.as_ref().map(|d| &d.room)
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room().map(|r| r.room_id.as_str())
    }

    pub fn self_user(&self) -> Option<&Participant> {
        let d = self.data.as_ref()?;
        d.roster.participant(&d.self_user_id)
    }

    pub fn self_user_id(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.self_user_id.as_str())
    }

    pub fn host(&self) -> Option<&Participant> {
        let d = self.data.as_ref()?;
        d.roster.participant(&d.room.host_user_id)
    }

    pub fn is_self(&self, user_id: &str) -> bool {
        self.self_user_id() == Some(user_id)
    }

    pub fn self_is_host(&self) -> bool {
        self.data
            .as_ref()
            .is_some_and(|d| d.self_user_id == d.room.host_user_id)
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.data.as_ref()?.roster.participant(user_id)
    }

    pub fn seats(&self) -> &[Seat] {
        self.data.as_ref().map(|d| d.seats.as_slice()).unwrap_or(&[])
    }

    pub fn seat(&self, index: u32) -> Option<&Seat> {
        self.seats().iter().find(|s| s.index == index)
    }

    pub fn seat_of(&self, user_id: &str) -> Option<u32> {
        self.seats()
            .iter()
            .find(|s| s.occupant.as_deref() == Some(user_id))
            .map(|s| s.index)
    }

    pub fn occupied_seats(&self) -> usize {
        self.seats().iter().filter(|s| s.occupant.is_some()).count()
    }

    pub fn anchor(&self) -> Option<&AnchorLink> {
        self.data.as_ref()?.anchor.as_ref()
    }

    pub fn self_invite_status(&self) -> SelfInviteStatus {
        self.data
            .as_ref()
            .map(|d| d.self_invite)
            .unwrap_or_default()
    }

    pub fn invite_target(&self) -> Option<&str> {
        self.data.as_ref()?.invite_target.as_deref()
    }

    pub fn applicants(&self) -> &[String] {
        self.data
            .as_ref()
            .map(|d| d.applicants.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_applicant(&self, user_id: &str) -> bool {
        self.applicants().iter().any(|a| a == user_id)
    }

    pub fn phase(&self) -> Option<SessionPhase> {
        let d = self.data.as_ref()?;
        let me = d.roster.participant(&d.self_user_id)?;
        let phase = if d.self_user_id == d.room.host_user_id {
            match d.room.status {
                RoomStatus::Living => SessionPhase::HostLive,
                RoomStatus::Chatting => SessionPhase::HostChatting,
                RoomStatus::PkIng => SessionPhase::HostPkIng,
            }
        } else {
            match me.interact_status {
                InteractStatus::Applying => SessionPhase::AudienceApplying,
                InteractStatus::Interacting => SessionPhase::AudienceInteracting,
                InteractStatus::Normal | InteractStatus::Inviting => SessionPhase::AudienceIdle,
            }
        };
        Some(phase)
    }

    pub fn view(&self) -> Option<SessionView> {
        let d = self.data.as_ref()?;
        Some(SessionView {
            room: d.room.clone(),
            self_user: d.roster.participant(&d.self_user_id)?.clone(),
            host: d.roster.participant(&d.room.host_user_id)?.clone(),
            seats: d
                .seats
                .iter()
                .map(|s| SeatView {
                    index: s.index,
                    lock: s.lock,
                    occupant: s
                        .occupant
                        .as_deref()
                        .and_then(|id| d.roster.participant(id))
                        .cloned(),
                })
                .collect(),
            anchor: d.anchor.clone(),
            self_invite_status: d.self_invite,
            applicants: d.applicants.clone(),
        })
    }

    fn data_mut(&mut self) -> Result<&mut SessionData, LinkMicError> {
        self.data.as_mut().ok_or(LinkMicError::NoSession)
    }

    /// Switch between `Living` and `Chatting`. PK is entered and left only
    /// through [`bind_anchor`](Self::bind_anchor) and
    /// [`unbind_anchor`](Self::unbind_anchor).
    pub fn set_room_status(&mut self, status: RoomStatus) -> Result<bool, LinkMicError> {
        let d = self.data_mut()?;
        if status == RoomStatus::PkIng || d.room.status == RoomStatus::PkIng {
            if d.room.status == status {
                return Ok(false);
            }
            return Err(LinkMicError::Inconsistent(format!(
                "cannot move from {:?} to {status:?} without the anchor link",
                d.room.status
            )));
        }
        let changed = d.room.status != status;
        d.room.status = status;
        Ok(changed)
    }

    /// Apply a seat's lock state and occupant.
    ///
    /// An unknown seat is left alone and reported as unchanged. A new
    /// occupant leaves any other seat it held; a displaced occupant goes
    /// back to `Normal`. Name changes of the occupant are taken silently.
    pub fn upsert_seat(&mut self, info: SeatInfo) -> Result<SeatUpdate, LinkMicError> {
        let d = self.data_mut()?;
        let Some(current) = d.seats.iter().find(|s| s.index == info.seat_id).cloned() else {
            return Ok(SeatUpdate::default());
        };
        let before_user = info
            .user
            .as_ref()
            .and_then(|u| d.roster.participant(&u.user_id))
            .cloned();
        let new_occupant = info.user.as_ref().map(|u| u.user_id.clone());

        let mut update = SeatUpdate {
            placement: current.lock != info.status,
            media: false,
        };
        if current.occupant != new_occupant {
            update.placement = true;
            if let Some(previous) = current.occupant.as_deref() {
                d.vacate(previous);
            }
        }

        if let Some(mut user) = info.user {
            if let Some(other) = d.seats.iter().find(|s| {
                s.index != info.seat_id && s.occupant.as_deref() == Some(user.user_id.as_str())
            }) {
                let other = other.index;
                if let Some(seat) = d.seat_mut(other) {
                    seat.occupant = None;
                }
                update.placement = true;
            }
            user.interact_status = InteractStatus::Interacting;
            if let Some(existing) = before_user.as_ref() {
                // Roles are fixed for the session; a push never promotes a guest.
                user.role = existing.role;
                update.media = existing.mic != user.mic || existing.camera != user.camera;
            }
            d.applicants.retain(|a| a != &user.user_id);
            d.roster.upsert(user);
        }

        if let Some(seat) = d.seat_mut(info.seat_id) {
            seat.lock = info.status;
            seat.occupant = new_occupant;
        }
        Ok(update)
    }

    /// Remove `user_id` from its seat, if any, and reset it to `Normal`.
    pub fn vacate_user(&mut self, user_id: &str) -> Result<Option<u32>, LinkMicError> {
        Ok(self.data_mut()?.vacate(user_id))
    }

    pub fn set_seat_lock(&mut self, index: u32, lock: SeatLock) -> Result<bool, LinkMicError> {
        let d = self.data_mut()?;
        match d.seat_mut(index) {
            Some(seat) if seat.lock != lock => {
                seat.lock = lock;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Set the interact status of a retained participant.
    ///
    /// `Interacting` is reached only through a seat or the anchor link;
    /// moving a seated user to any other status vacates its seat.
    pub fn set_participant_status(
        &mut self,
        user_id: &str,
        status: InteractStatus,
    ) -> Result<bool, LinkMicError> {
        let d = self.data_mut()?;
        let Some(current) = d.roster.participant(user_id).map(|p| p.interact_status) else {
            return Ok(false);
        };
        if current == status {
            return Ok(false);
        }
        if status == InteractStatus::Interacting {
            return Err(LinkMicError::Inconsistent(format!(
                "{user_id} can only start interacting through a seat or anchor link"
            )));
        }
        d.vacate(user_id);
        if let Some(p) = d.roster.participant_mut(user_id) {
            p.interact_status = status;
        }
        Ok(true)
    }

    pub fn set_self_invite_status(
        &mut self,
        status: SelfInviteStatus,
        target: Option<String>,
    ) -> Result<(), LinkMicError> {
        let d = self.data_mut()?;
        d.self_invite = status;
        d.invite_target = match status {
            SelfInviteStatus::Normal => None,
            _ => target,
        };
        Ok(())
    }

    /// Enter PK with `link`. Returns `Ok(false)` if already bound to that peer.
    pub fn bind_anchor(&mut self, link: AnchorLink) -> Result<bool, LinkMicError> {
        let d = self.data_mut()?;
        if d.room.status == RoomStatus::PkIng
            && d
                .anchor
                .as_ref()
                .is_some_and(|a| a.peer_user_id == link.peer_user_id)
        {
            return Ok(false);
        }
        d.room.status = RoomStatus::PkIng;
        d.anchor = Some(link);
        let host_id = d.room.host_user_id.clone();
        if let Some(host) = d.roster.participant_mut(&host_id) {
            host.interact_status = InteractStatus::Interacting;
        }
        if d.self_invite == SelfInviteStatus::InvitingPk {
            d.self_invite = SelfInviteStatus::Normal;
            d.invite_target = None;
        }
        Ok(true)
    }

    /// Leave PK. Returns the link that was bound, if any.
    pub fn unbind_anchor(&mut self) -> Result<Option<AnchorLink>, LinkMicError> {
        let d = self.data_mut()?;
        let link = d.anchor.take();
        if d.room.status == RoomStatus::PkIng {
            d.room.status = RoomStatus::Living;
        }
        if link.is_some() {
            let host_id = d.room.host_user_id.clone();
            if let Some(host) = d.roster.participant_mut(&host_id) {
                host.interact_status = InteractStatus::Normal;
            }
        }
        Ok(link)
    }

    pub fn set_anchor_muted(&mut self, muted: bool) -> Result<bool, LinkMicError> {
        let d = self.data_mut()?;
        match d.anchor.as_mut() {
            Some(link) if link.muted_by_self != muted => {
                link.muted_by_self = muted;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Update mic/camera of a retained participant or of the PK peer.
    pub fn update_media(
        &mut self,
        user_id: &str,
        mic: MediaState,
        camera: MediaState,
    ) -> Result<bool, LinkMicError> {
        let d = self.data_mut()?;
        if let Some(p) = d.roster.participant_mut(user_id) {
            let changed = p.mic != mic || p.camera != camera;
            p.mic = mic;
            p.camera = camera;
            return Ok(changed);
        }
        match d.anchor.as_mut() {
            Some(link) if link.peer_user_id == user_id => {
                let changed = link.peer_mic != mic || link.peer_camera != camera;
                link.peer_mic = mic;
                link.peer_camera = camera;
                Ok(changed)
            }
            _ => Ok(false),
        }
    }

    pub fn set_audience_count(&mut self, count: u32) -> Result<bool, LinkMicError> {
        let d = self.data_mut()?;
        let changed = d.room.audience_count != count;
        d.room.audience_count = count;
        Ok(changed)
    }

    pub fn set_apply_needs_approval(&mut self, needs_approval: bool) -> Result<(), LinkMicError> {
        self.data_mut()?.room.apply_needs_approval = needs_approval;
        Ok(())
    }

    pub fn add_applicant(&mut self, user_id: &str) -> Result<bool, LinkMicError> {
        let d = self.data_mut()?;
        if d.applicants.iter().any(|a| a == user_id) {
            return Ok(false);
        }
        d.applicants.push(user_id.to_string());
        Ok(true)
    }

    pub fn remove_applicant(&mut self, user_id: &str) -> Result<bool, LinkMicError> {
        let d = self.data_mut()?;
        let before = d.applicants.len();
        d.applicants.retain(|a| a != user_id);
        Ok(d.applicants.len() != before)
    }

    pub fn set_applicants(&mut self, applicants: Vec<String>) -> Result<(), LinkMicError> {
        self.data_mut()?.applicants = applicants;
        Ok(())
    }

    /// Install `snapshot` as the whole session, discarding local state.
    ///
    /// On error the previous state is left untouched.
    pub fn replace_all(&mut self, snapshot: SessionSnapshot) -> Result<(), LinkMicError> {
        let data = Self::build(snapshot)?;
        self.data = Some(data);
        self.generation += 1;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.data = None;
        self.generation += 1;
    }

    fn build(snapshot: SessionSnapshot) -> Result<SessionData, LinkMicError> {
        let SessionSnapshot {
            room,
            mut host,
            self_user,
            seats: seat_infos,
            anchor,
            applicants,
        } = snapshot;

        if (room.status == RoomStatus::PkIng) != anchor.is_some() {
            return Err(LinkMicError::Inconsistent(format!(
                "room status {:?} with anchor link present = {}",
                room.status,
                anchor.is_some()
            )));
        }
        if host.user_id != room.host_user_id {
            return Err(LinkMicError::Inconsistent(format!(
                "host {} does not own room {}",
                host.user_id, room.room_id
            )));
        }

        host.role = Role::Host;
        host.interact_status = if anchor.is_some() {
            InteractStatus::Interacting
        } else {
            InteractStatus::Normal
        };

        let mut roster = Roster::new();
        let self_user_id = self_user.user_id.clone();
        if self_user.user_id != host.user_id {
            let mut me = self_user;
            me.role = Role::Audience;
            if me.interact_status == InteractStatus::Interacting {
                me.interact_status = InteractStatus::Normal;
            }
            roster.upsert(me);
        }
        roster.upsert(host);

        let mut seats: Vec<Seat> = Vec::with_capacity(seat_infos.len());
        let mut seat_infos = seat_infos;
        seat_infos.sort_by_key(|s| s.seat_id);
        for info in seat_infos {
            if seats.iter().any(|s| s.index == info.seat_id) {
                return Err(LinkMicError::Inconsistent(format!(
                    "seat {} listed twice",
                    info.seat_id
                )));
            }
            let occupant = match info.user {
                Some(mut user) => {
                    if seats.iter().any(|s| s.occupant.as_deref() == Some(user.user_id.as_str())) {
                        return Err(LinkMicError::Inconsistent(format!(
                            "{} occupies more than one seat",
                            user.user_id
                        )));
                    }
                    user.interact_status = InteractStatus::Interacting;
                    if let Some(existing) = roster.participant(&user.user_id) {
                        user.role = existing.role;
                    }
                    let id = user.user_id.clone();
                    roster.upsert(user);
                    Some(id)
                }
                None => None,
            };
            seats.push(Seat {
                index: info.seat_id,
                lock: info.status,
                occupant,
            });
        }

        Ok(SessionData {
            room,
            self_user_id,
            roster,
            seats,
            anchor,
            self_invite: SelfInviteStatus::Normal,
            invite_target: None,
            applicants,
        })
    }
}

#[cfg(test)]
pub(crate) fn make_snapshot(self_id: &str, host_id: &str, seat_count: u32) -> SessionSnapshot {
    use crate::participants::make_participant;
    let host = make_participant(host_id, "Host", Role::Host);
    let self_user = if self_id == host_id {
        host.clone()
    } else {
        make_participant(self_id, "Me", Role::Audience)
    };
    SessionSnapshot {
        room: Room {
            room_id: "room-1".into(),
            title: "Evening show".into(),
            host_user_id: host_id.into(),
            status: RoomStatus::Living,
            audience_count: 3,
            apply_needs_approval: true,
        },
        host,
        self_user,
        seats: (0..seat_count)
            .map(|i| SeatInfo {
                seat_id: i,
                status: SeatLock::Unlocked,
                user: None,
            })
            .collect(),
        anchor: None,
        applicants: Vec::new(),
    }
}

#[cfg(test)]
pub(crate) fn make_link(peer_user_id: &str) -> AnchorLink {
    AnchorLink {
        peer_room_id: format!("room-of-{peer_user_id}"),
        peer_user_id: peer_user_id.into(),
        peer_user_name: "Rival".into(),
        peer_mic: MediaState::On,
        peer_camera: MediaState::On,
        muted_by_self: false,
        forward_token: "token".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participants::make_participant;

    fn seated(index: u32, user: &str) -> SeatInfo {
        SeatInfo {
            seat_id: index,
            status: SeatLock::Unlocked,
            user: Some(make_participant(user, user, Role::Audience)),
        }
    }

    fn active(self_id: &str) -> SessionState {
        let mut state = SessionState::new();
        state.replace_all(make_snapshot(self_id, "host", 4)).unwrap();
        state
    }

    #[test]
    fn mutations_fail_after_clear() {
        let mut state = active("me");
        let generation = state.generation();
        state.clear();
        assert_ne!(state.generation(), generation);
        assert!(!state.is_active());
        assert!(matches!(
            state.set_room_status(RoomStatus::Chatting),
            Err(LinkMicError::NoSession)
        ));
        assert!(matches!(state.upsert_seat(seated(0, "u1")), Err(LinkMicError::NoSession)));
        assert!(state.view().is_none());
        assert_eq!(state.self_invite_status(), SelfInviteStatus::Normal);
    }

    #[test]
    fn self_may_equal_host() {
        let state = active("host");
        assert!(state.self_is_host());
        assert_eq!(state.self_user().unwrap().user_id, "host");
        assert_eq!(state.phase(), Some(SessionPhase::HostLive));
    }

    #[test]
    fn upsert_seat_binds_occupant() {
        let mut state = active("me");
        assert!(state.upsert_seat(seated(1, "u1")).unwrap().placement);
        assert_eq!(state.seat(1).unwrap().occupant.as_deref(), Some("u1"));
        assert_eq!(
            state.participant("u1").unwrap().interact_status,
            InteractStatus::Interacting
        );
        // Same push again is a no-op.
        assert_eq!(state.upsert_seat(seated(1, "u1")).unwrap(), SeatUpdate::default());
    }

    #[test]
    fn same_occupant_with_new_media_is_not_a_placement() {
        let mut state = active("me");
        state.upsert_seat(seated(1, "u1")).unwrap();

        let mut again = seated(1, "u1");
        if let Some(user) = again.user.as_mut() {
            user.camera = MediaState::Off;
            user.user_name = "Renamed".into();
        }
        let update = state.upsert_seat(again).unwrap();
        assert_eq!(
            update,
            SeatUpdate {
                placement: false,
                media: true,
            }
        );
        let u1 = state.participant("u1").unwrap();
        assert_eq!(u1.camera, MediaState::Off);
        assert_eq!(u1.user_name, "Renamed");

        // A name change alone reports nothing.
        let mut renamed = seated(1, "u1");
        if let Some(user) = renamed.user.as_mut() {
            user.camera = MediaState::Off;
            user.user_name = "Again".into();
        }
        assert_eq!(state.upsert_seat(renamed).unwrap(), SeatUpdate::default());
    }

    #[test]
    fn occupant_moving_seats_leaves_old_seat() {
        let mut state = active("me");
        state.upsert_seat(seated(1, "u1")).unwrap();
        state.upsert_seat(seated(2, "u1")).unwrap();
        assert!(state.seat(1).unwrap().occupant.is_none());
        assert_eq!(state.seat_of("u1"), Some(2));
    }

    #[test]
    fn displaced_occupant_is_dropped() {
        let mut state = active("me");
        state.upsert_seat(seated(1, "u1")).unwrap();
        state.upsert_seat(seated(1, "u2")).unwrap();
        assert!(state.participant("u1").is_none());
        assert_eq!(state.seat_of("u2"), Some(1));
    }

    #[test]
    fn unknown_seat_is_ignored() {
        let mut state = active("me");
        assert!(!state.upsert_seat(seated(42, "u1")).unwrap().placement);
        assert!(state.participant("u1").is_none());
    }

    #[test]
    fn vacating_self_keeps_record() {
        let mut state = active("me");
        state.upsert_seat(seated(0, "me")).unwrap();
        assert_eq!(state.phase(), Some(SessionPhase::AudienceInteracting));
        assert_eq!(state.vacate_user("me").unwrap(), Some(0));
        let me = state.self_user().unwrap();
        assert_eq!(me.interact_status, InteractStatus::Normal);
        assert_eq!(me.role, Role::Audience);
    }

    #[test]
    fn interacting_requires_a_seat() {
        let mut state = active("me");
        assert!(state
            .set_participant_status("me", InteractStatus::Interacting)
            .is_err());
        assert!(state
            .set_participant_status("me", InteractStatus::Applying)
            .unwrap());
        assert_eq!(state.phase(), Some(SessionPhase::AudienceApplying));
    }

    #[test]
    fn leaving_interacting_vacates_seat() {
        let mut state = active("me");
        state.upsert_seat(seated(3, "me")).unwrap();
        state
            .set_participant_status("me", InteractStatus::Normal)
            .unwrap();
        assert!(state.seat(3).unwrap().occupant.is_none());
    }

    #[test]
    fn pk_status_only_through_anchor() {
        let mut state = active("host");
        assert!(state.set_room_status(RoomStatus::PkIng).is_err());
        assert!(state.bind_anchor(make_link("rival")).unwrap());
        assert_eq!(state.room().unwrap().status, RoomStatus::PkIng);
        assert!(!state.bind_anchor(make_link("rival")).unwrap());
        assert!(state.set_room_status(RoomStatus::Living).is_err());

        let link = state.unbind_anchor().unwrap().unwrap();
        assert_eq!(link.peer_user_id, "rival");
        assert_eq!(state.room().unwrap().status, RoomStatus::Living);
        assert!(state.anchor().is_none());
        assert_eq!(
            state.self_user().unwrap().interact_status,
            InteractStatus::Normal
        );
    }

    #[test]
    fn media_update_reaches_pk_peer() {
        let mut state = active("host");
        state.bind_anchor(make_link("rival")).unwrap();
        assert!(state
            .update_media("rival", MediaState::Off, MediaState::On)
            .unwrap());
        assert_eq!(state.anchor().unwrap().peer_mic, MediaState::Off);
        assert!(!state
            .update_media("stranger", MediaState::Off, MediaState::Off)
            .unwrap());
    }

    #[test]
    fn replace_all_rejects_pk_without_link() {
        let mut state = active("me");
        let mut snapshot = make_snapshot("me", "host", 2);
        snapshot.room.status = RoomStatus::PkIng;
        assert!(state.replace_all(snapshot).is_err());
        // Previous state survives.
        assert_eq!(state.seats().len(), 4);
    }

    #[test]
    fn replace_all_rejects_double_seated_user() {
        let mut state = SessionState::new();
        let mut snapshot = make_snapshot("me", "host", 0);
        snapshot.seats = vec![seated(0, "u1"), seated(1, "u1")];
        assert!(state.replace_all(snapshot).is_err());
        assert!(!state.is_active());
    }

    #[test]
    fn replace_all_discards_local_flags() {
        let mut state = active("me");
        state
            .set_participant_status("me", InteractStatus::Applying)
            .unwrap();
        state
            .set_self_invite_status(SelfInviteStatus::InvitingChat, Some("u1".into()))
            .unwrap();

        let mut snapshot = make_snapshot("me", "host", 3);
        snapshot.room.status = RoomStatus::Chatting;
        snapshot.seats[0] = seated(0, "u1");
        snapshot.seats[2] = seated(2, "u2");
        state.replace_all(snapshot).unwrap();

        let view = state.view().unwrap();
        assert_eq!(view.room.status, RoomStatus::Chatting);
        assert_eq!(view.self_user.interact_status, InteractStatus::Normal);
        assert_eq!(view.self_invite_status, SelfInviteStatus::Normal);
        for seat in &view.seats {
            if let Some(occupant) = &seat.occupant {
                assert_eq!(occupant.interact_status, InteractStatus::Interacting);
            }
        }
        assert_eq!(state.occupied_seats(), 2);
    }

    #[test]
    fn applicants_are_deduplicated_and_cleared_on_seat() {
        let mut state = active("host");
        assert!(state.add_applicant("u1").unwrap());
        assert!(!state.add_applicant("u1").unwrap());
        state.upsert_seat(seated(0, "u1")).unwrap();
        assert!(state.applicants().is_empty());
    }
}
