//! Applying server pushes to the session.
//!
//! Everything here is synchronous and runs under the session lock. Engine
//! calls, chat storage, invite dialogs and events are collected in
//! [`Effects`] and carried out by the coordinator once the lock is released.

use crate::controls::MediaAction;
use crate::errors::LinkMicError;
use crate::events::{ChatMessage, LinkMicEvent, TerminationReason};
use crate::intents::{IntentKind, PendingIntents};
use crate::invites::InviteKind;
use crate::participants::{InteractStatus, MediaState, Participant};
use crate::protocol::{FinishType, Push};
use crate::seats::{SeatInfo, seat_from_wire};
use crate::session::{AnchorLink, RoomStatus, SelfInviteStatus, SessionState};

/// An invitation dialog to open.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InviteOffer {
    pub kind: InviteKind,
    pub room_id: String,
    pub from: Participant,
    pub seat_id: Option<u32>,
}

/// Side effects decided while the session was locked.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub events: Vec<LinkMicEvent>,
    pub media: Vec<MediaAction>,
    pub messages: Vec<ChatMessage>,
    pub invites: Vec<InviteOffer>,
    pub dismiss_invites: bool,
    pub clear_messages: bool,
    /// Report our media state back after the host changed it.
    pub report_media: Option<(String, MediaState, MediaState)>,
}

impl Effects {
    pub fn emit(&mut self, event: LinkMicEvent) {
        self.events.push(event);
    }

    pub fn media(&mut self, action: MediaAction) {
        self.media.push(action);
    }
}

/// Apply one decoded push.
///
/// Pushes for another room, or arriving with no session, are dropped.
/// Pushes naming seats or users we do not know are ignored.
pub(crate) fn apply_push(
    state: &mut SessionState,
    intents: &mut PendingIntents,
    push: Push,
    fx: &mut Effects,
) {
    let Some(room_id) = state.room_id() else {
        tracing::debug!("dropping push without a session: {push:?}");
        return;
    };
    // Removal is fatal, so it must name this room; other pushes may omit it.
    let names_room = match &push {
        Push::UserCleared(_) => push.room_id() == room_id,
        _ => push.room_id().is_empty() || push.room_id() == room_id,
    };
    if !names_room {
        tracing::debug!("dropping push for stale room {:?}", push.room_id());
        return;
    }
    if let Err(e) = dispatch(state, intents, push, fx) {
        tracing::warn!("push left partly unapplied: {e}");
    }
}

fn dispatch(
    state: &mut SessionState,
    intents: &mut PendingIntents,
    push: Push,
    fx: &mut Effects,
) -> Result<(), LinkMicError> {
    match push {
        Push::AudienceJoined(p) => {
            state.set_audience_count(p.audience_count)?;
            if !state.is_self(&p.user.user_id) {
                fx.emit(LinkMicEvent::AudienceJoined {
                    user: p.user,
                    audience_count: p.audience_count,
                });
            }
        }
        Push::AudienceLeft(p) => {
            state.set_audience_count(p.audience_count)?;
            state.remove_applicant(&p.user.user_id)?;
            finish_seat(state, &p.user.user_id, FinishType::Other, fx)?;
            clear_chat_invite_for(state, &p.user.user_id, fx)?;
            fx.emit(LinkMicEvent::AudienceLeft {
                user: p.user,
                audience_count: p.audience_count,
            });
        }
        Push::LiveFinished(_) => {
            if state.self_is_host() {
                tracing::debug!("live-finished echo for our own room");
            } else {
                tracing::info!("host ended the live");
                teardown(state, intents, Some(TerminationReason::LiveFinished), fx);
            }
        }
        Push::InteractStarted(p) => {
            let Some(lock) = state.seat(p.seat_id).map(|s| s.lock) else {
                tracing::debug!("interact-started for unknown seat {}", p.seat_id);
                return Ok(());
            };
            let user_id = p.user.user_id.clone();
            let is_self = state.is_self(&user_id);
            let held = is_self && intents.contains(IntentKind::AcceptChatInvite, &user_id);
            let update = state.upsert_seat(SeatInfo {
                seat_id: p.seat_id,
                status: lock,
                user: Some(p.user),
            })?;
            if update.placement {
                enter_chatting(state, fx)?;
            }
            clear_chat_invite_for(state, &user_id, fx)?;
            if !update.placement {
                // Same seat as before: only the media flags are news.
                if update.media {
                    fx.events.extend(media_event(state, &user_id));
                }
                return Ok(());
            }
            if held {
                tracing::debug!("seat {} applied, announcement left to our reply", p.seat_id);
            } else if is_self {
                announce_self_seated(state, fx);
            } else {
                fx.events.extend(seat_event(state, p.seat_id));
                if let Some(user) = state.participant(&user_id) {
                    fx.emit(LinkMicEvent::InteractStarted {
                        seat: p.seat_id,
                        user: user.clone(),
                        is_self: false,
                    });
                }
            }
        }
        Push::InteractFinished(p) => {
            state.remove_applicant(&p.user_id)?;
            clear_chat_invite_for(state, &p.user_id, fx)?;
            if finish_seat(state, &p.user_id, p.finish_type, fx)? {
                return Ok(());
            }
            // Not seated: an application that ended without a seat.
            if state.is_self(&p.user_id)
                && !state.self_is_host()
                && state.set_participant_status(&p.user_id, InteractStatus::Normal)?
            {
                fx.emit(LinkMicEvent::SelfStatusChanged(InteractStatus::Normal));
                fx.emit(LinkMicEvent::InteractFinished {
                    user_id: p.user_id,
                    seat: None,
                    reason: p.finish_type,
                    is_self: true,
                });
            }
        }
        Push::SeatStatusChanged(p) => {
            if state.set_seat_lock(p.seat_id, p.status)? {
                fx.events.extend(seat_event(state, p.seat_id));
            }
        }
        Push::MediaStatusChanged(p) => {
            if state.update_media(&p.user_id, p.mic, p.camera)? {
                fx.emit(LinkMicEvent::MediaChanged {
                    user_id: p.user_id,
                    mic: p.mic,
                    camera: p.camera,
                });
            }
        }
        Push::ChatMessage(p) => {
            if state.is_self(&p.user.user_id) {
                return Ok(());
            }
            let msg = ChatMessage {
                id: uuid::Uuid::new_v4().to_string(),
                sender_id: p.user.user_id,
                sender_name: p.user.user_name,
                text: p.message,
                timestamp_ms: crate::chat::now_ms(),
            };
            fx.messages.push(msg.clone());
            fx.emit(LinkMicEvent::ChatMessageReceived(msg));
        }
        Push::InviteReceived(p) => {
            let seated = state
                .self_user_id()
                .is_some_and(|me| state.seat_of(me).is_some());
            if state.self_is_host() || seated {
                tracing::debug!("ignoring seat invitation from {}", p.host.user_id);
                return Ok(());
            }
            fx.invites.push(InviteOffer {
                kind: InviteKind::Chat,
                room_id: p.room_id,
                from: p.host,
                seat_id: seat_from_wire(p.seat_id),
            });
        }
        Push::ApplyReceived(p) => {
            if !state.self_is_host() {
                return Ok(());
            }
            if state.add_applicant(&p.applicant.user_id)? {
                fx.emit(LinkMicEvent::ApplyReceived {
                    user: p.applicant,
                    pending: state.applicants().len(),
                });
            }
        }
        Push::InviteReplied(p) => {
            if !state.self_is_host() {
                return Ok(());
            }
            fx.emit(LinkMicEvent::InviteReplied {
                kind: InviteKind::Chat,
                user_id: p.user_id.clone(),
                accepted: p.accepted,
            });
            if !p.accepted {
                clear_chat_invite_for(state, &p.user_id, fx)?;
            }
        }
        Push::MediaOperated(p) => {
            if state.self_is_host() {
                return Ok(());
            }
            let Some(me) = state.self_user() else {
                return Ok(());
            };
            let (user_id, old_mic, old_camera) = (me.user_id.clone(), me.mic, me.camera);
            let mic = p.mic.unwrap_or(old_mic);
            let camera = p.camera.unwrap_or(old_camera);
            if !state.update_media(&user_id, mic, camera)? {
                return Ok(());
            }
            if mic != old_mic {
                fx.media(MediaAction::SetMicrophone(mic));
            }
            if camera != old_camera {
                fx.media(MediaAction::SetCamera(camera));
            }
            tracing::info!("host changed our media: mic={mic:?} camera={camera:?}");
            fx.emit(LinkMicEvent::MediaOperatedByHost { mic, camera });
            fx.emit(LinkMicEvent::MediaChanged {
                user_id,
                mic,
                camera,
            });
            fx.report_media = Some((p.room_id, mic, camera));
        }
        Push::UserCleared(p) => {
            if state.is_self(&p.user_id) {
                tracing::info!("removed from room {} by the server", p.room_id);
                teardown(state, intents, Some(TerminationReason::ClearedByServer), fx);
                return Ok(());
            }
            state.remove_applicant(&p.user_id)?;
            finish_seat(state, &p.user_id, FinishType::Other, fx)?;
            clear_chat_invite_for(state, &p.user_id, fx)?;
        }
        Push::AnchorInvited(p) => {
            let status = state.room().map(|r| r.status);
            if !state.self_is_host() || status != Some(RoomStatus::Living) {
                tracing::debug!(
                    "ignoring PK invitation from {} while {status:?}",
                    p.inviter.user_id
                );
                return Ok(());
            }
            fx.invites.push(InviteOffer {
                kind: InviteKind::Pk,
                room_id: p.inviter_room_id,
                from: p.inviter,
                seat_id: None,
            });
        }
        Push::AnchorReplied(p) => {
            if state.self_invite_status() != SelfInviteStatus::InvitingPk
                || state.invite_target() != Some(p.invitee_user_id.as_str())
            {
                tracing::debug!("PK reply from {} matches no invitation", p.invitee_user_id);
                return Ok(());
            }
            fx.emit(LinkMicEvent::InviteReplied {
                kind: InviteKind::Pk,
                user_id: p.invitee_user_id,
                accepted: p.accepted,
            });
            if !p.accepted {
                state.set_self_invite_status(SelfInviteStatus::Normal, None)?;
                fx.emit(LinkMicEvent::SelfInviteStatusChanged(SelfInviteStatus::Normal));
            } else if let Some(link) = p.anchor {
                bind_from_push(state, intents, link, fx)?;
            }
        }
        Push::NewAnchorJoined(p) => bind_from_push(state, intents, p.anchor, fx)?,
        Push::AnchorFinished(_) => {
            let Some(peer_room) = state.anchor().map(|l| l.peer_room_id.clone()) else {
                tracing::debug!("PK already closed");
                return Ok(());
            };
            let ended_by_self = intents.consume(IntentKind::EndPk, &peer_room);
            close_pk(state, ended_by_self, fx)?;
        }
        Push::OtherAnchorManaged(p) => {
            let is_peer = state
                .anchor()
                .is_some_and(|l| l.peer_user_id == p.other_user_id);
            if !state.self_is_host() || !is_peer {
                return Ok(());
            }
            let kind = IntentKind::MutePeerAnchor { muted: p.muted };
            if intents.consume(kind, &p.other_user_id) {
                // Already applied to the engine when we asked for it.
                state.set_anchor_muted(p.muted)?;
                return Ok(());
            }
            if !state.set_anchor_muted(p.muted)? {
                return Ok(());
            }
            fx.media(MediaAction::MuteRemoteAudio {
                user_id: p.other_user_id.clone(),
                muted: p.muted,
            });
            fx.emit(LinkMicEvent::PeerAnchorMuted {
                peer_user_id: p.other_user_id,
                muted: p.muted,
            });
        }
        Push::ChatRoomClosed(_) => {
            let occupants: Vec<String> = state
                .seats()
                .iter()
                .filter_map(|s| s.occupant.clone())
                .collect();
            for user_id in occupants {
                finish_seat(state, &user_id, FinishType::Other, fx)?;
            }
            let me = state.self_user_id().unwrap_or_default().to_string();
            if !state.self_is_host() && state.set_participant_status(&me, InteractStatus::Normal)? {
                fx.emit(LinkMicEvent::SelfStatusChanged(InteractStatus::Normal));
            }
            if state.self_invite_status() == SelfInviteStatus::InvitingChat {
                state.set_self_invite_status(SelfInviteStatus::Normal, None)?;
                fx.emit(LinkMicEvent::SelfInviteStatusChanged(SelfInviteStatus::Normal));
            }
            fx.emit(LinkMicEvent::ChatRoomClosed);
        }
    }
    Ok(())
}

fn seat_event(state: &SessionState, index: u32) -> Option<LinkMicEvent> {
    let seat = state.seat(index)?;
    Some(LinkMicEvent::SeatChanged {
        index,
        lock: seat.lock,
        occupant: seat.occupant.clone(),
    })
}

fn media_event(state: &SessionState, user_id: &str) -> Option<LinkMicEvent> {
    let user = state.participant(user_id)?;
    Some(LinkMicEvent::MediaChanged {
        user_id: user.user_id.clone(),
        mic: user.mic,
        camera: user.camera,
    })
}

fn enter_chatting(state: &mut SessionState, fx: &mut Effects) -> Result<(), LinkMicError> {
    if state.room().is_some_and(|r| r.status == RoomStatus::Living)
        && state.set_room_status(RoomStatus::Chatting)?
    {
        tracing::info!("room is now chatting");
        fx.emit(LinkMicEvent::RoomStatusChanged(RoomStatus::Chatting));
    }
    Ok(())
}

fn settle_room_status(state: &mut SessionState, fx: &mut Effects) -> Result<(), LinkMicError> {
    if state.room().is_some_and(|r| r.status == RoomStatus::Chatting)
        && state.occupied_seats() == 0
        && state.set_room_status(RoomStatus::Living)?
    {
        tracing::info!("last seat emptied, room back to living");
        fx.emit(LinkMicEvent::RoomStatusChanged(RoomStatus::Living));
    }
    Ok(())
}

/// Our outbound chat invitation to `user_id` is settled.
fn clear_chat_invite_for(
    state: &mut SessionState,
    user_id: &str,
    fx: &mut Effects,
) -> Result<(), LinkMicError> {
    if state.self_invite_status() == SelfInviteStatus::InvitingChat
        && state.invite_target() == Some(user_id)
    {
        state.set_self_invite_status(SelfInviteStatus::Normal, None)?;
        fx.emit(LinkMicEvent::SelfInviteStatusChanged(SelfInviteStatus::Normal));
    }
    Ok(())
}

/// Vacate `user_id`'s seat and announce it. Returns whether it held one.
pub(crate) fn finish_seat(
    state: &mut SessionState,
    user_id: &str,
    reason: FinishType,
    fx: &mut Effects,
) -> Result<bool, LinkMicError> {
    let is_self = state.is_self(user_id);
    let Some(index) = state.vacate_user(user_id)? else {
        return Ok(false);
    };
    tracing::info!("{user_id} left seat {index} ({reason:?})");
    fx.events.extend(seat_event(state, index));
    fx.emit(LinkMicEvent::InteractFinished {
        user_id: user_id.to_string(),
        seat: Some(index),
        reason,
        is_self,
    });
    if is_self {
        fx.emit(LinkMicEvent::SelfStatusChanged(InteractStatus::Normal));
        fx.media(MediaAction::StopCapture);
    }
    settle_room_status(state, fx)?;
    Ok(true)
}

/// Announce that we occupy a seat and start publishing. Returns false if
/// we are not seated.
pub(crate) fn announce_self_seated(state: &SessionState, fx: &mut Effects) -> bool {
    let Some(me) = state.self_user() else {
        return false;
    };
    let Some(index) = state.seat_of(&me.user_id) else {
        return false;
    };
    tracing::info!("on seat {index}");
    fx.events.extend(seat_event(state, index));
    fx.emit(LinkMicEvent::InteractStarted {
        seat: index,
        user: me.clone(),
        is_self: true,
    });
    fx.emit(LinkMicEvent::SelfStatusChanged(InteractStatus::Interacting));
    fx.media(MediaAction::StartCapture {
        mic: me.mic,
        camera: me.camera,
    });
    true
}

/// Place ourselves on the seat returned by a successful reply.
pub(crate) fn seat_self(
    state: &mut SessionState,
    mut seat: SeatInfo,
    fx: &mut Effects,
) -> Result<(), LinkMicError> {
    let Some(me) = state.self_user().cloned() else {
        return Err(LinkMicError::NoSession);
    };
    let granted_to = seat.user.as_ref().map(|u| u.user_id.clone());
    match granted_to {
        Some(user_id) if user_id != me.user_id => {
            tracing::warn!("seat {} granted to {user_id} instead of us", seat.seat_id);
            return Ok(());
        }
        Some(_) => {}
        None => seat.user = Some(me),
    }
    if state.upsert_seat(seat)?.placement {
        enter_chatting(state, fx)?;
    }
    Ok(())
}

/// Bind `link`. Returns whether the link is new.
pub(crate) fn start_pk(
    state: &mut SessionState,
    link: AnchorLink,
    fx: &mut Effects,
) -> Result<bool, LinkMicError> {
    let was_inviting = state.self_invite_status() == SelfInviteStatus::InvitingPk;
    let changed = state.bind_anchor(link)?;
    if was_inviting && state.self_invite_status() == SelfInviteStatus::Normal {
        fx.emit(LinkMicEvent::SelfInviteStatusChanged(SelfInviteStatus::Normal));
    }
    Ok(changed)
}

pub(crate) fn announce_pk(state: &SessionState, fx: &mut Effects) {
    let Some(link) = state.anchor() else {
        return;
    };
    tracing::info!("PK started with {} ({})", link.peer_user_id, link.peer_room_id);
    if state.self_is_host() {
        fx.media(MediaAction::StartForward {
            peer_room_id: link.peer_room_id.clone(),
            token: link.forward_token.clone(),
        });
    }
    fx.emit(LinkMicEvent::PkStarted(link.clone()));
    fx.emit(LinkMicEvent::RoomStatusChanged(RoomStatus::PkIng));
}

fn bind_from_push(
    state: &mut SessionState,
    intents: &mut PendingIntents,
    link: AnchorLink,
    fx: &mut Effects,
) -> Result<(), LinkMicError> {
    let held = intents.contains(IntentKind::AcceptPkInvite, &link.peer_user_id);
    if !start_pk(state, link, fx)? {
        return Ok(());
    }
    intents.discard_kind(IntentKind::EndPk);
    if held {
        tracing::debug!("PK bound, announcement left to our reply");
    } else {
        announce_pk(state, fx);
    }
    Ok(())
}

/// Leave PK. Returns false if no link was bound.
pub(crate) fn close_pk(
    state: &mut SessionState,
    ended_by_self: bool,
    fx: &mut Effects,
) -> Result<bool, LinkMicError> {
    let Some(link) = state.unbind_anchor()? else {
        return Ok(false);
    };
    tracing::info!(
        "PK with {} finished (ended_by_self={ended_by_self})",
        link.peer_user_id
    );
    if state.self_is_host() {
        fx.media(MediaAction::StopForward);
    }
    fx.emit(LinkMicEvent::PkFinished {
        peer_user_id: link.peer_user_id,
        ended_by_self,
    });
    fx.emit(LinkMicEvent::RoomStatusChanged(RoomStatus::Living));
    Ok(true)
}

/// Drop the whole session locally. No request is sent.
pub(crate) fn teardown(
    state: &mut SessionState,
    intents: &mut PendingIntents,
    reason: Option<TerminationReason>,
    fx: &mut Effects,
) {
    state.clear();
    intents.clear();
    fx.dismiss_invites = true;
    fx.clear_messages = true;
    fx.media(MediaAction::StopForward);
    fx.media(MediaAction::StopCapture);
    fx.emit(match reason {
        Some(reason) => LinkMicEvent::SessionTerminated(reason),
        None => LinkMicEvent::SessionEnded,
    });
}
