//! Request commands, envelopes and push events exchanged with the
//! interaction server.
//!
//! Payloads are JSON. Push event names are mapped to [`Push`] variants once,
//! in [`Push::decode`], so nothing past the transport boundary dispatches on
//! strings.

use serde::{Deserialize, Serialize};

use crate::participants::{MediaState, Participant};
use crate::seats::{SeatInfo, SeatLock};
use crate::session::{AnchorLink, SessionSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    CreateLive,
    JoinLiveRoom,
    LeaveLiveRoom,
    FinishLive,
    GetActiveLiveRoomList,
    Reconnect,
    InviteInteract,
    AgreeApply,
    ManageInteractApply,
    ManageSeat,
    ApplyInteract,
    FinishInteract,
    ReplyInvite,
    GetAnchorList,
    InviteAnchor,
    ReplyAnchor,
    FinishAnchorInteract,
    ManageOtherAnchor,
    SendMessage,
    ClearUser,
    UpdateMediaStatus,
    GetAudienceList,
    GetApplyAudienceList,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateLive => "liveCreateLive",
            Self::JoinLiveRoom => "liveJoinLiveRoom",
            Self::LeaveLiveRoom => "liveLeaveLiveRoom",
            Self::FinishLive => "liveFinishLive",
            Self::GetActiveLiveRoomList => "liveGetActiveLiveRoomList",
            Self::Reconnect => "liveReconnect",
            Self::InviteInteract => "liveInviteInteract",
            Self::AgreeApply => "liveAgreeApply",
            Self::ManageInteractApply => "liveManageInteractApply",
            Self::ManageSeat => "liveManageSeat",
            Self::ApplyInteract => "liveApplyInteract",
            Self::FinishInteract => "liveFinishInteract",
            Self::ReplyInvite => "liveReplyInvite",
            Self::GetAnchorList => "liveGetAnchorList",
            Self::InviteAnchor => "liveInviteAnchor",
            Self::ReplyAnchor => "liveReplyAnchor",
            Self::FinishAnchorInteract => "liveFinishAnchorInteract",
            Self::ManageOtherAnchor => "liveManageOtherAnchor",
            Self::SendMessage => "liveSendMessage",
            Self::ClearUser => "liveClearUser",
            Self::UpdateMediaStatus => "liveUpdateMediaStatus",
            Self::GetAudienceList => "liveGetAudienceList",
            Self::GetApplyAudienceList => "liveGetApplyAudienceList",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common envelope around every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestEnvelope {
    pub app_id: String,
    /// Empty for room-less calls.
    pub room_id: String,
    pub user_id: String,
    pub event_name: String,
    pub request_id: String,
    pub device_id: String,
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseEnvelope {
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub response: serde_json::Value,
}

/// Undecoded server push as delivered by a transport.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawPush {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Connectivity change reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connected,
    Disconnected,
    Reconnected,
}

/// Everything a transport delivers outside of request/response.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Push(RawPush),
    Connectivity(Connectivity),
}

// ── Request payloads ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatAction {
    Lock,
    Unlock,
    Mute,
    Unmute,
    EndInteract,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreateLiveRequest<'a> {
    pub user_name: &'a str,
    pub room_name: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct JoinRequest<'a> {
    pub user_name: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct TargetRequest<'a> {
    pub user_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct InviteInteractRequest<'a> {
    pub audience_user_id: &'a str,
    pub seat_id: i32,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SeatRequest {
    pub seat_id: i32,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ManageSeatRequest {
    pub seat_id: u32,
    #[serde(rename = "type")]
    pub action: SeatAction,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ManageApplyRequest {
    pub needs_approval: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ReplyInviteRequest<'a> {
    pub host_user_id: &'a str,
    pub seat_id: i32,
    pub accept: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct InviteAnchorRequest<'a> {
    pub invitee_room_id: &'a str,
    pub invitee_user_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ReplyAnchorRequest<'a> {
    pub inviter_room_id: &'a str,
    pub inviter_user_id: &'a str,
    pub accept: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ManageOtherAnchorRequest<'a> {
    pub other_room_id: &'a str,
    pub other_user_id: &'a str,
    pub muted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct MediaStatusRequest {
    pub mic: MediaState,
    pub camera: MediaState,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SendMessageRequest<'a> {
    pub message: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct Empty {}

// ── Response payloads ───────────────────────────────────────────────

/// Responses that carry no data decode from anything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ack {}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplyInteractResponse {
    #[serde(default)]
    pub needs_approval: bool,
    #[serde(default)]
    pub seat_id: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplyInviteResponse {
    #[serde(default)]
    pub seat: Option<SeatInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplyAnchorResponse {
    #[serde(default)]
    pub anchor: Option<AnchorLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomSummary {
    pub room_id: String,
    #[serde(default)]
    pub title: String,
    pub host_user_id: String,
    #[serde(default)]
    pub host_user_name: String,
    #[serde(default)]
    pub audience_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RoomListResponse {
    #[serde(default)]
    pub rooms: Vec<RoomSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AnchorSummary {
    pub room_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    /// The anchor is free to accept a PK invitation.
    #[serde(default)]
    pub available: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnchorListResponse {
    #[serde(default)]
    pub anchors: Vec<AnchorSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AudienceListResponse {
    #[serde(default)]
    pub audiences: Vec<Participant>,
}

pub(crate) type SnapshotResponse = SessionSnapshot;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ReconnectResponse {
    /// Absent when the server no longer knows a room for this user.
    #[serde(default)]
    pub session: Option<SessionSnapshot>,
}

// ── Push events ─────────────────────────────────────────────────────

pub mod events {
    pub const AUDIENCE_JOINED: &str = "liveOnAudienceJoinRoom";
    pub const AUDIENCE_LEFT: &str = "liveOnAudienceLeaveRoom";
    pub const LIVE_FINISHED: &str = "liveOnFinishLive";
    pub const INTERACT_STARTED: &str = "liveOnInteractJoin";
    pub const INTERACT_FINISHED: &str = "liveOnInteractFinish";
    pub const SEAT_STATUS_CHANGED: &str = "liveOnSeatStatusChange";
    pub const MEDIA_STATUS_CHANGED: &str = "liveOnMediaChange";
    pub const CHAT_MESSAGE: &str = "liveOnMessageSend";
    pub const INVITE_RECEIVED: &str = "liveOnInviteInteract";
    pub const APPLY_RECEIVED: &str = "liveOnApplyInteract";
    pub const INVITE_REPLIED: &str = "liveOnInviteResult";
    pub const MEDIA_OPERATED: &str = "liveOnMediaOperate";
    pub const USER_CLEARED: &str = "liveOnClearUser";
    pub const ANCHOR_INVITED: &str = "liveOnAnchorInvite";
    pub const ANCHOR_REPLIED: &str = "liveOnAnchorReply";
    pub const NEW_ANCHOR_JOINED: &str = "liveOnNewAnchorJoin";
    pub const ANCHOR_FINISHED: &str = "liveOnAnchorInteractFinish";
    pub const OTHER_ANCHOR_MANAGED: &str = "liveOnManageOtherAnchor";
    pub const CHAT_ROOM_CLOSED: &str = "liveOnCloseChatRoom";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishType {
    EndedByHost,
    EndedBySelf,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AudienceChange {
    pub room_id: String,
    pub user: Participant,
    #[serde(default)]
    pub audience_count: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoomRef {
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InteractStarted {
    pub room_id: String,
    pub seat_id: u32,
    pub user: Participant,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InteractFinished {
    pub room_id: String,
    pub user_id: String,
    #[serde(default)]
    pub seat_id: Option<u32>,
    #[serde(rename = "type")]
    pub finish_type: FinishType,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SeatStatusChanged {
    pub room_id: String,
    pub seat_id: u32,
    pub status: SeatLock,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaStatusChanged {
    pub room_id: String,
    pub user_id: String,
    pub mic: MediaState,
    pub camera: MediaState,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatMessagePush {
    pub room_id: String,
    pub user: Participant,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InviteReceived {
    pub room_id: String,
    pub host: Participant,
    #[serde(default = "any_seat")]
    pub seat_id: i32,
}

fn any_seat() -> i32 {
    crate::seats::ANY_SEAT
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApplyReceived {
    pub room_id: String,
    pub applicant: Participant,
    #[serde(default = "any_seat")]
    pub seat_id: i32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InviteReplied {
    pub room_id: String,
    pub user_id: String,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaOperated {
    pub room_id: String,
    #[serde(default)]
    pub mic: Option<MediaState>,
    #[serde(default)]
    pub camera: Option<MediaState>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserCleared {
    pub room_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnchorInvited {
    pub inviter_room_id: String,
    pub inviter: Participant,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnchorReplied {
    pub invitee_room_id: String,
    pub invitee_user_id: String,
    pub accepted: bool,
    #[serde(default)]
    pub anchor: Option<AnchorLink>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewAnchorJoined {
    pub room_id: String,
    pub anchor: AnchorLink,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnchorFinished {
    pub room_id: String,
    #[serde(default)]
    pub peer_room_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OtherAnchorManaged {
    pub room_id: String,
    pub other_user_id: String,
    pub muted: bool,
}

/// Server pushes, one variant per event name.
#[derive(Debug, Clone, PartialEq)]
pub enum Push {
    AudienceJoined(AudienceChange),
    AudienceLeft(AudienceChange),
    LiveFinished(RoomRef),
    InteractStarted(InteractStarted),
    InteractFinished(InteractFinished),
    SeatStatusChanged(SeatStatusChanged),
    MediaStatusChanged(MediaStatusChanged),
    ChatMessage(ChatMessagePush),
    InviteReceived(InviteReceived),
    ApplyReceived(ApplyReceived),
    InviteReplied(InviteReplied),
    MediaOperated(MediaOperated),
    UserCleared(UserCleared),
    AnchorInvited(AnchorInvited),
    AnchorReplied(AnchorReplied),
    NewAnchorJoined(NewAnchorJoined),
    AnchorFinished(AnchorFinished),
    OtherAnchorManaged(OtherAnchorManaged),
    ChatRoomClosed(RoomRef),
}

impl Push {
    /// Decode a raw push. Unknown event names yield `Ok(None)`.
    pub fn decode(raw: RawPush) -> Result<Option<Push>, serde_json::Error> {
        use serde_json::from_value as de;
        let RawPush { event, data } = raw;
        let push = match event.as_str() {
            events::AUDIENCE_JOINED => Push::AudienceJoined(de(data)?),
            events::AUDIENCE_LEFT => Push::AudienceLeft(de(data)?),
            events::LIVE_FINISHED => Push::LiveFinished(de(data)?),
            events::INTERACT_STARTED => Push::InteractStarted(de(data)?),
            events::INTERACT_FINISHED => Push::InteractFinished(de(data)?),
            events::SEAT_STATUS_CHANGED => Push::SeatStatusChanged(de(data)?),
            events::MEDIA_STATUS_CHANGED => Push::MediaStatusChanged(de(data)?),
            events::CHAT_MESSAGE => Push::ChatMessage(de(data)?),
            events::INVITE_RECEIVED => Push::InviteReceived(de(data)?),
            events::APPLY_RECEIVED => Push::ApplyReceived(de(data)?),
            events::INVITE_REPLIED => Push::InviteReplied(de(data)?),
            events::MEDIA_OPERATED => Push::MediaOperated(de(data)?),
            events::USER_CLEARED => Push::UserCleared(de(data)?),
            events::ANCHOR_INVITED => Push::AnchorInvited(de(data)?),
            events::ANCHOR_REPLIED => Push::AnchorReplied(de(data)?),
            events::NEW_ANCHOR_JOINED => Push::NewAnchorJoined(de(data)?),
            events::ANCHOR_FINISHED => Push::AnchorFinished(de(data)?),
            events::OTHER_ANCHOR_MANAGED => Push::OtherAnchorManaged(de(data)?),
            events::CHAT_ROOM_CLOSED => Push::ChatRoomClosed(de(data)?),
            _ => return Ok(None),
        };
        Ok(Some(push))
    }

    /// Room the push is about, for the stale-room check.
    pub fn room_id(&self) -> &str {
        match self {
            Push::AudienceJoined(p) | Push::AudienceLeft(p) => &p.room_id,
            Push::LiveFinished(p) | Push::ChatRoomClosed(p) => &p.room_id,
            Push::InteractStarted(p) => &p.room_id,
            Push::InteractFinished(p) => &p.room_id,
            Push::SeatStatusChanged(p) => &p.room_id,
            Push::MediaStatusChanged(p) => &p.room_id,
            Push::ChatMessage(p) => &p.room_id,
            Push::InviteReceived(p) => &p.room_id,
            Push::ApplyReceived(p) => &p.room_id,
            Push::InviteReplied(p) => &p.room_id,
            Push::MediaOperated(p) => &p.room_id,
            Push::UserCleared(p) => &p.room_id,
            // Addressed to us from another room.
            Push::AnchorInvited(_) | Push::AnchorReplied(_) => "",
            Push::NewAnchorJoined(p) => &p.room_id,
            Push::AnchorFinished(p) => &p.room_id,
            Push::OtherAnchorManaged(p) => &p.room_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_interact_finished() {
        let raw = RawPush {
            event: events::INTERACT_FINISHED.into(),
            data: json!({"room_id": "r1", "user_id": "u1", "seat_id": 2, "type": "ended_by_host"}),
        };
        let push = Push::decode(raw).unwrap().unwrap();
        assert_eq!(
            push,
            Push::InteractFinished(InteractFinished {
                room_id: "r1".into(),
                user_id: "u1".into(),
                seat_id: Some(2),
                finish_type: FinishType::EndedByHost,
            })
        );
        assert_eq!(push.room_id(), "r1");
    }

    #[test]
    fn unknown_finish_type_is_tolerated() {
        let raw = RawPush {
            event: events::INTERACT_FINISHED.into(),
            data: json!({"room_id": "r1", "user_id": "u1", "type": "kicked_by_admin"}),
        };
        match Push::decode(raw).unwrap() {
            Some(Push::InteractFinished(p)) => assert_eq!(p.finish_type, FinishType::Other),
            other => panic!("expected InteractFinished, got {other:?}"),
        }
    }

    #[test]
    fn unknown_event_is_none() {
        let raw = RawPush {
            event: "liveOnSomethingNew".into(),
            data: json!({}),
        };
        assert!(Push::decode(raw).unwrap().is_none());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let raw = RawPush {
            event: events::SEAT_STATUS_CHANGED.into(),
            data: json!({"room_id": "r1"}),
        };
        assert!(Push::decode(raw).is_err());
    }

    #[test]
    fn invite_defaults_to_any_seat() {
        let raw = RawPush {
            event: events::INVITE_RECEIVED.into(),
            data: json!({"room_id": "r1", "host": {"user_id": "h", "role": "host"}}),
        };
        match Push::decode(raw).unwrap() {
            Some(Push::InviteReceived(p)) => assert_eq!(p.seat_id, crate::seats::ANY_SEAT),
            other => panic!("expected InviteReceived, got {other:?}"),
        }
    }

    #[test]
    fn command_names_are_distinct() {
        let all = [
            Command::CreateLive,
            Command::JoinLiveRoom,
            Command::LeaveLiveRoom,
            Command::FinishLive,
            Command::GetActiveLiveRoomList,
            Command::Reconnect,
            Command::InviteInteract,
            Command::AgreeApply,
            Command::ManageInteractApply,
            Command::ManageSeat,
            Command::ApplyInteract,
            Command::FinishInteract,
            Command::ReplyInvite,
            Command::GetAnchorList,
            Command::InviteAnchor,
            Command::ReplyAnchor,
            Command::FinishAnchorInteract,
            Command::ManageOtherAnchor,
            Command::SendMessage,
            Command::ClearUser,
            Command::UpdateMediaStatus,
            Command::GetAudienceList,
            Command::GetApplyAudienceList,
        ];
        let names: std::collections::HashSet<_> = all.iter().map(|c| c.as_str()).collect();
        assert_eq!(names.len(), all.len());
    }
}
