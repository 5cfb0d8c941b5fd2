use thiserror::Error;

use crate::invites::InviteKind;
use crate::protocol::Command;
use crate::session::{RoomStatus, SelfInviteStatus};

#[derive(Debug, Error)]
pub enum LinkMicError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("{command} failed with code {code}: {message}")]
    Business {
        command: Command,
        code: BusinessCode,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("no active session")]
    NoSession,
    #[error("inconsistent session state: {0}")]
    Inconsistent(String),
}

impl LinkMicError {
    /// Short notice suitable for a toast in the UI layer.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::Business { code, message, .. } => match code.notice() {
                Some(notice) => notice.to_string(),
                None if !message.is_empty() => message.clone(),
                None => format!("request failed ({code})"),
            },
            Self::Transport(TransportError::Timeout) => "network timeout, please retry".into(),
            Self::Transport(_) => "network unavailable".into(),
            Self::Payload(_) | Self::Inconsistent(_) => "unexpected server response".into(),
            Self::NoSession => "you are no longer in the room".into(),
        }
    }

    pub fn business_code(&self) -> Option<BusinessCode> {
        match self {
            Self::Business { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// A command attempted while the local model forbids it. Never reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("an invitation is already pending ({0:?})")]
    AlreadyInviting(SelfInviteStatus),
    #[error("only the host can do this")]
    NotHost,
    #[error("the host cannot do this")]
    NotAudience,
    #[error("not available while the room is {0:?}")]
    RoomBusy(RoomStatus),
    #[error("already on a seat")]
    AlreadyInteracting,
    #[error("application already sent")]
    AlreadyApplying,
    #[error("not on a seat")]
    NotInteracting,
    #[error("{0} is not waiting for approval")]
    NotApplying(String),
    #[error("a seat invitation is being answered")]
    AnsweringInvite,
    #[error("no pending {0:?} invitation")]
    NoPendingInvite(InviteKind),
    #[error("not in a PK battle")]
    NotInPk,
    #[error("seat {0} does not exist")]
    UnknownSeat(u32),
    #[error("seat {0} is locked")]
    SeatLocked(u32),
    #[error("seat {0} is empty")]
    SeatEmpty(u32),
    #[error("{0} is already in progress")]
    ActionInProgress(Command),
    #[error("message is empty")]
    EmptyMessage,
    #[error("already in a room")]
    AlreadyInRoom,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
}

/// Numeric result codes returned by the interaction server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusinessCode {
    RoomNotFound,
    RoomClosed,
    StatusMismatch,
    SeatsFull,
    SeatLocked,
    TargetBusy,
    AnchorBusy,
    UserNotInRoom,
    Other(i32),
}

pub const CODE_SUCCESS: i32 = 200;

impl BusinessCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            404 => Self::RoomNotFound,
            419 => Self::RoomClosed,
            422 => Self::UserNotInRoom,
            472 => Self::StatusMismatch,
            506 => Self::SeatsFull,
            507 => Self::SeatLocked,
            550 => Self::TargetBusy,
            622 => Self::AnchorBusy,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::RoomNotFound => 404,
            Self::RoomClosed => 419,
            Self::UserNotInRoom => 422,
            Self::StatusMismatch => 472,
            Self::SeatsFull => 506,
            Self::SeatLocked => 507,
            Self::TargetBusy => 550,
            Self::AnchorBusy => 622,
            Self::Other(code) => code,
        }
    }

    /// The room this session refers to no longer exists server-side.
    pub fn is_room_gone(self) -> bool {
        matches!(self, Self::RoomNotFound | Self::RoomClosed | Self::UserNotInRoom)
    }

    fn notice(self) -> Option<&'static str> {
        match self {
            Self::RoomNotFound | Self::RoomClosed => Some("the live room has ended"),
            Self::UserNotInRoom => Some("the user has left the room"),
            Self::StatusMismatch => Some("the user's status has changed, please refresh"),
            Self::SeatsFull => Some("all seats are taken"),
            Self::SeatLocked => Some("the seat is locked"),
            Self::TargetBusy => Some("the user is busy with another interaction"),
            Self::AnchorBusy => Some("the host is busy with another interaction"),
            Self::Other(_) => None,
        }
    }
}

impl std::fmt::Display for BusinessCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}
