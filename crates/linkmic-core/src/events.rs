use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::invites::{DismissReason, InviteKind, TimedInvite};
use crate::participants::{InteractStatus, MediaState, Participant};
use crate::protocol::FinishType;
use crate::session::{AnchorLink, RoomStatus, SelfInviteStatus, SessionView};
use crate::seats::SeatLock;

/// Events emitted by the core to UI listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkMicEvent {
    ConnectionStateChanged(ConnectionState),
    /// A room was created or joined.
    SessionStarted(SessionView),
    /// The session was replaced by a fresh snapshot after reconnecting.
    SessionResynced(SessionView),
    /// The local user left or finished the live.
    SessionEnded,
    /// The session was ended from outside; the UI should exit the room.
    SessionTerminated(TerminationReason),
    RoomStatusChanged(RoomStatus),
    AudienceJoined { user: Participant, audience_count: u32 },
    AudienceLeft { user: Participant, audience_count: u32 },
    SeatChanged { index: u32, lock: SeatLock, occupant: Option<String> },
    InteractStarted { seat: u32, user: Participant, is_self: bool },
    InteractFinished {
        user_id: String,
        seat: Option<u32>,
        reason: FinishType,
        is_self: bool,
    },
    SelfStatusChanged(InteractStatus),
    ApplyReceived { user: Participant, pending: usize },
    SelfInviteStatusChanged(SelfInviteStatus),
    InviteReplied { kind: InviteKind, user_id: String, accepted: bool },
    InviteReceived(TimedInvite),
    InviteDismissed { kind: InviteKind, id: u64, reason: DismissReason },
    MediaChanged { user_id: String, mic: MediaState, camera: MediaState },
    MediaOperatedByHost { mic: MediaState, camera: MediaState },
    ChatMessageReceived(ChatMessage),
    PkStarted(AnchorLink),
    PkFinished { peer_user_id: String, ended_by_self: bool },
    PeerAnchorMuted { peer_user_id: String, muted: bool },
    ChatRoomClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Resyncing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The server removed this user (logged in elsewhere or kicked).
    ClearedByServer,
    /// The host ended the live.
    LiveFinished,
    /// The room no longer existed when resyncing.
    RoomGone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub timestamp_ms: u64,
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait LinkMicEventListener: Send + Sync {
    fn on_event(&self, event: LinkMicEvent);
}

type ListenerList = RwLock<Vec<(u64, Arc<dyn LinkMicEventListener>)>>;

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone)]
pub struct EventEmitter {
    listeners: Arc<ListenerList>,
    next_id: Arc<AtomicU64>,
}

/// Keeps a listener registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn LinkMicEventListener>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn emit(&self, event: LinkMicEvent) {
        // Snapshot so a listener may unsubscribe from inside on_event.
        let listeners: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener.on_event(event.clone());
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
