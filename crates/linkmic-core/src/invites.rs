use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::events::{EventEmitter, LinkMicEvent};
use crate::participants::Participant;

/// Countdown shown on a received invitation.
pub const DEFAULT_INVITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InviteKind {
    /// A host invited us onto a seat.
    Chat,
    /// Another host invited us to a PK battle.
    Pk,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimedInvite {
    pub id: u64,
    pub kind: InviteKind,
    pub from_room_id: String,
    pub from_user: Participant,
    pub seat_id: Option<u32>,
    pub expires_in: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissReason {
    /// A newer invitation of the same kind arrived.
    Replaced,
    /// Nobody answered in time. No reply is sent.
    Expired,
    /// Taken for an accept/decline reply.
    Answered,
    /// Thrown away with the rest of the session state.
    Discarded,
}

struct Slot {
    invite: TimedInvite,
    timer: tokio::task::JoinHandle<()>,
}

type Slots = Arc<Mutex<HashMap<InviteKind, Slot>>>;

/// Holds at most one received invitation per kind, each with an expiry timer.
///
/// Dismissal never sends a reply; only [`take`](Self::take) hands the invite
/// out for answering, and it can be taken once.
pub struct TimedInviteManager {
    slots: Slots,
    next_id: AtomicU64,
    timeout: Duration,
    emitter: EventEmitter,
}

impl TimedInviteManager {
    pub fn new(timeout: Duration, emitter: EventEmitter) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            timeout,
            emitter,
        }
    }

    /// Show a new invitation, replacing any pending one of the same kind.
    ///
    /// Must be called from within a tokio runtime.
    pub fn show(
        &self,
        kind: InviteKind,
        from_room_id: String,
        from_user: Participant,
        seat_id: Option<u32>,
    ) -> TimedInvite {
        let invite = TimedInvite {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            from_room_id,
            from_user,
            seat_id,
            expires_in: self.timeout,
        };

        let previous = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            // Spawned under the lock so the timer cannot look before the slot exists.
            let timer = self.spawn_timer(kind, invite.id);
            slots.insert(
                kind,
                Slot {
                    invite: invite.clone(),
                    timer,
                },
            )
        };

        if let Some(previous) = previous {
            previous.timer.abort();
            tracing::info!(
                "{kind:?} invite {} replaced by {}",
                previous.invite.id,
                invite.id
            );
            self.emitter.emit(LinkMicEvent::InviteDismissed {
                kind,
                id: previous.invite.id,
                reason: DismissReason::Replaced,
            });
        }

        tracing::info!(
            "{kind:?} invite {} from {} shown for {:?}",
            invite.id,
            invite.from_user.user_id,
            self.timeout
        );
        self.emitter.emit(LinkMicEvent::InviteReceived(invite.clone()));
        invite
    }

    fn spawn_timer(&self, kind: InviteKind, id: u64) -> tokio::task::JoinHandle<()> {
        let slots = self.slots.clone();
        let emitter = self.emitter.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = {
                let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
                match slots.get(&kind) {
                    Some(slot) if slot.invite.id == id => slots.remove(&kind).is_some(),
                    _ => false,
                }
            };
            if expired {
                tracing::info!("{kind:?} invite {id} expired without a reply");
                emitter.emit(LinkMicEvent::InviteDismissed {
                    kind,
                    id,
                    reason: DismissReason::Expired,
                });
            }
        })
    }

    /// Remove the pending invite of `kind` for answering. Cancels its timer.
    pub fn take(&self, kind: InviteKind) -> Option<TimedInvite> {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind)?;
        slot.timer.abort();
        self.emitter.emit(LinkMicEvent::InviteDismissed {
            kind,
            id: slot.invite.id,
            reason: DismissReason::Answered,
        });
        Some(slot.invite)
    }

    pub fn active(&self, kind: InviteKind) -> Option<TimedInvite> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map(|slot| slot.invite.clone())
    }

    /// Drop every pending invite without replying.
    pub fn dismiss_all(&self) {
        let drained: Vec<Slot> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, slot)| slot)
            .collect();
        for slot in drained {
            slot.timer.abort();
            self.emitter.emit(LinkMicEvent::InviteDismissed {
                kind: slot.invite.kind,
                id: slot.invite.id,
                reason: DismissReason::Discarded,
            });
        }
    }
}

impl Drop for TimedInviteManager {
    fn drop(&mut self) {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        for slot in slots.values() {
            slot.timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participants::{Role, make_participant};
    use crate::testing::EventLog;

    fn manager() -> (TimedInviteManager, Arc<EventLog>) {
        let emitter = EventEmitter::new();
        let log = EventLog::attach(&emitter);
        (TimedInviteManager::new(DEFAULT_INVITE_TIMEOUT, emitter), log)
    }

    fn host(id: &str) -> Participant {
        make_participant(id, id, Role::Host)
    }

    fn dismissals(log: &EventLog) -> Vec<(u64, DismissReason)> {
        log.events()
            .into_iter()
            .filter_map(|e| match e {
                LinkMicEvent::InviteDismissed { id, reason, .. } => Some((id, reason)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn invite_expires_silently() {
        let (mgr, log) = manager();
        let invite = mgr.show(InviteKind::Chat, "r1".into(), host("h1"), Some(1));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(mgr.active(InviteKind::Chat).is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(mgr.active(InviteKind::Chat).is_none());
        assert_eq!(dismissals(&log), vec![(invite.id, DismissReason::Expired)]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_invite_replaces_first() {
        let (mgr, log) = manager();
        let first = mgr.show(InviteKind::Pk, "r1".into(), host("h1"), None);
        tokio::time::sleep(Duration::from_secs(3)).await;
        let second = mgr.show(InviteKind::Pk, "r2".into(), host("h2"), None);

        assert_eq!(mgr.active(InviteKind::Pk).unwrap().id, second.id);
        assert_eq!(dismissals(&log), vec![(first.id, DismissReason::Replaced)]);

        // The first timer was cancelled, so the second gets its full countdown.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(mgr.active(InviteKind::Pk).unwrap().id, second.id);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(mgr.active(InviteKind::Pk).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn kinds_are_independent() {
        let (mgr, _log) = manager();
        mgr.show(InviteKind::Pk, "r1".into(), host("h1"), None);
        mgr.show(InviteKind::Chat, "r2".into(), host("h2"), Some(0));
        assert!(mgr.active(InviteKind::Pk).is_some());
        assert!(mgr.active(InviteKind::Chat).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn take_only_once_and_cancels_timer() {
        let (mgr, log) = manager();
        let invite = mgr.show(InviteKind::Chat, "r1".into(), host("h1"), None);

        assert_eq!(mgr.take(InviteKind::Chat).unwrap().id, invite.id);
        assert!(mgr.take(InviteKind::Chat).is_none());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(dismissals(&log), vec![(invite.id, DismissReason::Answered)]);
    }

    #[tokio::test(start_paused = true)]
    async fn dismiss_all_clears_every_kind() {
        let (mgr, log) = manager();
        mgr.show(InviteKind::Pk, "r1".into(), host("h1"), None);
        mgr.show(InviteKind::Chat, "r2".into(), host("h2"), None);
        mgr.dismiss_all();

        assert!(mgr.active(InviteKind::Pk).is_none());
        assert!(mgr.active(InviteKind::Chat).is_none());
        let reasons: Vec<_> = dismissals(&log).into_iter().map(|(_, r)| r).collect();
        assert_eq!(reasons, vec![DismissReason::Discarded, DismissReason::Discarded]);
    }
}
