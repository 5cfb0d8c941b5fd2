use std::collections::HashMap;

/// Something this client started whose echo will also arrive as a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentKind {
    /// We accepted a seat invitation; the local reply path starts the chat.
    AcceptChatInvite,
    /// We accepted a PK invitation; the local reply path starts the PK.
    AcceptPkInvite,
    /// We ended the PK; the next PK-finished push is ours.
    EndPk,
    /// We changed the peer anchor's mute and already applied it locally.
    MutePeerAnchor { muted: bool },
}

/// Multiset of pending local intents keyed by `(kind, target)`.
///
/// The push handler consults it to tell its own echoes apart from other
/// participants' actions. Counts let rapid repeated actions each match
/// their own echo.
#[derive(Debug, Default)]
pub struct PendingIntents {
    counts: HashMap<(IntentKind, String), u32>,
}

impl PendingIntents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: IntentKind, target: &str) {
        *self.counts.entry((kind, target.to_string())).or_insert(0) += 1;
        tracing::debug!("intent registered: {kind:?} -> {target}");
    }

    pub fn contains(&self, kind: IntentKind, target: &str) -> bool {
        self.counts.contains_key(&(kind, target.to_string()))
    }

    /// Remove one occurrence. Returns whether one was present.
    pub fn consume(&mut self, kind: IntentKind, target: &str) -> bool {
        let key = (kind, target.to_string());
        match self.counts.get_mut(&key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.counts.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Remove every occurrence of `kind` regardless of target.
    pub fn discard_kind(&mut self, kind: IntentKind) {
        self.counts.retain(|(k, _), _| *k != kind);
    }

    pub fn clear(&mut self) {
        if !self.counts.is_empty() {
            tracing::debug!("discarding {} pending intents", self.counts.len());
        }
        self.counts.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
