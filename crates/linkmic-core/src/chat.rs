use std::sync::Arc;
use tokio::sync::Mutex;

use crate::errors::{LinkMicError, ValidationError};
use crate::events::{ChatMessage, EventEmitter, LinkMicEvent};
use crate::protocol::{Ack, Command, SendMessageRequest};
use crate::session::SessionState;
use crate::transport::TransportGateway;

/// Messages of the current session, shared between the coordinator's push
/// handling and [`ChatService`].
pub type MessageStore = Arc<Mutex<Vec<ChatMessage>>>;

/// Room chat over the interaction server.
pub struct ChatService {
    session: Arc<Mutex<SessionState>>,
    gateway: TransportGateway,
    emitter: EventEmitter,
    messages: MessageStore,
}

impl ChatService {
    pub fn new(
        session: Arc<Mutex<SessionState>>,
        gateway: TransportGateway,
        emitter: EventEmitter,
        messages: MessageStore,
    ) -> Self {
        Self {
            session,
            gateway,
            emitter,
            messages,
        }
    }

    /// Send a message to the room. The server does not echo it back to us,
    /// so it is stored and announced here once accepted.
    pub async fn send_message(&self, text: &str) -> Result<ChatMessage, LinkMicError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }

        let (room_id, generation) = {
            let session = self.session.lock().await;
            let room_id = session.room_id().ok_or(LinkMicError::NoSession)?.to_string();
            (room_id, session.generation())
        };

        let _: Ack = self
            .gateway
            .call(
                Command::SendMessage,
                &room_id,
                &SendMessageRequest { message: text },
            )
            .await?;

        let identity = self.gateway.identity();
        let msg = ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: identity.user_id.clone(),
            sender_name: identity.user_name.clone(),
            text: text.to_string(),
            timestamp_ms: now_ms(),
        };

        if self.session.lock().await.generation() != generation {
            tracing::debug!("chat message sent after the session changed, not stored");
            return Ok(msg);
        }
        self.messages.lock().await.push(msg.clone());
        self.emitter.emit(LinkMicEvent::ChatMessageReceived(msg.clone()));
        Ok(msg)
    }

    /// All messages of the current session, oldest first.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().await.clone()
    }
}

pub(crate) fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
