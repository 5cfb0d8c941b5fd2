use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::errors::{BusinessCode, CODE_SUCCESS, LinkMicError, TransportError};
use crate::protocol::{Command, RequestEnvelope, ResponseEnvelope, TransportEvent};

/// Request/response half of the connection to the interaction server.
///
/// Pushes and connectivity changes are delivered separately, as
/// [`TransportEvent`](crate::protocol::TransportEvent)s on the channel handed
/// to [`InteractionCoordinator::start`](crate::coordinator::InteractionCoordinator::start).
/// Each `send` resolves exactly once.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: RequestEnvelope) -> Result<ResponseEnvelope, TransportError>;
}

/// Adapt a channel of transport events into the stream taken by
/// [`InteractionCoordinator::start`](crate::coordinator::InteractionCoordinator::start).
pub fn event_stream(
    rx: mpsc::UnboundedReceiver<TransportEvent>,
) -> impl Stream<Item = TransportEvent> + Send + 'static {
    futures_util::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((event, rx))
    })
}

/// Identity stamped on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub app_id: String,
    pub device_id: String,
    pub user_id: String,
    pub user_name: String,
}

/// Typed calls over a [`Transport`].
///
/// Fills the common envelope, bounds each call with a timeout and turns
/// non-success codes into [`LinkMicError::Business`].
#[derive(Clone)]
pub struct TransportGateway {
    transport: Arc<dyn Transport>,
    identity: ClientIdentity,
    timeout: Duration,
}

impl TransportGateway {
    pub fn new(transport: Arc<dyn Transport>, identity: ClientIdentity, timeout: Duration) -> Self {
        Self {
            transport,
            identity,
            timeout,
        }
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn envelope<P: Serialize>(
        &self,
        command: Command,
        room_id: &str,
        payload: &P,
    ) -> Result<RequestEnvelope, LinkMicError> {
        Ok(RequestEnvelope {
            app_id: self.identity.app_id.clone(),
            room_id: room_id.to_string(),
            user_id: self.identity.user_id.clone(),
            event_name: command.as_str().to_string(),
            request_id: uuid::Uuid::new_v4().to_string(),
            device_id: self.identity.device_id.clone(),
            content: serde_json::to_value(payload)?,
        })
    }

    pub async fn call<P, R>(&self, command: Command, room_id: &str, payload: &P) -> Result<R, LinkMicError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let request = self.envelope(command, room_id, payload)?;
        let request_id = request.request_id.clone();
        tracing::debug!("{command} -> room={room_id:?} request_id={request_id}");

        let response = tokio::time::timeout(self.timeout, self.transport.send(request))
            .await
            .map_err(|_| TransportError::Timeout)
            .and_then(|r| r)
            .map_err(|e| {
                tracing::warn!("{command} transport failure: {e}");
                e
            })?;

        if response.code != CODE_SUCCESS {
            let code = BusinessCode::from_code(response.code);
            tracing::info!("{command} rejected: code={code} message={}", response.message);
            return Err(LinkMicError::Business {
                command,
                code,
                message: response.message,
            });
        }

        let data = match response.response {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        };
        Ok(serde_json::from_value(data)?)
    }
}
