//! In-memory transport, media engine and event recorder for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::oneshot;

use crate::controls::{MediaAction, MediaEngine};
use crate::coordinator::{CoordinatorConfig, InteractionCoordinator};
use crate::errors::TransportError;
use crate::events::{EventEmitter, LinkMicEvent, LinkMicEventListener, Subscription};
use crate::participants::MediaState;
use crate::protocol::{
    Command, Connectivity, RawPush, RequestEnvelope, ResponseEnvelope, TransportEvent,
};
use crate::session::SessionSnapshot;
use crate::transport::{ClientIdentity, TransportGateway};

enum Reply {
    Respond(Value),
    Fail(i32, String),
    Hang,
    Gated(oneshot::Receiver<Value>),
}

/// Transport answering from a per-command script. Unscripted commands
/// succeed with an empty object.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<HashMap<String, VecDeque<Reply>>>,
    sent: Mutex<Vec<RequestEnvelope>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, command: Command, reply: Reply) {
        self.script
            .lock()
            .unwrap()
            .entry(command.as_str().to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn respond(&self, command: Command, response: Value) {
        self.push(command, Reply::Respond(response));
    }

    pub fn fail(&self, command: Command, code: i32, message: &str) {
        self.push(command, Reply::Fail(code, message.to_string()));
    }

    /// The next `command` never resolves.
    pub fn hang(&self, command: Command) {
        self.push(command, Reply::Hang);
    }

    /// The next `command` resolves with whatever is sent on the returned
    /// channel.
    pub fn gate(&self, command: Command) -> oneshot::Sender<Value> {
        let (tx, rx) = oneshot::channel();
        self.push(command, Reply::Gated(rx));
        tx
    }

    pub fn sent(&self) -> Vec<RequestEnvelope> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_for(&self, command: Command) -> Vec<RequestEnvelope> {
        self.sent()
            .into_iter()
            .filter(|r| r.event_name == command.as_str())
            .collect()
    }
}

fn ok(request_id: String, response: Value) -> ResponseEnvelope {
    ResponseEnvelope {
        code: crate::errors::CODE_SUCCESS,
        message: String::new(),
        request_id,
        response,
    }
}

#[async_trait]
impl crate::transport::Transport for ScriptedTransport {
    async fn send(&self, request: RequestEnvelope) -> Result<ResponseEnvelope, TransportError> {
        let request_id = request.request_id.clone();
        let reply = self
            .script
            .lock()
            .unwrap()
            .get_mut(&request.event_name)
            .and_then(|queue| queue.pop_front());
        self.sent.lock().unwrap().push(request);

        match reply {
            None => Ok(ok(request_id, json!({}))),
            Some(Reply::Respond(value)) => Ok(ok(request_id, value)),
            Some(Reply::Fail(code, message)) => Ok(ResponseEnvelope {
                code,
                message,
                request_id,
                response: Value::Null,
            }),
            Some(Reply::Hang) => std::future::pending().await,
            Some(Reply::Gated(rx)) => match rx.await {
                Ok(value) => Ok(ok(request_id, value)),
                Err(_) => Err(TransportError::Closed),
            },
        }
    }
}

/// Media engine that records every call.
#[derive(Default)]
pub struct RecordingEngine {
    calls: Mutex<Vec<MediaAction>>,
}

impl RecordingEngine {
    pub fn calls(&self) -> Vec<MediaAction> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, action: MediaAction) {
        self.calls.lock().unwrap().push(action);
    }
}

impl MediaEngine for RecordingEngine {
    fn start_capture(&self, mic: MediaState, camera: MediaState) {
        self.record(MediaAction::StartCapture { mic, camera });
    }
    fn stop_capture(&self) {
        self.record(MediaAction::StopCapture);
    }
    fn set_microphone(&self, state: MediaState) {
        self.record(MediaAction::SetMicrophone(state));
    }
    fn set_camera(&self, state: MediaState) {
        self.record(MediaAction::SetCamera(state));
    }
    fn start_forward(&self, peer_room_id: &str, token: &str) {
        self.record(MediaAction::StartForward {
            peer_room_id: peer_room_id.to_string(),
            token: token.to_string(),
        });
    }
    fn stop_forward(&self) {
        self.record(MediaAction::StopForward);
    }
    fn mute_remote_audio(&self, user_id: &str, muted: bool) {
        self.record(MediaAction::MuteRemoteAudio {
            user_id: user_id.to_string(),
            muted,
        });
    }
}

/// Listener that keeps every event it sees.
pub struct EventLog {
    events: Mutex<Vec<LinkMicEvent>>,
    subscription: Mutex<Option<Subscription>>,
}

impl EventLog {
    pub fn attach(emitter: &EventEmitter) -> Arc<EventLog> {
        let log = Arc::new(EventLog {
            events: Mutex::new(Vec::new()),
            subscription: Mutex::new(None),
        });
        let subscription = emitter.add_listener(log.clone());
        *log.subscription.lock().unwrap() = Some(subscription);
        log
    }

    pub fn events(&self) -> Vec<LinkMicEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn count(&self, pred: impl Fn(&LinkMicEvent) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl LinkMicEventListener for EventLog {
    fn on_event(&self, event: LinkMicEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// A coordinator wired to a scripted transport and a recording engine,
/// already inside a room.
pub struct Harness {
    pub coordinator: Arc<InteractionCoordinator>,
    pub transport: Arc<ScriptedTransport>,
    pub engine: Arc<RecordingEngine>,
    pub log: Arc<EventLog>,
}

impl Harness {
    pub fn detached(user_id: &str) -> Harness {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = Arc::new(RecordingEngine::default());
        let gateway = TransportGateway::new(
            transport.clone(),
            ClientIdentity {
                app_id: "app".into(),
                device_id: "device".into(),
                user_id: user_id.into(),
                user_name: user_id.into(),
            },
            std::time::Duration::from_secs(10),
        );
        let coordinator = Arc::new(InteractionCoordinator::new(
            gateway,
            engine.clone(),
            CoordinatorConfig::default(),
        ));
        let log = EventLog::attach(coordinator.emitter());
        Harness {
            coordinator,
            transport,
            engine,
            log,
        }
    }

    /// Enter `snapshot` through join (audience) or create (host), then
    /// forget the calls and events it produced.
    pub async fn with_snapshot(snapshot: SessionSnapshot) -> Harness {
        let h = Harness::detached(&snapshot.self_user.user_id);
        let is_host = snapshot.self_user.user_id == snapshot.host.user_id;
        let mut snapshot = snapshot;
        if is_host {
            snapshot.host.mic = MediaState::from(CoordinatorConfig::default().mic_enabled_on_join);
            snapshot.host.camera =
                MediaState::from(CoordinatorConfig::default().camera_enabled_on_join);
            snapshot.self_user = snapshot.host.clone();
            h.transport
                .respond(Command::CreateLive, serde_json::to_value(&snapshot).unwrap());
            h.coordinator.create_live("Evening show").await.unwrap();
        } else {
            h.transport
                .respond(Command::JoinLiveRoom, serde_json::to_value(&snapshot).unwrap());
            h.coordinator
                .join_live_room(&snapshot.room.room_id)
                .await
                .unwrap();
        }
        h.reset();
        h
    }

    /// Host `host` with four free seats.
    pub async fn host() -> Harness {
        Harness::with_snapshot(crate::session::make_snapshot("host", "host", 4)).await
    }

    /// Audience `me` in the room of `host`, four free seats.
    pub async fn audience() -> Harness {
        Harness::with_snapshot(crate::session::make_snapshot("me", "host", 4)).await
    }

    pub fn reset(&self) {
        self.engine.clear();
        self.log.clear();
    }

    pub async fn push(&self, event: &str, data: Value) {
        self.coordinator
            .handle_transport_event(TransportEvent::Push(RawPush {
                event: event.to_string(),
                data,
            }))
            .await;
    }

    pub async fn connectivity(&self, change: Connectivity) {
        self.coordinator
            .handle_transport_event(TransportEvent::Connectivity(change))
            .await;
    }
}
