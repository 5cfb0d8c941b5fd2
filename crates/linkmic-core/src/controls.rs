use std::sync::Arc;
use tokio::sync::Mutex;

use crate::errors::{LinkMicError, ValidationError};
use crate::events::{EventEmitter, LinkMicEvent};
use crate::participants::MediaState;
use crate::protocol::{Ack, Command, MediaStatusRequest};
use crate::session::SessionState;
use crate::transport::TransportGateway;

/// Facade over the RTC engine that captures, publishes and plays media.
///
/// Calls are fire-and-forget and must be idempotent: the coordinator may
/// repeat a call after a resync.
pub trait MediaEngine: Send + Sync {
    /// Start publishing local media with the given mic/camera state.
    fn start_capture(&self, mic: MediaState, camera: MediaState);
    fn stop_capture(&self);
    fn set_microphone(&self, state: MediaState);
    fn set_camera(&self, state: MediaState);
    /// Forward the local host's stream into a peer room for PK.
    fn start_forward(&self, peer_room_id: &str, token: &str);
    fn stop_forward(&self);
    fn mute_remote_audio(&self, user_id: &str, muted: bool);
}

/// Engine that does nothing, for headless use.
#[derive(Debug, Default)]
pub struct NoopMediaEngine;

impl MediaEngine for NoopMediaEngine {
    fn start_capture(&self, _mic: MediaState, _camera: MediaState) {}
    fn stop_capture(&self) {}
    fn set_microphone(&self, _state: MediaState) {}
    fn set_camera(&self, _state: MediaState) {}
    fn start_forward(&self, _peer_room_id: &str, _token: &str) {}
    fn stop_forward(&self) {}
    fn mute_remote_audio(&self, _user_id: &str, _muted: bool) {}
}

/// Engine call decided under the session lock and run after it is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaAction {
    StartCapture { mic: MediaState, camera: MediaState },
    StopCapture,
    SetMicrophone(MediaState),
    SetCamera(MediaState),
    StartForward { peer_room_id: String, token: String },
    StopForward,
    MuteRemoteAudio { user_id: String, muted: bool },
}

impl MediaAction {
    pub fn apply(&self, engine: &dyn MediaEngine) {
        tracing::debug!("media: {self:?}");
        match self {
            MediaAction::StartCapture { mic, camera } => engine.start_capture(*mic, *camera),
            MediaAction::StopCapture => engine.stop_capture(),
            MediaAction::SetMicrophone(state) => engine.set_microphone(*state),
            MediaAction::SetCamera(state) => engine.set_camera(*state),
            MediaAction::StartForward {
                peer_room_id,
                token,
            } => engine.start_forward(peer_room_id, token),
            MediaAction::StopForward => engine.stop_forward(),
            MediaAction::MuteRemoteAudio { user_id, muted } => {
                engine.mute_remote_audio(user_id, *muted)
            }
        }
    }
}

/// What the engine should be doing for `state` as a whole. Used after a
/// snapshot is installed.
pub fn media_for(state: &SessionState) -> Vec<MediaAction> {
    let mut actions = Vec::new();
    let Some(me) = state.self_user() else {
        return vec![MediaAction::StopForward, MediaAction::StopCapture];
    };
    let publishing = state.self_is_host() || state.seat_of(&me.user_id).is_some();
    if publishing {
        actions.push(MediaAction::StartCapture {
            mic: me.mic,
            camera: me.camera,
        });
    } else {
        actions.push(MediaAction::StopCapture);
    }
    if state.self_is_host() {
        match state.anchor() {
            Some(link) => {
                actions.push(MediaAction::StartForward {
                    peer_room_id: link.peer_room_id.clone(),
                    token: link.forward_token.clone(),
                });
                if link.muted_by_self {
                    actions.push(MediaAction::MuteRemoteAudio {
                        user_id: link.peer_user_id.clone(),
                        muted: true,
                    });
                }
            }
            None => actions.push(MediaAction::StopForward),
        }
    }
    actions
}

/// Local microphone and camera toggles for the host or a seated guest.
///
/// The server is told first; the engine and the model change only once it
/// accepted.
pub struct MediaControls {
    session: Arc<Mutex<SessionState>>,
    gateway: TransportGateway,
    engine: Arc<dyn MediaEngine>,
    emitter: EventEmitter,
}

impl MediaControls {
    pub fn new(
        session: Arc<Mutex<SessionState>>,
        gateway: TransportGateway,
        engine: Arc<dyn MediaEngine>,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            session,
            gateway,
            engine,
            emitter,
        }
    }

    pub async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), LinkMicError> {
        let (_, camera) = self.current().await?;
        self.set_media(MediaState::from(enabled), camera).await
    }

    pub async fn set_camera_enabled(&self, enabled: bool) -> Result<(), LinkMicError> {
        let (mic, _) = self.current().await?;
        self.set_media(mic, MediaState::from(enabled)).await
    }

    pub async fn is_microphone_enabled(&self) -> bool {
        self.current().await.is_ok_and(|(mic, _)| mic.is_on())
    }

    pub async fn is_camera_enabled(&self) -> bool {
        self.current().await.is_ok_and(|(_, camera)| camera.is_on())
    }

    async fn current(&self) -> Result<(MediaState, MediaState), LinkMicError> {
        let session = self.session.lock().await;
        let me = session.self_user().ok_or(LinkMicError::NoSession)?;
        Ok((me.mic, me.camera))
    }

    async fn set_media(&self, mic: MediaState, camera: MediaState) -> Result<(), LinkMicError> {
        let (room_id, generation) = {
            let session = self.session.lock().await;
            let room_id = session.room_id().ok_or(LinkMicError::NoSession)?.to_string();
            let me = session.self_user_id().unwrap_or_default();
            if !session.self_is_host() && session.seat_of(me).is_none() {
                return Err(ValidationError::NotInteracting.into());
            }
            (room_id, session.generation())
        };

        report_media(&self.gateway, &room_id, mic, camera).await?;

        let user_id = {
            let mut session = self.session.lock().await;
            if session.generation() != generation {
                tracing::debug!("media change finished after the session was replaced");
                return Ok(());
            }
            let user_id = session
                .self_user_id()
                .ok_or(LinkMicError::NoSession)?
                .to_string();
            session.update_media(&user_id, mic, camera)?;
            user_id
        };

        self.engine.set_microphone(mic);
        self.engine.set_camera(camera);
        tracing::info!("local media: mic={mic:?} camera={camera:?}");
        self.emitter.emit(LinkMicEvent::MediaChanged {
            user_id,
            mic,
            camera,
        });
        Ok(())
    }
}

/// Tell the server our current mic/camera state.
pub(crate) async fn report_media(
    gateway: &TransportGateway,
    room_id: &str,
    mic: MediaState,
    camera: MediaState,
) -> Result<(), LinkMicError> {
    let _: Ack = gateway
        .call(
            Command::UpdateMediaStatus,
            room_id,
            &MediaStatusRequest { mic, camera },
        )
        .await?;
    Ok(())
}
