use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::chat::{ChatService, MessageStore};
use crate::controls::{MediaAction, MediaControls, MediaEngine, media_for, report_media};
use crate::errors::{LinkMicError, ValidationError};
use crate::events::{
    ConnectionState, EventEmitter, LinkMicEvent, LinkMicEventListener, Subscription,
    TerminationReason,
};
use crate::intents::PendingIntents;
use crate::invites::{DEFAULT_INVITE_TIMEOUT, InviteKind, TimedInvite, TimedInviteManager};
use crate::participants::{MediaState, Participant};
use crate::protocol::{
    Ack, AnchorListResponse, AnchorSummary, AudienceListResponse, Command, Connectivity,
    CreateLiveRequest, Empty, JoinRequest, Push, RawPush, ReconnectResponse, RoomListResponse,
    RoomSummary, SnapshotResponse, TargetRequest, TransportEvent,
};
use crate::push::{self, Effects};
use crate::session::{SessionPhase, SessionSnapshot, SessionState, SessionView};
use crate::transport::TransportGateway;

/// Runtime knobs of the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub invite_timeout: Duration,
    /// Initial media of a host going live.
    pub mic_enabled_on_join: bool,
    pub camera_enabled_on_join: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            invite_timeout: DEFAULT_INVITE_TIMEOUT,
            mic_enabled_on_join: true,
            camera_enabled_on_join: true,
        }
    }
}

type InFlight = Arc<StdMutex<HashSet<(Command, String)>>>;

/// Marks one action as outstanding until dropped.
pub(crate) struct InFlightGuard {
    set: InFlight,
    key: (Command, String),
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Single writer of the session: turns UI commands, server pushes and
/// connectivity changes into one consistent model and a stream of
/// [`LinkMicEvent`]s.
///
/// Lock order is session first, then pending intents. Neither is held
/// across a transport call.
pub struct InteractionCoordinator {
    pub(crate) gateway: TransportGateway,
    pub(crate) engine: Arc<dyn MediaEngine>,
    pub(crate) session: Arc<Mutex<SessionState>>,
    pub(crate) intents: StdMutex<PendingIntents>,
    pub(crate) emitter: EventEmitter,
    pub(crate) invites: TimedInviteManager,
    messages: MessageStore,
    in_flight: InFlight,
    connection_state: Mutex<ConnectionState>,
    config: CoordinatorConfig,
    event_task: StdMutex<Option<JoinHandle<()>>>,
}

impl InteractionCoordinator {
    pub fn new(
        gateway: TransportGateway,
        engine: Arc<dyn MediaEngine>,
        config: CoordinatorConfig,
    ) -> Self {
        let emitter = EventEmitter::new();
        Self {
            gateway,
            engine,
            session: Arc::new(Mutex::new(SessionState::new())),
            intents: StdMutex::new(PendingIntents::new()),
            invites: TimedInviteManager::new(config.invite_timeout, emitter.clone()),
            emitter,
            messages: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(StdMutex::new(HashSet::new())),
            connection_state: Mutex::new(ConnectionState::Connected),
            config,
            event_task: StdMutex::new(None),
        }
    }

    /// Consume pushes and connectivity changes from the transport, in
    /// arrival order, on a spawned task. Replaces any previous stream.
    pub fn start<S>(self: &Arc<Self>, events: S)
    where
        S: Stream<Item = TransportEvent> + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut events = std::pin::pin!(events);
            while let Some(event) = events.next().await {
                let Some(coordinator) = weak.upgrade() else {
                    break;
                };
                coordinator.handle_transport_event(event).await;
            }
            tracing::debug!("transport event stream ended");
        });
        let previous = self
            .event_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn LinkMicEventListener>) -> Subscription {
        self.emitter.add_listener(listener)
    }

    pub(crate) fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub fn controls(&self) -> MediaControls {
        MediaControls::new(
            self.session.clone(),
            self.gateway.clone(),
            self.engine.clone(),
            self.emitter.clone(),
        )
    }

    pub fn chat(&self) -> ChatService {
        ChatService::new(
            self.session.clone(),
            self.gateway.clone(),
            self.emitter.clone(),
            self.messages.clone(),
        )
    }

    /// Owned snapshot of the session, `None` outside a room.
    pub async fn view(&self) -> Option<SessionView> {
        self.session.lock().await.view()
    }

    pub async fn phase(&self) -> Option<SessionPhase> {
        self.session.lock().await.phase()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.connection_state.lock().await
    }

    /// Whether `command` on `target` is outstanding. Targets are user ids
    /// for per-user actions, seat indexes for seat actions, empty otherwise.
    pub fn is_action_pending(&self, command: Command, target: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(command, target.to_string()))
    }

    /// The invitation currently shown for `kind`, if any.
    pub fn active_invite(&self, kind: InviteKind) -> Option<TimedInvite> {
        self.invites.active(kind)
    }

    pub(crate) fn begin(
        &self,
        command: Command,
        target: &str,
    ) -> Result<InFlightGuard, LinkMicError> {
        let key = (command, target.to_string());
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(key.clone()) {
            return Err(ValidationError::ActionInProgress(command).into());
        }
        Ok(InFlightGuard {
            set: self.in_flight.clone(),
            key,
        })
    }

    pub(crate) fn lock_intents(&self) -> MutexGuard<'_, PendingIntents> {
        self.intents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Room id and generation of the active session.
    pub(crate) async fn current_room(&self) -> Result<(String, u64), LinkMicError> {
        let session = self.session.lock().await;
        let room_id = session.room_id().ok_or(LinkMicError::NoSession)?;
        Ok((room_id.to_string(), session.generation()))
    }

    /// Carry out what was decided under the session lock.
    pub(crate) async fn flush(&self, fx: Effects) {
        if fx.dismiss_invites {
            self.invites.dismiss_all();
        }
        if fx.clear_messages {
            self.messages.lock().await.clear();
        }
        self.apply_media(&fx.media);
        if !fx.messages.is_empty() {
            self.messages.lock().await.extend(fx.messages);
        }
        for event in fx.events {
            self.emitter.emit(event);
        }
        for offer in fx.invites {
            self.invites
                .show(offer.kind, offer.room_id, offer.from, offer.seat_id);
        }
        if let Some((room_id, mic, camera)) = fx.report_media {
            if let Err(e) = report_media(&self.gateway, &room_id, mic, camera).await {
                tracing::warn!("failed to report media state: {e}");
            }
        }
    }

    // ── Transport events ────────────────────────────────────────────

    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Push(raw) => self.handle_push(raw).await,
            TransportEvent::Connectivity(change) => self.handle_connectivity(change).await,
        }
    }

    async fn handle_push(&self, raw: RawPush) {
        let name = raw.event.clone();
        let push = match Push::decode(raw) {
            Ok(Some(push)) => push,
            Ok(None) => {
                tracing::debug!("ignoring unknown push {name}");
                return;
            }
            Err(e) => {
                tracing::warn!("malformed push {name}: {e}");
                return;
            }
        };
        tracing::debug!("push {name}");

        let mut fx = Effects::default();
        {
            let mut session = self.session.lock().await;
            let mut intents = self.lock_intents();
            push::apply_push(&mut session, &mut intents, push, &mut fx);
        }
        self.flush(fx).await;
    }

    async fn handle_connectivity(&self, change: Connectivity) {
        match change {
            Connectivity::Connected => self.set_connection_state(ConnectionState::Connected).await,
            Connectivity::Disconnected => {
                tracing::warn!("transport disconnected");
                self.set_connection_state(ConnectionState::Disconnected).await;
            }
            Connectivity::Reconnected => {
                tracing::info!("transport reconnected, resyncing");
                if let Err(e) = self.resync().await {
                    tracing::warn!("resync failed: {e}");
                }
            }
        }
    }

    async fn set_connection_state(&self, state: ConnectionState) {
        let mut current = self.connection_state.lock().await;
        if *current != state {
            *current = state;
            self.emitter.emit(LinkMicEvent::ConnectionStateChanged(state));
        }
    }

    /// Replace the session with the server's view of it.
    ///
    /// Invite dialogs and pending intents are discarded first. If the server
    /// no longer knows our room the session is terminated.
    pub async fn resync(&self) -> Result<(), LinkMicError> {
        self.set_connection_state(ConnectionState::Resyncing).await;
        self.invites.dismiss_all();
        self.lock_intents().clear();

        let (room_id, generation) = {
            let session = self.session.lock().await;
            (
                session.room_id().unwrap_or_default().to_string(),
                session.generation(),
            )
        };
        let result: Result<ReconnectResponse, LinkMicError> = self
            .gateway
            .call(Command::Reconnect, &room_id, &Empty {})
            .await;

        let mut fx = Effects::default();
        let outcome = {
            let mut session = self.session.lock().await;
            let mut intents = self.lock_intents();
            intents.clear();
            if session.generation() != generation {
                tracing::info!("session changed during resync, result dropped");
                Ok(())
            } else {
                match result {
                    Ok(ReconnectResponse {
                        session: Some(snapshot),
                    }) => match session.replace_all(snapshot) {
                        Ok(()) => {
                            tracing::info!("resynced room {:?}", session.room_id());
                            fx.media.extend(media_for(&session));
                            fx.events.extend(session.view().map(LinkMicEvent::SessionResynced));
                            Ok(())
                        }
                        Err(e) => Err(e),
                    },
                    Ok(ReconnectResponse { session: None }) => {
                        if session.is_active() {
                            tracing::info!("room {room_id} is gone");
                            push::teardown(
                                &mut session,
                                &mut intents,
                                Some(TerminationReason::RoomGone),
                                &mut fx,
                            );
                        }
                        Ok(())
                    }
                    Err(e) if e.business_code().is_some_and(|c| c.is_room_gone()) => {
                        if session.is_active() {
                            tracing::info!("room {room_id} is gone ({e})");
                            push::teardown(
                                &mut session,
                                &mut intents,
                                Some(TerminationReason::RoomGone),
                                &mut fx,
                            );
                        }
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        };

        let state = if outcome.is_ok() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        self.set_connection_state(state).await;
        self.flush(fx).await;
        outcome
    }

    // ── Room lifecycle ──────────────────────────────────────────────

    /// Open a new live room with us as host.
    pub async fn create_live(&self, room_name: &str) -> Result<SessionView, LinkMicError> {
        let _guard = self.begin(Command::CreateLive, "")?;
        if self.session.lock().await.is_active() {
            return Err(ValidationError::AlreadyInRoom.into());
        }
        let user_name = self.gateway.identity().user_name.clone();
        let snapshot: SnapshotResponse = self
            .gateway
            .call(
                Command::CreateLive,
                "",
                &CreateLiveRequest {
                    user_name: &user_name,
                    room_name,
                },
            )
            .await?;

        let mic = MediaState::from(self.config.mic_enabled_on_join);
        let camera = MediaState::from(self.config.camera_enabled_on_join);
        let reported = (snapshot.host.mic, snapshot.host.camera);
        let view = self.install(snapshot, |session| {
            let me = session.self_user_id().unwrap_or_default().to_string();
            session.update_media(&me, mic, camera)?;
            Ok(())
        })
        .await?;

        if reported != (mic, camera) {
            if let Err(e) = report_media(&self.gateway, &view.room.room_id, mic, camera).await {
                tracing::warn!("failed to report initial media state: {e}");
            }
        }
        Ok(view)
    }

    /// Join an existing live room as audience.
    pub async fn join_live_room(&self, room_id: &str) -> Result<SessionView, LinkMicError> {
        let _guard = self.begin(Command::JoinLiveRoom, room_id)?;
        if self.session.lock().await.is_active() {
            return Err(ValidationError::AlreadyInRoom.into());
        }
        let user_name = self.gateway.identity().user_name.clone();
        let snapshot: SnapshotResponse = self
            .gateway
            .call(
                Command::JoinLiveRoom,
                room_id,
                &JoinRequest {
                    user_name: &user_name,
                },
            )
            .await?;
        self.install(snapshot, |_| Ok(())).await
    }

    async fn install(
        &self,
        snapshot: SessionSnapshot,
        adjust: impl FnOnce(&mut SessionState) -> Result<(), LinkMicError>,
    ) -> Result<SessionView, LinkMicError> {
        let (view, media) = {
            let mut session = self.session.lock().await;
            session.replace_all(snapshot)?;
            adjust(&mut session)?;
            self.lock_intents().clear();
            let view = session.view().ok_or(LinkMicError::NoSession)?;
            (view, media_for(&session))
        };
        self.invites.dismiss_all();
        self.messages.lock().await.clear();
        self.apply_media(&media);
        tracing::info!(
            "entered room {} as {}",
            view.room.room_id,
            if view.self_user.is_host() { "host" } else { "audience" }
        );
        self.emitter.emit(LinkMicEvent::SessionStarted(view.clone()));
        Ok(view)
    }

    /// Leave the room as audience.
    pub async fn leave_live_room(&self) -> Result<(), LinkMicError> {
        let _guard = self.begin(Command::LeaveLiveRoom, "")?;
        let (room_id, generation) = self.current_room().await?;
        if self.session.lock().await.self_is_host() {
            return Err(ValidationError::NotAudience.into());
        }
        let result: Result<Ack, LinkMicError> = self
            .gateway
            .call(Command::LeaveLiveRoom, &room_id, &Empty {})
            .await;
        self.end_after(result, generation).await
    }

    /// End the live as host.
    pub async fn finish_live(&self) -> Result<(), LinkMicError> {
        let _guard = self.begin(Command::FinishLive, "")?;
        let (room_id, generation) = self.current_room().await?;
        if !self.session.lock().await.self_is_host() {
            return Err(ValidationError::NotHost.into());
        }
        let result: Result<Ack, LinkMicError> = self
            .gateway
            .call(Command::FinishLive, &room_id, &Empty {})
            .await;
        self.end_after(result, generation).await
    }

    /// Close the session once the server let us go. A room that no longer
    /// exists counts as left.
    async fn end_after(
        &self,
        result: Result<Ack, LinkMicError>,
        generation: u64,
    ) -> Result<(), LinkMicError> {
        match result {
            Ok(_) => {}
            Err(e) if e.business_code().is_some_and(|c| c.is_room_gone()) => {
                tracing::info!("room already gone: {e}");
            }
            Err(e) => return Err(e),
        }
        let mut fx = Effects::default();
        {
            let mut session = self.session.lock().await;
            if session.generation() != generation {
                return Ok(());
            }
            let mut intents = self.lock_intents();
            push::teardown(&mut session, &mut intents, None, &mut fx);
        }
        tracing::info!("left the room");
        self.flush(fx).await;
        Ok(())
    }

    /// Release everything locally without notifying the server, and stop
    /// consuming transport events.
    pub async fn destroy(&self) {
        if let Some(task) = self
            .event_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        let mut fx = Effects::default();
        {
            let mut session = self.session.lock().await;
            if session.is_active() {
                let mut intents = self.lock_intents();
                push::teardown(&mut session, &mut intents, None, &mut fx);
            }
        }
        self.invites.dismiss_all();
        self.flush(fx).await;
        tracing::info!("coordinator destroyed");
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn get_active_room_list(&self) -> Result<Vec<RoomSummary>, LinkMicError> {
        let resp: RoomListResponse = self
            .gateway
            .call(Command::GetActiveLiveRoomList, "", &Empty {})
            .await?;
        Ok(resp.rooms)
    }

    pub async fn get_audience_list(&self) -> Result<Vec<Participant>, LinkMicError> {
        let (room_id, _) = self.current_room().await?;
        let resp: AudienceListResponse = self
            .gateway
            .call(Command::GetAudienceList, &room_id, &Empty {})
            .await?;
        Ok(resp.audiences)
    }

    /// Audience members waiting for approval. Also refreshes the local
    /// applicant set.
    pub async fn get_apply_audience_list(&self) -> Result<Vec<Participant>, LinkMicError> {
        let (room_id, generation) = self.host_room().await?;
        let resp: AudienceListResponse = self
            .gateway
            .call(Command::GetApplyAudienceList, &room_id, &Empty {})
            .await?;
        let mut session = self.session.lock().await;
        if session.generation() == generation {
            let ids = resp.audiences.iter().map(|p| p.user_id.clone()).collect();
            session.set_applicants(ids)?;
        }
        Ok(resp.audiences)
    }

    /// Other hosts that could be invited to PK.
    pub async fn get_anchor_list(&self) -> Result<Vec<AnchorSummary>, LinkMicError> {
        let (room_id, _) = self.host_room().await?;
        let resp: AnchorListResponse = self
            .gateway
            .call(Command::GetAnchorList, &room_id, &Empty {})
            .await?;
        Ok(resp.anchors)
    }

    /// Remove `user_id` from the room. The server confirms with a
    /// user-cleared push.
    pub async fn clear_user(&self, user_id: &str) -> Result<(), LinkMicError> {
        let _guard = self.begin(Command::ClearUser, user_id)?;
        let (room_id, _) = self.host_room().await?;
        let _: Ack = self
            .gateway
            .call(Command::ClearUser, &room_id, &TargetRequest { user_id })
            .await?;
        Ok(())
    }

    /// Room id and generation, requiring us to be the host.
    pub(crate) async fn host_room(&self) -> Result<(String, u64), LinkMicError> {
        let session = self.session.lock().await;
        let room_id = session.room_id().ok_or(LinkMicError::NoSession)?;
        if !session.self_is_host() {
            return Err(ValidationError::NotHost.into());
        }
        Ok((room_id.to_string(), session.generation()))
    }

    pub(crate) fn apply_media(&self, actions: &[MediaAction]) {
        for action in actions {
            action.apply(self.engine.as_ref());
        }
    }
}

impl Drop for InteractionCoordinator {
    fn drop(&mut self) {
        if let Some(task) = self
            .event_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participants::{InteractStatus, Role, make_participant};
    use crate::protocol::events;
    use crate::seats::{SeatInfo, SeatLock};
    use crate::session::{RoomStatus, make_snapshot};
    use crate::testing::Harness;
    use serde_json::json;

    #[tokio::test]
    async fn create_live_starts_host_capture() {
        let h = Harness::detached("host");
        h.transport.respond(
            Command::CreateLive,
            serde_json::to_value(make_snapshot("host", "host", 4)).unwrap(),
        );

        let view = h.coordinator.create_live("Evening show").await.unwrap();

        assert!(view.self_user.is_host());
        assert_eq!(h.coordinator.phase().await, Some(SessionPhase::HostLive));
        assert!(h.engine.calls().contains(&MediaAction::StartCapture {
            mic: MediaState::On,
            camera: MediaState::On,
        }));
        assert!(matches!(h.log.events()[0], LinkMicEvent::SessionStarted(_)));
        let sent = h.transport.sent_for(Command::CreateLive);
        assert_eq!(sent[0].room_id, "");
        assert_eq!(sent[0].content["room_name"], "Evening show");
    }

    #[tokio::test]
    async fn cannot_join_twice() {
        let h = Harness::audience().await;
        let err = h.coordinator.join_live_room("room-2").await.unwrap_err();
        assert!(matches!(
            err,
            LinkMicError::Validation(ValidationError::AlreadyInRoom)
        ));
    }

    #[tokio::test]
    async fn leave_clears_session_and_invites() {
        let h = Harness::audience().await;
        h.push(
            events::INVITE_RECEIVED,
            json!({"room_id": "room-1", "host": {"user_id": "host", "role": "host"}, "seat_id": 1}),
        )
        .await;
        assert!(h.coordinator.active_invite(InviteKind::Chat).is_some());

        h.coordinator.leave_live_room().await.unwrap();

        assert!(h.coordinator.view().await.is_none());
        assert!(h.coordinator.active_invite(InviteKind::Chat).is_none());
        assert!(h.log.events().contains(&LinkMicEvent::SessionEnded));
        // The invite was never answered.
        assert!(h.transport.sent_for(Command::ReplyInvite).is_empty());
    }

    #[tokio::test]
    async fn failed_leave_keeps_session() {
        let h = Harness::audience().await;
        h.transport.fail(Command::LeaveLiveRoom, 500, "busy");
        assert!(h.coordinator.leave_live_room().await.is_err());
        assert!(h.coordinator.view().await.is_some());
    }

    #[tokio::test]
    async fn leaving_a_closed_room_still_leaves() {
        let h = Harness::audience().await;
        h.transport.fail(Command::LeaveLiveRoom, 419, "closed");
        h.coordinator.leave_live_room().await.unwrap();
        assert!(h.coordinator.view().await.is_none());
    }

    #[tokio::test]
    async fn host_cannot_leave_only_finish() {
        let h = Harness::host().await;
        assert!(h.coordinator.leave_live_room().await.is_err());
        h.coordinator.finish_live().await.unwrap();
        assert!(h.coordinator.view().await.is_none());
        assert!(h.engine.calls().contains(&MediaAction::StopCapture));
    }

    #[tokio::test]
    async fn destroy_releases_locally_only() {
        let h = Harness::host().await;
        h.coordinator.destroy().await;

        assert!(h.coordinator.view().await.is_none());
        assert!(h.log.events().contains(&LinkMicEvent::SessionEnded));
        assert_eq!(
            h.engine.calls(),
            vec![MediaAction::StopForward, MediaAction::StopCapture]
        );
        assert!(h.transport.sent_for(Command::FinishLive).is_empty());
    }

    #[tokio::test]
    async fn second_identical_action_is_rejected_while_first_runs() {
        let h = Harness::host().await;
        let _guard = h.coordinator.begin(Command::ClearUser, "u1").unwrap();
        assert!(h.coordinator.is_action_pending(Command::ClearUser, "u1"));
        assert!(!h.coordinator.is_action_pending(Command::ClearUser, "u2"));
        let err = h.coordinator.clear_user("u1").await.unwrap_err();
        assert!(matches!(
            err,
            LinkMicError::Validation(ValidationError::ActionInProgress(Command::ClearUser))
        ));
        h.coordinator.clear_user("u2").await.unwrap();
    }

    #[tokio::test]
    async fn guard_released_after_completion() {
        let h = Harness::host().await;
        h.coordinator.clear_user("u1").await.unwrap();
        assert!(!h.coordinator.is_action_pending(Command::ClearUser, "u1"));
        h.coordinator.clear_user("u1").await.unwrap();
    }

    #[tokio::test]
    async fn apply_list_refreshes_applicants() {
        let h = Harness::host().await;
        h.transport.respond(
            Command::GetApplyAudienceList,
            json!({"audiences": [
                {"user_id": "u1", "role": "audience"},
                {"user_id": "u2", "role": "audience"},
            ]}),
        );
        let list = h.coordinator.get_apply_audience_list().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(
            h.coordinator.view().await.unwrap().applicants,
            vec!["u1".to_string(), "u2".to_string()]
        );
    }

    #[tokio::test]
    async fn audience_cannot_list_anchors() {
        let h = Harness::audience().await;
        assert!(matches!(
            h.coordinator.get_anchor_list().await,
            Err(LinkMicError::Validation(ValidationError::NotHost))
        ));
    }

    #[tokio::test]
    async fn room_list_needs_no_session() {
        let h = Harness::detached("me");
        h.transport.respond(
            Command::GetActiveLiveRoomList,
            json!({"rooms": [{"room_id": "r1", "host_user_id": "h1", "audience_count": 12}]}),
        );
        let rooms = h.coordinator.get_active_room_list().await.unwrap();
        assert_eq!(rooms[0].audience_count, 12);
    }

    #[tokio::test]
    async fn unknown_and_malformed_pushes_are_dropped() {
        let h = Harness::host().await;
        h.push("liveOnSomethingNew", json!({})).await;
        h.push(events::SEAT_STATUS_CHANGED, json!({"room_id": "room-1"})).await;
        assert!(h.log.events().is_empty());
        assert!(h.coordinator.view().await.is_some());
    }

    /// A guest taking seat 1 moves a living room to chatting.
    #[tokio::test]
    async fn interact_started_binds_seat() {
        let h = Harness::host().await;
        h.push(
            events::INTERACT_STARTED,
            json!({"room_id": "room-1", "seat_id": 1, "user": {"user_id": "u1", "role": "audience", "mic": "on"}}),
        )
        .await;

        let view = h.coordinator.view().await.unwrap();
        assert_eq!(view.room.status, RoomStatus::Chatting);
        let occupant = view.seats[1].occupant.as_ref().unwrap();
        assert_eq!(occupant.user_id, "u1");
        assert_eq!(occupant.interact_status, InteractStatus::Interacting);
    }

    /// Taking a seat ourselves: capture follows our own flags.
    #[tokio::test]
    async fn self_seated_by_push_starts_capture() {
        let h = Harness::audience().await;
        h.push(
            events::INTERACT_STARTED,
            json!({"room_id": "room-1", "seat_id": 1, "user": {"user_id": "me", "role": "audience", "mic": "on", "camera": "off"}}),
        )
        .await;

        assert_eq!(
            h.engine.calls(),
            vec![MediaAction::StartCapture {
                mic: MediaState::On,
                camera: MediaState::Off,
            }]
        );
        assert_eq!(
            h.coordinator.phase().await,
            Some(SessionPhase::AudienceInteracting)
        );
    }

    /// Resync installs exactly the snapshot.
    #[tokio::test]
    async fn reconnect_installs_snapshot_and_drops_applying() {
        let h = Harness::audience().await;
        h.transport
            .respond(Command::ApplyInteract, json!({"needs_approval": true}));
        h.coordinator.apply_interact(Some(2)).await.unwrap();
        assert_eq!(
            h.coordinator.phase().await,
            Some(SessionPhase::AudienceApplying)
        );

        let mut snapshot = make_snapshot("me", "host", 4);
        snapshot.room.status = RoomStatus::Chatting;
        for (seat, user) in [(0, "u1"), (3, "u2")] {
            snapshot.seats[seat] = SeatInfo {
                seat_id: seat as u32,
                status: SeatLock::Unlocked,
                user: Some(make_participant(user, user, Role::Audience)),
            };
        }
        h.transport
            .respond(Command::Reconnect, json!({"session": snapshot}));

        h.connectivity(Connectivity::Disconnected).await;
        h.connectivity(Connectivity::Reconnected).await;

        let view = h.coordinator.view().await.unwrap();
        assert_eq!(view.room.status, RoomStatus::Chatting);
        let seated: Vec<_> = view
            .seats
            .iter()
            .filter_map(|s| s.occupant.as_ref().map(|p| p.user_id.clone()))
            .collect();
        assert_eq!(seated, vec!["u1".to_string(), "u2".to_string()]);
        assert_eq!(view.self_user.interact_status, InteractStatus::Normal);
        assert_eq!(h.transport.sent_for(Command::Reconnect)[0].room_id, "room-1");
        assert_eq!(h.coordinator.connection_state().await, ConnectionState::Connected);
        assert!(
            h.log
                .events()
                .iter()
                .any(|e| matches!(e, LinkMicEvent::SessionResynced(_)))
        );
    }

    #[tokio::test]
    async fn reconnect_discards_open_invites() {
        let h = Harness::audience().await;
        h.push(
            events::INVITE_RECEIVED,
            json!({"room_id": "room-1", "host": {"user_id": "host", "role": "host"}}),
        )
        .await;
        h.transport.respond(
            Command::Reconnect,
            json!({"session": make_snapshot("me", "host", 4)}),
        );
        h.connectivity(Connectivity::Reconnected).await;
        assert!(h.coordinator.active_invite(InviteKind::Chat).is_none());
    }

    #[tokio::test]
    async fn reconnect_to_vanished_room_terminates() {
        let h = Harness::audience().await;
        h.transport.fail(Command::Reconnect, 404, "no such room");
        h.connectivity(Connectivity::Reconnected).await;

        assert!(h.coordinator.view().await.is_none());
        assert!(
            h.log
                .events()
                .contains(&LinkMicEvent::SessionTerminated(TerminationReason::RoomGone))
        );
    }

    #[tokio::test]
    async fn failed_resync_keeps_state_and_reports_disconnected() {
        let h = Harness::audience().await;
        h.transport.fail(Command::Reconnect, 500, "later");
        assert!(h.coordinator.resync().await.is_err());
        assert!(h.coordinator.view().await.is_some());
        assert_eq!(
            h.coordinator.connection_state().await,
            ConnectionState::Disconnected
        );
    }

    /// Clear-user wins over an open invite and an in-flight call.
    #[tokio::test]
    async fn clear_user_push_tears_down_regardless() {
        let h = Arc::new(Harness::audience().await);
        h.push(
            events::INVITE_RECEIVED,
            json!({"room_id": "room-1", "host": {"user_id": "host", "role": "host"}}),
        )
        .await;
        let gate = h.transport.gate(Command::ApplyInteract);
        let pending = {
            let h = h.clone();
            tokio::spawn(async move { h.coordinator.apply_interact(None).await })
        };
        while h.transport.sent_for(Command::ApplyInteract).is_empty() {
            tokio::task::yield_now().await;
        }

        h.push(
            events::USER_CLEARED,
            json!({"room_id": "room-1", "user_id": "me"}),
        )
        .await;

        assert!(h.coordinator.view().await.is_none());
        assert!(h.coordinator.active_invite(InviteKind::Chat).is_none());
        assert!(
            h.log
                .events()
                .contains(&LinkMicEvent::SessionTerminated(TerminationReason::ClearedByServer))
        );
        assert!(h.transport.sent_for(Command::LeaveLiveRoom).is_empty());

        // The late response must not resurrect anything.
        gate.send(json!({"needs_approval": true})).unwrap();
        pending.await.unwrap().unwrap();
        assert!(h.coordinator.view().await.is_none());
    }

    #[tokio::test]
    async fn event_loop_consumes_stream() {
        let h = Harness::host().await;
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        h.coordinator.start(crate::transport::event_stream(rx));

        tx.send(TransportEvent::Push(RawPush {
            event: events::SEAT_STATUS_CHANGED.into(),
            data: json!({"room_id": "room-1", "seat_id": 2, "status": "locked"}),
        }))
        .unwrap();

        for _ in 0..50 {
            if !h.log.events().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            h.log.events(),
            vec![LinkMicEvent::SeatChanged {
                index: 2,
                lock: SeatLock::Locked,
                occupant: None,
            }]
        );
    }

    #[tokio::test]
    async fn listener_subscription_ends_on_drop() {
        let h = Harness::host().await;
        let extra = crate::testing::EventLog::attach(h.coordinator.emitter());
        let subscription = h.coordinator.add_listener(extra.clone());
        drop(subscription);
        h.push(
            events::AUDIENCE_JOINED,
            json!({"room_id": "room-1", "user": {"user_id": "u5", "role": "audience"}, "audience_count": 4}),
        )
        .await;
        // Only the log's own subscription delivered it.
        assert_eq!(extra.events().len(), 1);
        assert_eq!(h.coordinator.view().await.unwrap().room.audience_count, 4);
    }
}
