//! PK battles between two hosts.

use crate::controls::MediaAction;
use crate::coordinator::InteractionCoordinator;
use crate::errors::{LinkMicError, ValidationError};
use crate::events::LinkMicEvent;
use crate::intents::IntentKind;
use crate::invites::InviteKind;
use crate::protocol::{
    Ack, Command, Empty, InviteAnchorRequest, ManageOtherAnchorRequest, ReplyAnchorRequest,
    ReplyAnchorResponse,
};
use crate::push::{self, Effects};
use crate::session::{RoomStatus, SelfInviteStatus, SessionState};

fn check_living(session: &SessionState) -> Result<(), ValidationError> {
    match session.room().map(|r| r.status) {
        Some(RoomStatus::Living) | None => Ok(()),
        Some(status) => Err(ValidationError::RoomBusy(status)),
    }
}

impl InteractionCoordinator {
    /// Invite the host of `room_id` to a PK battle.
    pub async fn invite_anchor(&self, room_id: &str, user_id: &str) -> Result<(), LinkMicError> {
        let _guard = self.begin(Command::InviteAnchor, "")?;
        let (own_room, generation) = {
            let mut session = self.session.lock().await;
            let own_room = session.room_id().ok_or(LinkMicError::NoSession)?.to_string();
            if !session.self_is_host() {
                return Err(ValidationError::NotHost.into());
            }
            let status = session.self_invite_status();
            if status != SelfInviteStatus::Normal {
                return Err(ValidationError::AlreadyInviting(status).into());
            }
            check_living(&session)?;
            session.set_self_invite_status(SelfInviteStatus::InvitingPk, Some(user_id.to_string()))?;
            (own_room, session.generation())
        };
        self.emitter
            .emit(LinkMicEvent::SelfInviteStatusChanged(SelfInviteStatus::InvitingPk));

        let result: Result<Ack, LinkMicError> = self
            .gateway
            .call(
                Command::InviteAnchor,
                &own_room,
                &InviteAnchorRequest {
                    invitee_room_id: room_id,
                    invitee_user_id: user_id,
                },
            )
            .await;

        match result {
            Ok(_) => {
                tracing::info!("invited {user_id} of {room_id} to PK");
                Ok(())
            }
            Err(e) => {
                self.withdraw_invite(generation, SelfInviteStatus::InvitingPk, user_id)
                    .await;
                Err(e)
            }
        }
    }

    /// Answer the PK invitation currently shown.
    pub async fn respond_to_pk_invite(&self, accept: bool) -> Result<(), LinkMicError> {
        let _guard = self.begin(Command::ReplyAnchor, "")?;
        let invite = self
            .invites
            .take(InviteKind::Pk)
            .ok_or(ValidationError::NoPendingInvite(InviteKind::Pk))?;
        let inviter = invite.from_user.user_id.clone();

        let (room_id, generation) = {
            let session = self.session.lock().await;
            let room_id = session.room_id().ok_or(LinkMicError::NoSession)?.to_string();
            if !session.self_is_host() {
                return Err(ValidationError::NotHost.into());
            }
            if accept {
                check_living(&session)?;
                self.lock_intents()
                    .register(IntentKind::AcceptPkInvite, &inviter);
            }
            (room_id, session.generation())
        };

        let result: Result<ReplyAnchorResponse, LinkMicError> = self
            .gateway
            .call(
                Command::ReplyAnchor,
                &room_id,
                &ReplyAnchorRequest {
                    inviter_room_id: &invite.from_room_id,
                    inviter_user_id: &inviter,
                    accept,
                },
            )
            .await;
        if !accept {
            tracing::info!("declined PK invitation from {inviter}");
            return result.map(|_| ());
        }

        let mut fx = Effects::default();
        let outcome = {
            let mut session = self.session.lock().await;
            let mut intents = self.lock_intents();
            intents.consume(IntentKind::AcceptPkInvite, &inviter);
            if session.generation() != generation {
                return result.map(|_| ());
            }
            let outcome = match result {
                Ok(ReplyAnchorResponse { anchor: Some(link) }) => {
                    match push::start_pk(&mut session, link, &mut fx) {
                        Ok(true) => {
                            intents.discard_kind(IntentKind::EndPk);
                            Ok(())
                        }
                        Ok(false) => Ok(()),
                        Err(e) => Err(e),
                    }
                }
                Ok(ReplyAnchorResponse { anchor: None }) => Ok(()),
                Err(e) => Err(e),
            };
            // Also covers a bind pushed while our reply was pending.
            if session.anchor().is_some_and(|l| l.peer_user_id == inviter) {
                push::announce_pk(&session, &mut fx);
            }
            outcome
        };
        self.flush(fx).await;
        outcome
    }

    /// End the current PK battle.
    pub async fn finish_anchor_interact(&self) -> Result<(), LinkMicError> {
        let _guard = self.begin(Command::FinishAnchorInteract, "")?;
        let (room_id, generation, peer_room) = {
            let session = self.session.lock().await;
            let room_id = session.room_id().ok_or(LinkMicError::NoSession)?.to_string();
            if !session.self_is_host() {
                return Err(ValidationError::NotHost.into());
            }
            let peer_room = session
                .anchor()
                .ok_or(ValidationError::NotInPk)?
                .peer_room_id
                .clone();
            self.lock_intents().register(IntentKind::EndPk, &peer_room);
            (room_id, session.generation(), peer_room)
        };

        let result: Result<Ack, LinkMicError> = self
            .gateway
            .call(Command::FinishAnchorInteract, &room_id, &Empty {})
            .await;

        let mut fx = Effects::default();
        {
            let mut session = self.session.lock().await;
            let mut intents = self.lock_intents();
            if let Err(e) = result {
                intents.consume(IntentKind::EndPk, &peer_room);
                return Err(e);
            }
            if session.generation() != generation {
                return Ok(());
            }
            // The finished push may have closed it already.
            if session.anchor().is_some_and(|l| l.peer_room_id == peer_room) {
                intents.consume(IntentKind::EndPk, &peer_room);
                push::close_pk(&mut session, true, &mut fx)?;
            }
        }
        self.flush(fx).await;
        Ok(())
    }

    /// Mute or unmute the PK peer's audio in our room.
    ///
    /// Applied to the engine right away and rolled back if the server
    /// refuses.
    pub async fn manage_other_anchor(&self, muted: bool) -> Result<(), LinkMicError> {
        let _guard = self.begin(Command::ManageOtherAnchor, "")?;
        let kind = IntentKind::MutePeerAnchor { muted };
        let (room_id, generation, link) = {
            let session = self.session.lock().await;
            let room_id = session.room_id().ok_or(LinkMicError::NoSession)?.to_string();
            if !session.self_is_host() {
                return Err(ValidationError::NotHost.into());
            }
            let link = session.anchor().ok_or(ValidationError::NotInPk)?.clone();
            self.lock_intents().register(kind, &link.peer_user_id);
            (room_id, session.generation(), link)
        };
        let peer = link.peer_user_id.clone();
        self.apply_media(&[MediaAction::MuteRemoteAudio {
            user_id: peer.clone(),
            muted,
        }]);

        let result: Result<Ack, LinkMicError> = self
            .gateway
            .call(
                Command::ManageOtherAnchor,
                &room_id,
                &ManageOtherAnchorRequest {
                    other_room_id: &link.peer_room_id,
                    other_user_id: &peer,
                    muted,
                },
            )
            .await;

        let revert = {
            let mut session = self.session.lock().await;
            let mut intents = self.lock_intents();
            let held = intents.consume(kind, &peer);
            let bound = session
                .anchor()
                .filter(|l| l.peer_user_id == peer)
                .map(|l| l.muted_by_self);
            match result {
                Err(e) => match bound {
                    Some(model) if held => Err((e, Some(model))),
                    _ => Err((e, None)),
                },
                Ok(_) => {
                    if session.generation() == generation && bound.is_some() {
                        session.set_anchor_muted(muted)?;
                        Ok(true)
                    } else {
                        Ok(false)
                    }
                }
            }
        };

        match revert {
            Ok(true) => {
                tracing::info!("peer anchor {peer} muted={muted}");
                self.emitter.emit(LinkMicEvent::PeerAnchorMuted {
                    peer_user_id: peer,
                    muted,
                });
                Ok(())
            }
            Ok(false) => Ok(()),
            Err((e, restore)) => {
                if let Some(model) = restore {
                    tracing::warn!("peer mute refused, restoring muted={model}");
                    self.apply_media(&[MediaAction::MuteRemoteAudio {
                        user_id: peer,
                        muted: model,
                    }]);
                }
                Err(e)
            }
        }
    }
}
