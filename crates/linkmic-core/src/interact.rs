//! Seat interaction: invitations, applications and leaving a seat.

use crate::coordinator::InteractionCoordinator;
use crate::errors::{LinkMicError, ValidationError};
use crate::events::LinkMicEvent;
use crate::intents::IntentKind;
use crate::invites::InviteKind;
use crate::participants::InteractStatus;
use crate::protocol::{
    Ack, ApplyInteractResponse, Command, Empty, FinishType, InviteInteractRequest,
    ManageApplyRequest, ManageSeatRequest, ReplyInviteRequest, ReplyInviteResponse, SeatAction,
    SeatRequest, TargetRequest,
};
use crate::push::{self, Effects};
use crate::seats::{SeatLock, seat_to_wire};
use crate::session::{RoomStatus, SelfInviteStatus, SessionState};

fn check_seat(session: &SessionState, index: u32) -> Result<(), ValidationError> {
    let seat = session.seat(index).ok_or(ValidationError::UnknownSeat(index))?;
    if seat.lock == SeatLock::Locked {
        return Err(ValidationError::SeatLocked(index));
    }
    Ok(())
}

fn check_not_pk(session: &SessionState) -> Result<(), ValidationError> {
    match session.room().map(|r| r.status) {
        Some(RoomStatus::PkIng) => Err(ValidationError::RoomBusy(RoomStatus::PkIng)),
        _ => Ok(()),
    }
}

impl InteractionCoordinator {
    /// Invite an audience member onto `seat`, or onto any free seat.
    ///
    /// Only one outbound invitation may be pending; a second one is
    /// rejected before anything is sent. The pending status is taken before
    /// the request so that an answer pushed ahead of the reply settles it.
    pub async fn invite_interact(&self, user_id: &str, seat: Option<u32>) -> Result<(), LinkMicError> {
        let _guard = self.begin(Command::InviteInteract, "")?;
        let (room_id, generation) = {
            let mut session = self.session.lock().await;
            let room_id = session.room_id().ok_or(LinkMicError::NoSession)?.to_string();
            if !session.self_is_host() {
                return Err(ValidationError::NotHost.into());
            }
            let status = session.self_invite_status();
            if status != SelfInviteStatus::Normal {
                return Err(ValidationError::AlreadyInviting(status).into());
            }
            check_not_pk(&session)?;
            if session.seat_of(user_id).is_some() {
                return Err(ValidationError::AlreadyInteracting.into());
            }
            if let Some(index) = seat {
                check_seat(&session, index)?;
            }
            session.set_self_invite_status(SelfInviteStatus::InvitingChat, Some(user_id.to_string()))?;
            (room_id, session.generation())
        };
        self.emitter
            .emit(LinkMicEvent::SelfInviteStatusChanged(SelfInviteStatus::InvitingChat));

        let result: Result<Ack, LinkMicError> = self
            .gateway
            .call(
                Command::InviteInteract,
                &room_id,
                &InviteInteractRequest {
                    audience_user_id: user_id,
                    seat_id: seat_to_wire(seat),
                },
            )
            .await;

        match result {
            Ok(_) => {
                tracing::info!("invited {user_id} to seat {seat:?}");
                Ok(())
            }
            Err(e) => {
                self.withdraw_invite(generation, SelfInviteStatus::InvitingChat, user_id)
                    .await;
                Err(e)
            }
        }
    }

    /// Drop our pending invitation to `target` after the request failed,
    /// unless a push or a new session has already replaced it.
    pub(crate) async fn withdraw_invite(
        &self,
        generation: u64,
        status: SelfInviteStatus,
        target: &str,
    ) {
        let withdrawn = {
            let mut session = self.session.lock().await;
            session.generation() == generation
                && session.self_invite_status() == status
                && session.invite_target() == Some(target)
                && session
                    .set_self_invite_status(SelfInviteStatus::Normal, None)
                    .is_ok()
        };
        if withdrawn {
            tracing::debug!("invitation to {target} withdrawn");
            self.emitter
                .emit(LinkMicEvent::SelfInviteStatusChanged(SelfInviteStatus::Normal));
        }
    }

    /// Answer the seat invitation currently shown.
    ///
    /// The dialog is taken before anything else, so only the first answer
    /// is sent. While an acceptance is in flight we are `Inviting` and
    /// cannot apply for a seat.
    pub async fn respond_to_chat_invite(&self, accept: bool) -> Result<(), LinkMicError> {
        let _guard = self.begin(Command::ReplyInvite, "")?;
        let invite = self
            .invites
            .take(InviteKind::Chat)
            .ok_or(ValidationError::NoPendingInvite(InviteKind::Chat))?;

        let (room_id, generation, self_id, before) = {
            let mut session = self.session.lock().await;
            let room_id = session.room_id().ok_or(LinkMicError::NoSession)?.to_string();
            let me = session.self_user().ok_or(LinkMicError::NoSession)?;
            let (self_id, before) = (me.user_id.clone(), me.interact_status);
            if accept {
                if session.self_is_host() {
                    return Err(ValidationError::NotAudience.into());
                }
                if session.seat_of(&self_id).is_some() {
                    return Err(ValidationError::AlreadyInteracting.into());
                }
                session.set_participant_status(&self_id, InteractStatus::Inviting)?;
                self.lock_intents()
                    .register(IntentKind::AcceptChatInvite, &self_id);
            }
            (room_id, session.generation(), self_id, before)
        };

        let result: Result<ReplyInviteResponse, LinkMicError> = self
            .gateway
            .call(
                Command::ReplyInvite,
                &room_id,
                &ReplyInviteRequest {
                    host_user_id: &invite.from_user.user_id,
                    seat_id: seat_to_wire(invite.seat_id),
                    accept,
                },
            )
            .await;
        if !accept {
            tracing::info!("declined seat invitation from {}", invite.from_user.user_id);
            return result.map(|_| ());
        }

        let mut fx = Effects::default();
        let outcome = {
            let mut session = self.session.lock().await;
            let mut intents = self.lock_intents();
            intents.consume(IntentKind::AcceptChatInvite, &self_id);
            if session.generation() != generation {
                return result.map(|_| ());
            }
            let outcome = match result {
                Ok(resp) => match resp.seat {
                    Some(seat) => push::seat_self(&mut session, seat, &mut fx),
                    None => Ok(()),
                },
                Err(e) => Err(e),
            };
            let answering = session
                .self_user()
                .is_some_and(|me| me.interact_status == InteractStatus::Inviting);
            // No seat yet: it follows by push, if at all.
            if answering {
                if let Err(e) = session.set_participant_status(&self_id, before) {
                    tracing::warn!("could not restore {before:?} after answering: {e}");
                }
            }
            // Covers the seat push that arrived while our reply was pending.
            push::announce_self_seated(&session, &mut fx);
            outcome
        };
        self.flush(fx).await;
        outcome
    }

    /// Ask the host for a seat. Returns whether the host must approve.
    pub async fn apply_interact(&self, seat: Option<u32>) -> Result<bool, LinkMicError> {
        let _guard = self.begin(Command::ApplyInteract, "")?;
        let (room_id, generation, self_id) = {
            let session = self.session.lock().await;
            let room_id = session.room_id().ok_or(LinkMicError::NoSession)?.to_string();
            let me = session.self_user().ok_or(LinkMicError::NoSession)?;
            if session.self_is_host() {
                return Err(ValidationError::NotAudience.into());
            }
            check_not_pk(&session)?;
            match me.interact_status {
                InteractStatus::Interacting => return Err(ValidationError::AlreadyInteracting.into()),
                InteractStatus::Applying => return Err(ValidationError::AlreadyApplying.into()),
                InteractStatus::Inviting => return Err(ValidationError::AnsweringInvite.into()),
                InteractStatus::Normal => {}
            }
            if let Some(index) = seat {
                check_seat(&session, index)?;
            }
            (room_id, session.generation(), me.user_id.clone())
        };

        let resp: ApplyInteractResponse = self
            .gateway
            .call(
                Command::ApplyInteract,
                &room_id,
                &SeatRequest {
                    seat_id: seat_to_wire(seat),
                },
            )
            .await?;

        if resp.needs_approval {
            let mut session = self.session.lock().await;
            let idle = session
                .self_user()
                .is_some_and(|me| me.interact_status == InteractStatus::Normal);
            if session.generation() == generation
                && idle
                && session.seat_of(&self_id).is_none()
                && session.set_participant_status(&self_id, InteractStatus::Applying)?
            {
                drop(session);
                tracing::info!("applied for seat {seat:?}, waiting for the host");
                self.emitter
                    .emit(LinkMicEvent::SelfStatusChanged(InteractStatus::Applying));
            }
        }
        Ok(resp.needs_approval)
    }

    /// Approve a pending application. The seat follows by push.
    pub async fn agree_apply(&self, user_id: &str) -> Result<(), LinkMicError> {
        let _guard = self.begin(Command::AgreeApply, user_id)?;
        let (room_id, generation) = {
            let session = self.session.lock().await;
            let room_id = session.room_id().ok_or(LinkMicError::NoSession)?.to_string();
            if !session.self_is_host() {
                return Err(ValidationError::NotHost.into());
            }
            if !session.is_applicant(user_id) {
                return Err(ValidationError::NotApplying(user_id.to_string()).into());
            }
            check_not_pk(&session)?;
            (room_id, session.generation())
        };

        let _: Ack = self
            .gateway
            .call(Command::AgreeApply, &room_id, &TargetRequest { user_id })
            .await?;

        let mut session = self.session.lock().await;
        if session.generation() == generation {
            session.remove_applicant(user_id)?;
        }
        tracing::info!("approved {user_id}");
        Ok(())
    }

    /// Whether audience applications need the host's approval.
    pub async fn manage_interact_apply(&self, needs_approval: bool) -> Result<(), LinkMicError> {
        let _guard = self.begin(Command::ManageInteractApply, "")?;
        let (room_id, generation) = self.host_room().await?;
        let _: Ack = self
            .gateway
            .call(
                Command::ManageInteractApply,
                &room_id,
                &ManageApplyRequest { needs_approval },
            )
            .await?;
        let mut session = self.session.lock().await;
        if session.generation() == generation {
            session.set_apply_needs_approval(needs_approval)?;
        }
        Ok(())
    }

    /// Lock, unlock, mute, unmute or end the interaction on a seat.
    ///
    /// Lock changes are applied on success; the others are reconciled by
    /// the pushes that follow.
    pub async fn manage_seat(&self, index: u32, action: SeatAction) -> Result<(), LinkMicError> {
        let _guard = self.begin(Command::ManageSeat, &index.to_string())?;
        let (room_id, generation) = {
            let session = self.session.lock().await;
            let room_id = session.room_id().ok_or(LinkMicError::NoSession)?.to_string();
            if !session.self_is_host() {
                return Err(ValidationError::NotHost.into());
            }
            let seat = session.seat(index).ok_or(ValidationError::UnknownSeat(index))?;
            let needs_occupant = matches!(
                action,
                SeatAction::Mute | SeatAction::Unmute | SeatAction::EndInteract
            );
            if needs_occupant && seat.occupant.is_none() {
                return Err(ValidationError::SeatEmpty(index).into());
            }
            (room_id, session.generation())
        };

        let _: Ack = self
            .gateway
            .call(
                Command::ManageSeat,
                &room_id,
                &ManageSeatRequest {
                    seat_id: index,
                    action,
                },
            )
            .await?;

        let lock = match action {
            SeatAction::Lock => SeatLock::Locked,
            SeatAction::Unlock => SeatLock::Unlocked,
            SeatAction::Mute | SeatAction::Unmute | SeatAction::EndInteract => return Ok(()),
        };
        let event = {
            let mut session = self.session.lock().await;
            if session.generation() != generation || !session.set_seat_lock(index, lock)? {
                return Ok(());
            }
            session.seat(index).map(|seat| LinkMicEvent::SeatChanged {
                index,
                lock,
                occupant: seat.occupant.clone(),
            })
        };
        if let Some(event) = event {
            self.emitter.emit(event);
        }
        Ok(())
    }

    /// Leave our seat.
    pub async fn finish_interact(&self) -> Result<(), LinkMicError> {
        let _guard = self.begin(Command::FinishInteract, "")?;
        let (room_id, generation, self_id) = {
            let session = self.session.lock().await;
            let room_id = session.room_id().ok_or(LinkMicError::NoSession)?.to_string();
            if session.self_is_host() {
                return Err(ValidationError::NotAudience.into());
            }
            let self_id = session.self_user_id().unwrap_or_default().to_string();
            if session.seat_of(&self_id).is_none() {
                return Err(ValidationError::NotInteracting.into());
            }
            (room_id, session.generation(), self_id)
        };

        let _: Ack = self
            .gateway
            .call(Command::FinishInteract, &room_id, &Empty {})
            .await?;

        let mut fx = Effects::default();
        {
            let mut session = self.session.lock().await;
            if session.generation() != generation {
                return Ok(());
            }
            push::finish_seat(&mut session, &self_id, FinishType::EndedBySelf, &mut fx)?;
        }
        self.flush(fx).await;
        Ok(())
    }
}
