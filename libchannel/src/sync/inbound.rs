use crate::balance::ChannelRole;
use crate::chain::ChainService;
use crate::engine::ChannelEngine;
use crate::events::ChannelEvent;
use crate::lock::LockService;
use crate::messaging::MessagingService;
use crate::primitives::PublicIdentifier;
use crate::state::{ChannelState, ChannelUpdate};
use crate::storage::ChannelStore;
use crate::sync::messages::{ChannelMessage, InboundFailure, MessageBody, ProtocolError, UpdateMessage};
use crate::sync::pending::ProposalOutcome;
use crate::sync::{base_for, verified_apply};
use crate::update::{AppliedUpdate, UpdateError};
use log::*;

/// The result of handling one inbound update: the missed update merged on the way, if any, and the update itself.
struct Handled {
    merged: Option<AppliedUpdate>,
    applied: AppliedUpdate,
}

impl<S, M, L, C> ChannelEngine<S, M, L, C>
where
    S: ChannelStore,
    M: MessagingService,
    L: LockService,
    C: ChainService,
{
    pub(crate) async fn inbound(&self, message: ChannelMessage) {
        let me = self.public_identifier().clone();
        if message.to != me {
            warn!("Ignoring a message addressed to {}", message.to);
            return;
        }
        if message.from == me {
            warn!("Ignoring a message from ourselves: {message}");
            return;
        }
        trace!("Received {message}");
        match message.body {
            MessageBody::Error(error) => self.handle_protocol_error(*error),
            MessageBody::Update(update) => self.handle_update_message(message.from, *update).await,
        }
    }

    fn handle_protocol_error(&self, error: ProtocolError) {
        warn!("Counterparty reported: {error}");
        self.inner.events.post(ChannelEvent::ProtocolError(Box::new(error.clone())));
        let (channel, nonce) = (error.channel_address, error.nonce);
        self.inner.pending.resolve(&channel, nonce, ProposalOutcome::Rejected(Box::new(error)));
    }

    async fn handle_update_message(&self, from: PublicIdentifier, message: UpdateMessage) {
        let me = self.public_identifier().clone();
        let channel = message.update.channel_address;
        let nonce = message.update.nonce;
        // An acknowledgement is our own proposal coming back with both signatures on it
        let is_ack = message.update.from_identifier == me;
        let result = {
            let _guard = self.inner.apply_locks.lock(&channel).await;
            self.handle_update(&from, &message, is_ack).await
        };
        match result {
            Ok(Handled { merged, applied }) => {
                if let Some(merged) = merged {
                    self.emit_applied(&merged);
                }
                self.emit_applied(&applied);
                if is_ack {
                    if !self.inner.pending.resolve(&channel, nonce, ProposalOutcome::Applied(Box::new(applied))) {
                        debug!("Applied an acknowledgement for {channel} #{nonce} that nobody was waiting for");
                    }
                    return;
                }
                let Some(signed) = applied.state.latest_update.clone() else {
                    return;
                };
                info!("Countersigned {signed}");
                self.reply(ChannelMessage::update(me, from.clone(), signed.clone(), Some(signed))).await;
                if self.inner.pending.is_pending(&channel, nonce) {
                    // We lost the tie-break. Our own proposal for this nonce can never be applied.
                    let error = ProtocolError {
                        channel_address: channel,
                        nonce,
                        reason: InboundFailure::UpdateCollision,
                        latest_update: None,
                    };
                    self.inner.pending.resolve(&channel, nonce, ProposalOutcome::Rejected(Box::new(error)));
                }
            }
            Err(reason) => {
                let latest_update = match self.inner.store.get_channel_state(&channel) {
                    Ok(Some(state)) => state.latest_update,
                    _ => None,
                };
                let error = ProtocolError { channel_address: channel, nonce, reason, latest_update };
                warn!("Rejecting update from {from}: {error}");
                self.inner.events.post(ChannelEvent::ProtocolError(Box::new(error.clone())));
                if is_ack {
                    self.inner.pending.resolve(&channel, nonce, ProposalOutcome::Rejected(Box::new(error)));
                } else {
                    self.reply(ChannelMessage::error(me, from, error)).await;
                }
            }
        }
    }

    async fn handle_update(
        &self,
        from: &PublicIdentifier,
        message: &UpdateMessage,
        is_ack: bool,
    ) -> Result<Handled, InboundFailure> {
        let update = &message.update;
        let me = self.public_identifier();
        check_sender(update, from, me, is_ack)?;
        let channel = update.channel_address;
        let stored = self
            .inner
            .store
            .get_channel_state(&channel)
            .map_err(|e| InboundFailure::ContextUnavailable(e.to_string()))?;
        let state = base_for(update, stored).ok_or(InboundFailure::ChannelNotFound(channel))?;

        if update.nonce <= state.nonce {
            return Err(InboundFailure::StaleUpdateNonce);
        }
        let diff = update.nonce - state.nonce;
        if diff > 2 {
            return Err(InboundFailure::StaleChannelNonce { local: state.nonce, requested: update.nonce });
        }
        let (state, merged) = if diff == 2 {
            let latest = message
                .latest_update
                .as_ref()
                .filter(|l| l.nonce == state.nonce + 1 && l.is_double_signed())
                .ok_or(InboundFailure::StaleChannelNonceNoUpdate)?;
            debug!("We are one update behind on {channel}. Merging {latest}");
            let merged = self.verified_apply_with_context(latest, &state, true).await?;
            (merged.state.clone(), Some(merged))
        } else {
            (state, None)
        };

        let my_role = state.role_of(me).ok_or_else(|| invalid(UpdateError::NotAParticipant(me.to_string())))?;
        if !is_ack && my_role == ChannelRole::Alice && self.inner.pending.is_pending(&channel, update.nonce) {
            info!("Rejecting {update}: we have our own proposal pending for nonce {}", update.nonce);
            return Err(InboundFailure::UpdateCollision);
        }

        let applied = self.verified_apply_with_context(update, &state, is_ack).await?;
        let applied = if is_ack {
            applied
        } else {
            let signature = self.inner.signer.sign_message(&applied.state.commitment_hash());
            let signed = update.clone().with_signature(my_role, signature);
            applied.with_update(signed)
        };

        let save = |a: &AppliedUpdate| self.persist(a).map_err(|e| InboundFailure::SaveChannelFailed(e.to_string()));
        if let Some(merged) = &merged {
            save(merged)?;
        }
        save(&applied)?;
        Ok(Handled { merged, applied })
    }

    async fn verified_apply_with_context(
        &self,
        update: &ChannelUpdate,
        state: &ChannelState,
        require_both: bool,
    ) -> Result<AppliedUpdate, InboundFailure> {
        let ctx =
            self.context_for(update, state).await.map_err(|e| InboundFailure::ContextUnavailable(e.to_string()))?;
        verified_apply(update, state, &ctx, require_both).map_err(invalid)
    }

    /// Replies get a single attempt. The proposer times out and retries if it is lost.
    async fn reply(&self, message: ChannelMessage) {
        if let Err(e) = self.inner.messaging.publish(message.clone()).await {
            warn!("Could not deliver {message}: {e}");
        }
    }
}

fn invalid(e: UpdateError) -> InboundFailure {
    InboundFailure::InvalidUpdate(e)
}

/// Proposals must be authored by their sender and addressed to us. Acknowledgements must carry both signatures.
fn check_sender(
    update: &ChannelUpdate,
    from: &PublicIdentifier,
    me: &PublicIdentifier,
    is_ack: bool,
) -> Result<(), InboundFailure> {
    if is_ack {
        if &update.to_identifier != from {
            return Err(invalid(UpdateError::IdentifierMismatch));
        }
        if !update.is_double_signed() {
            return Err(invalid(missing_signature(update)));
        }
        return Ok(());
    }
    if &update.from_identifier != from || &update.to_identifier != me {
        return Err(invalid(UpdateError::IdentifierMismatch));
    }
    Ok(())
}

fn missing_signature(update: &ChannelUpdate) -> UpdateError {
    match update.signature(ChannelRole::Alice) {
        None => UpdateError::MissingSignature(ChannelRole::Alice),
        Some(_) => UpdateError::MissingSignature(ChannelRole::Bob),
    }
}
