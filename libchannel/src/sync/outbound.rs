use crate::chain::ChainService;
use crate::engine::ChannelEngine;
use crate::lock::LockService;
use crate::messaging::MessagingService;
use crate::state::ChannelUpdate;
use crate::storage::ChannelStore;
use crate::sync::messages::{ChannelMessage, InboundFailure, ProtocolError};
use crate::sync::pending::ProposalOutcome;
use crate::sync::{base_for, verified_apply, SyncError};
use crate::update::{AppliedUpdate, GeneratedUpdate};
use log::*;

/// How a proposal ended, short of an error.
pub(crate) enum OutboundResult {
    /// The counterparty countersigned. The new state has been persisted.
    Applied(AppliedUpdate),
    /// Our copy of the channel was behind and has been brought up to date. The proposal must be regenerated.
    Resynced,
}

impl<S, M, L, C> ChannelEngine<S, M, L, C>
where
    S: ChannelStore,
    M: MessagingService,
    L: LockService,
    C: ChainService,
{
    /// Sends `generated` to the counterparty and waits for the verdict.
    pub(crate) async fn outbound(&self, generated: &GeneratedUpdate) -> Result<OutboundResult, SyncError> {
        let update = &generated.update;
        let channel = update.channel_address;
        let nonce = update.nonce;
        let response = self.inner.pending.register(channel, nonce);
        let message = ChannelMessage::update(
            update.from_identifier.clone(),
            update.to_identifier.clone(),
            update.clone(),
            generated.previous.latest_update.clone(),
        );
        if let Err(e) = self.publish_with_retries(message).await {
            self.inner.pending.cancel(&channel, nonce);
            return Err(e);
        }
        let outcome = match tokio::time::timeout(self.inner.config.response_timeout, response).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) | Err(_) => {
                self.inner.pending.cancel(&channel, nonce);
                warn!("No response from {} to {update}", update.to_identifier);
                return Err(SyncError::ResponseTimeout { channel, nonce });
            }
        };
        match outcome {
            ProposalOutcome::Applied(applied) => {
                debug!("{update} was countersigned by {}", update.to_identifier);
                Ok(OutboundResult::Applied(*applied))
            }
            ProposalOutcome::Rejected(error) => self.handle_rejection(update, *error).await,
        }
    }

    async fn publish_with_retries(&self, message: ChannelMessage) -> Result<(), SyncError> {
        let attempts = self.inner.config.message_retries.max(1);
        let mut reason = String::new();
        for attempt in 1..=attempts {
            match self.inner.messaging.publish(message.clone()).await {
                Ok(()) => {
                    trace!("Published {message} on attempt {attempt}");
                    return Ok(());
                }
                Err(e) => {
                    warn!("Attempt {attempt}/{attempts} to publish {message} failed: {e}");
                    reason = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.inner.config.retry_delay).await;
            }
        }
        Err(SyncError::MessageFailed { attempts, reason })
    }

    async fn handle_rejection(
        &self,
        proposed: &ChannelUpdate,
        error: ProtocolError,
    ) -> Result<OutboundResult, SyncError> {
        match error.reason {
            InboundFailure::StaleUpdateNonce => {
                let latest = match error.latest_update {
                    Some(latest) if latest.nonce == proposed.nonce && latest.is_double_signed() => latest,
                    Some(latest) => {
                        let local = proposed.nonce - 1;
                        return Err(SyncError::StaleChannelNonce { local, counterparty: latest.nonce });
                    }
                    None => return Err(SyncError::Rejected(InboundFailure::StaleUpdateNonce)),
                };
                info!("{} is ahead of us. Merging {latest}", proposed.to_identifier);
                self.merge_update(&latest).await?;
                Ok(OutboundResult::Resynced)
            }
            InboundFailure::UpdateCollision => {
                debug!("{proposed} collided with a proposal from {}", proposed.to_identifier);
                Ok(OutboundResult::Resynced)
            }
            reason => {
                warn!("{proposed} was rejected: {reason}");
                Err(SyncError::Rejected(reason))
            }
        }
    }

    /// Applies the counterparty's double-signed `latest` to our stored copy.
    async fn merge_update(&self, latest: &ChannelUpdate) -> Result<(), SyncError> {
        let channel = latest.channel_address;
        let merged = {
            let _guard = self.inner.apply_locks.lock(&channel).await;
            let stored = self.inner.store.get_channel_state(&channel)?;
            let state = base_for(latest, stored).ok_or(SyncError::ChannelNotFound(channel))?;
            if state.nonce >= latest.nonce {
                debug!("{latest} has already been merged");
                return Ok(());
            }
            if state.nonce + 1 != latest.nonce {
                return Err(SyncError::StaleChannelNonce { local: state.nonce, counterparty: latest.nonce });
            }
            let ctx = self.context_for(latest, &state).await?;
            let merged = verified_apply(latest, &state, &ctx, true).map_err(SyncError::MergeFailed)?;
            self.persist(&merged)?;
            merged
        };
        self.emit_applied(&merged);
        Ok(())
    }
}
