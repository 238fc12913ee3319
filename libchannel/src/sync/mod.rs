//! Keeping both copies of a channel in lock-step.
//!
//! The outbound half publishes a signed proposal and waits for the counterparty's acknowledgement or rejection,
//! resynchronising when the counterparty is one update ahead. The inbound half validates, countersigns and persists
//! the counterparty's proposals, merging a single missed update on the way when needed.
//!
//! Both halves read, apply and persist a channel's state under that channel's apply lock, so they never interleave on
//! one channel.

mod error;
mod inbound;
pub mod messages;
mod outbound;
mod pending;

pub use error::SyncError;
pub use messages::{ChannelMessage, InboundFailure, MessageBody, ProtocolError, UpdateMessage};
pub(crate) use outbound::OutboundResult;
pub use pending::{PendingProposals, ProposalOutcome};

use crate::chain::ChainService;
use crate::engine::ChannelEngine;
use crate::events::{ChannelEvent, ChannelUpdatedPayload, DepositReconciledPayload, TransferPayload};
use crate::lock::LockService;
use crate::messaging::MessagingService;
use crate::primitives::Address;
use crate::state::{ChannelState, ChannelUpdate, UpdateDetails};
use crate::storage::ChannelStore;
use crate::transfers::TransferKind;
use crate::update::{apply_update, verify_update_signatures, AppliedUpdate, UpdateContext, UpdateError};
use log::*;

/// Applies `update` to `state` and checks its signatures over the resulting commitment.
pub(crate) fn verified_apply(
    update: &ChannelUpdate,
    state: &ChannelState,
    ctx: &UpdateContext,
    require_both: bool,
) -> Result<AppliedUpdate, UpdateError> {
    let applied = apply_update(update, state, ctx)?;
    verify_update_signatures(update, &applied.state, require_both)?;
    Ok(applied)
}

/// The state `update` applies to: the stored channel, or for a setup update, the zero state both parties derive from
/// its details.
pub(crate) fn base_for(update: &ChannelUpdate, stored: Option<ChannelState>) -> Option<ChannelState> {
    match (stored, &update.details) {
        (Some(state), _) => Some(state),
        (None, UpdateDetails::Setup(details)) => Some(ChannelState::base_state(
            update.from_identifier.clone(),
            update.to_identifier.clone(),
            details.network_context.clone(),
            details.timeout,
        )),
        (None, _) => None,
    }
}

impl<S, M, L, C> ChannelEngine<S, M, L, C>
where
    S: ChannelStore,
    M: MessagingService,
    L: LockService,
    C: ChainService,
{
    /// Gathers the off-state inputs for an update on `state`. Deposits are only fetched when `deposit_asset` is given.
    pub(crate) async fn update_context(
        &self,
        state: &ChannelState,
        deposit_asset: Option<&Address>,
    ) -> Result<UpdateContext, SyncError> {
        let chain_id = state.network_context.chain_id;
        let active_transfers = self.inner.store.get_active_transfers(&state.channel_address)?;
        let deposits = match deposit_asset {
            Some(asset) => self
                .inner
                .chain
                .get_deposits(chain_id, &state.channel_address, asset)
                .await
                .map_err(|e| SyncError::Context(e.to_string()))?,
            None => Vec::new(),
        };
        let registry =
            self.inner.chain.get_registered_transfers(chain_id).await.map_err(|e| SyncError::Context(e.to_string()))?;
        Ok(UpdateContext { active_transfers, deposits, registry })
    }

    /// The context `update` needs when applied to `state`.
    pub(crate) async fn context_for(
        &self,
        update: &ChannelUpdate,
        state: &ChannelState,
    ) -> Result<UpdateContext, SyncError> {
        match &update.details {
            UpdateDetails::Setup(_) => Ok(UpdateContext::default()),
            UpdateDetails::Deposit(_) => self.update_context(state, Some(&update.asset_id)).await,
            _ => self.update_context(state, None).await,
        }
    }

    pub(crate) fn persist(&self, applied: &AppliedUpdate) -> Result<(), SyncError> {
        self.inner.store.save_channel_state(&applied.state, applied.transfer.as_ref())?;
        trace!("Saved {} at nonce {}", applied.state.channel_address, applied.state.nonce);
        Ok(())
    }

    /// Posts the events that describe `applied`.
    pub(crate) fn emit_applied(&self, applied: &AppliedUpdate) {
        let state = &applied.state;
        let Some(update) = state.latest_update.as_ref() else {
            return;
        };
        let events = &self.inner.events;
        events.post(ChannelEvent::ChannelUpdated(ChannelUpdatedPayload {
            channel_address: state.channel_address,
            update_type: update.update_type(),
            nonce: state.nonce,
            state: Box::new(state.clone()),
        }));
        match (&update.details, &applied.transfer) {
            (UpdateDetails::Deposit(details), _) => {
                events.post(ChannelEvent::DepositReconciled(DepositReconciledPayload {
                    channel_address: state.channel_address,
                    asset_id: update.asset_id,
                    balance: state.balance(&update.asset_id),
                    latest_deposit_nonce: details.latest_deposit_nonce,
                }));
            }
            (UpdateDetails::Create(_), Some(transfer)) => {
                let payload = TransferPayload {
                    channel_address: state.channel_address,
                    transfer: Box::new(transfer.clone()),
                    channel_balance: state.balance(&transfer.asset_id),
                };
                if transfer.kind() == TransferKind::Withdraw {
                    events.post(ChannelEvent::WithdrawalCreated(payload.clone()));
                }
                events.post(ChannelEvent::TransferCreated(payload));
            }
            (UpdateDetails::Resolve(_), Some(transfer)) => {
                let payload = TransferPayload {
                    channel_address: state.channel_address,
                    transfer: Box::new(transfer.clone()),
                    channel_balance: state.balance(&transfer.asset_id),
                };
                if transfer.kind() == TransferKind::Withdraw {
                    events.post(ChannelEvent::WithdrawalResolved(payload.clone()));
                }
                events.post(ChannelEvent::TransferResolved(payload));
            }
            _ => {}
        }
    }
}
