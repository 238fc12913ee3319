use crate::state::{ChannelState, ChannelUpdate, UpdateDetails};
use crate::transfers::TransferState;
use crate::update::validate::{created_transfer, resolved_transfer};
use crate::update::{validate_update, UpdateContext, UpdateError};

/// The outcome of applying an update: the next channel state and, for create and resolve updates, the transfer that
/// was opened or closed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedUpdate {
    pub state: ChannelState,
    pub transfer: Option<TransferState>,
}

impl AppliedUpdate {
    /// Record `update` (typically with more signatures than the one applied) as the state's latest update.
    pub fn with_update(mut self, update: ChannelUpdate) -> Self {
        self.state.latest_update = Some(update);
        self
    }
}

/// Validates `update` against `state` and produces the next state.
///
/// `state` is never modified. Given the same inputs, every party computes an identical result.
pub fn apply_update(
    update: &ChannelUpdate,
    state: &ChannelState,
    ctx: &UpdateContext,
) -> Result<AppliedUpdate, UpdateError> {
    validate_update(update, state, ctx)?;
    let asset = update.asset_id;
    let mut next = state.clone();
    next.nonce = update.nonce;
    // The update carries the resultant balance; it replaces rather than adjusts the stored one
    next.balances.insert(asset, update.balance);
    if !next.asset_ids.contains(&asset) {
        next.asset_ids.push(asset);
    }
    let transfer = match &update.details {
        UpdateDetails::Setup(details) => {
            next.network_context = details.network_context.clone();
            next.timeout = details.timeout;
            None
        }
        UpdateDetails::Deposit(details) => {
            next.latest_deposit_nonce.insert(asset, details.latest_deposit_nonce);
            None
        }
        UpdateDetails::Create(details) => {
            let transfer = created_transfer(update, state, details);
            let locked = state.locked(&asset).checked_add(transfer.locked_amount()).ok_or(UpdateError::Overflow)?;
            next.locked_value.insert(asset, locked);
            next.merkle_root = details.merkle_root;
            Some(transfer)
        }
        UpdateDetails::Resolve(details) => {
            let transfer = resolved_transfer(details, ctx)?;
            let locked =
                state.locked(&asset).checked_sub(transfer.locked_amount()).ok_or(UpdateError::InsufficientFunds)?;
            next.locked_value.insert(asset, locked);
            next.merkle_root = details.merkle_root;
            Some(transfer)
        }
    };
    next.latest_update = Some(update.clone());
    Ok(AppliedUpdate { state: next, transfer })
}
