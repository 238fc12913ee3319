use crate::balance::{Balance, ChannelRole};
use crate::crypto::verify_signature;
use crate::merkle::verify_proof;
use crate::primitives::Address;
use crate::state::{
    derive_channel_address, ChannelState, ChannelUpdate, CreateDetails, DepositDetails, ResolveDetails,
    SetupDetails, UpdateDetails, UpdateType,
};
use crate::transfers::{
    derive_transfer_id, resolve_balance, validate_initial_state, TransferState,
    MIN_TRANSFER_TIMEOUT,
};
use crate::update::{UpdateContext, UpdateError, MIN_CHANNEL_TIMEOUT};
use log::*;

/// Checks `update` against `state` (the state it would be applied to) and the business rules of its type.
///
/// For setup updates, `state` is the base state both parties synthesize from the update's details.
/// Signatures are not checked here; see [`verify_update_signatures`].
pub fn validate_update(update: &ChannelUpdate, state: &ChannelState, ctx: &UpdateContext) -> Result<(), UpdateError> {
    validate_structure(update, state)?;
    match &update.details {
        UpdateDetails::Setup(details) => validate_setup(update, state, details),
        UpdateDetails::Deposit(details) => validate_deposit(update, state, details, ctx),
        UpdateDetails::Create(details) => validate_create(update, state, details, ctx).map(|_| ()),
        UpdateDetails::Resolve(details) => validate_resolve(update, state, details, ctx).map(|_| ()),
    }
}

fn validate_structure(update: &ChannelUpdate, state: &ChannelState) -> Result<(), UpdateError> {
    if update.channel_address != state.channel_address {
        return Err(UpdateError::ChannelAddressMismatch {
            expected: state.channel_address,
            actual: update.channel_address,
        });
    }
    let from = state.role_of(&update.from_identifier);
    let to = state.role_of(&update.to_identifier);
    match (from, to) {
        (Some(f), Some(t)) if f != t => {}
        _ => return Err(UpdateError::IdentifierMismatch),
    }
    let expected = state.nonce + 1;
    if update.nonce != expected {
        return Err(UpdateError::InvalidNonce { expected, actual: update.nonce });
    }
    // Setup is the first update and only the first update
    let is_setup = update.update_type() == UpdateType::Setup;
    if is_setup != (state.nonce == 0) {
        return Err(UpdateError::InvalidUpdateType(update.update_type(), state.nonce));
    }
    Ok(())
}

fn validate_setup(update: &ChannelUpdate, state: &ChannelState, details: &SetupDetails) -> Result<(), UpdateError> {
    if state.role_of(&update.from_identifier) != Some(ChannelRole::Alice) {
        return Err(UpdateError::InvalidSetup("setup must be proposed by alice".into()));
    }
    if details.network_context != state.network_context || details.timeout != state.timeout {
        return Err(UpdateError::InvalidSetup("details do not match the channel being set up".into()));
    }
    let derived = derive_channel_address(&details.network_context, &state.participants);
    if derived != update.channel_address {
        return Err(UpdateError::ChannelAddressMismatch { expected: derived, actual: update.channel_address });
    }
    if details.timeout < MIN_CHANNEL_TIMEOUT {
        return Err(UpdateError::InvalidSetup(format!(
            "timeout {} is shorter than the minimum of {MIN_CHANNEL_TIMEOUT}",
            details.timeout
        )));
    }
    if update.balance != Balance::zero() {
        return Err(UpdateError::BalanceMismatch { expected: Balance::zero(), actual: update.balance });
    }
    Ok(())
}

/// Credits each side with its on-chain deposits that have not yet been reconciled into the channel.
///
/// Deposits from either participant's signing address credit that participant. Anything else sent to the channel
/// address is credited to bob, since only alice's deposits are attributable on-chain.
pub(crate) fn reconciled_deposit_balance(
    state: &ChannelState,
    update_asset: &Address,
    ctx: &UpdateContext,
    up_to: u64,
) -> Result<Balance, UpdateError> {
    let from_nonce = state.deposit_nonce(update_asset);
    let mut balance = state.balance(update_asset);
    for record in ctx
        .deposits
        .iter()
        .filter(|d| &d.asset_id == update_asset && d.channel_address == state.channel_address)
        .filter(|d| d.nonce > from_nonce && d.nonce <= up_to)
    {
        let side = if state.role_of_address(&record.depositor) == Some(ChannelRole::Alice) {
            ChannelRole::Alice
        } else {
            ChannelRole::Bob
        };
        balance = balance.credit(side, record.amount).ok_or(UpdateError::Overflow)?;
    }
    Ok(balance)
}

fn validate_deposit(
    update: &ChannelUpdate,
    state: &ChannelState,
    details: &DepositDetails,
    ctx: &UpdateContext,
) -> Result<(), UpdateError> {
    let current = state.deposit_nonce(&update.asset_id);
    if details.latest_deposit_nonce < current {
        return Err(UpdateError::InvalidDeposit(format!(
            "deposit nonce {} is behind the reconciled nonce {current}",
            details.latest_deposit_nonce
        )));
    }
    if details.latest_deposit_nonce > current
        && !ctx.deposits.iter().any(|d| d.asset_id == update.asset_id && d.nonce == details.latest_deposit_nonce)
    {
        return Err(UpdateError::InvalidDeposit(format!(
            "deposit #{} for {} has not been seen on chain",
            details.latest_deposit_nonce, update.asset_id
        )));
    }
    let expected = reconciled_deposit_balance(state, &update.asset_id, ctx, details.latest_deposit_nonce)?;
    if expected != update.balance {
        return Err(UpdateError::BalanceMismatch { expected, actual: update.balance });
    }
    Ok(())
}

/// Rebuilds the transfer a create update describes, as both parties will store it.
pub(crate) fn created_transfer(update: &ChannelUpdate, state: &ChannelState, details: &CreateDetails) -> TransferState {
    let initiator = state.role_of(&update.from_identifier).unwrap_or(ChannelRole::Alice);
    let responder = initiator.counterparty();
    TransferState {
        transfer_id: details.transfer_id,
        channel_address: state.channel_address,
        chain_id: state.network_context.chain_id,
        asset_id: update.asset_id,
        initiator: *state.participant(initiator),
        responder: *state.participant(responder),
        initiator_identifier: state.identifier(initiator).clone(),
        responder_identifier: state.identifier(responder).clone(),
        balance: details.balance,
        transfer_definition: details.transfer_definition,
        transfer_timeout: details.transfer_timeout,
        initial_state: details.transfer_initial_state.clone(),
        transfer_encodings: details.transfer_encodings.clone(),
        transfer_resolver: None,
        channel_nonce: update.nonce,
        meta: details.meta.clone(),
    }
}

/// The channel balance after the initiator and responder lock their shares of `locked`.
pub(crate) fn balance_after_lock(
    current: &Balance,
    initiator: ChannelRole,
    locked: &Balance,
) -> Result<Balance, UpdateError> {
    current
        .debit(initiator, locked.amounts[0])
        .and_then(|b| b.debit(initiator.counterparty(), locked.amounts[1]))
        .ok_or(UpdateError::InsufficientFunds)
}

fn validate_create(
    update: &ChannelUpdate,
    state: &ChannelState,
    details: &CreateDetails,
    ctx: &UpdateContext,
) -> Result<TransferState, UpdateError> {
    let registered = ctx.registry.get(&details.transfer_definition)?;
    if registered.encodings != details.transfer_encodings {
        return Err(UpdateError::InvalidTransferDetails("transfer encodings do not match the registry".into()));
    }
    validate_initial_state(registered, &details.transfer_initial_state, &details.balance)?;
    let locked = details.balance.total().ok_or(UpdateError::Overflow)?;
    if locked.is_zero() {
        return Err(UpdateError::ZeroTransferAmount);
    }
    if details.transfer_timeout < MIN_TRANSFER_TIMEOUT || details.transfer_timeout > state.timeout {
        return Err(UpdateError::InvalidTransferTimeout {
            timeout: details.transfer_timeout,
            min: MIN_TRANSFER_TIMEOUT,
            max: state.timeout,
        });
    }
    let expected_id = derive_transfer_id(
        &state.channel_address,
        &details.transfer_definition,
        details.transfer_timeout,
        update.nonce,
    );
    if expected_id != details.transfer_id {
        return Err(UpdateError::InvalidTransferDetails(format!(
            "transfer id should be {expected_id}, not {}",
            details.transfer_id
        )));
    }
    if ctx.active_transfer(&details.transfer_id).is_some() {
        return Err(UpdateError::DuplicateTransfer(details.transfer_id));
    }
    let initiator = state.role_of(&update.from_identifier).ok_or(UpdateError::IdentifierMismatch)?;
    let expected = balance_after_lock(&state.balance(&update.asset_id), initiator, &details.balance)?;
    if expected != update.balance {
        return Err(UpdateError::BalanceMismatch { expected, actual: update.balance });
    }
    state.locked(&update.asset_id).checked_add(locked).ok_or(UpdateError::Overflow)?;

    let transfer = created_transfer(update, state, details);
    let tree = ctx.tree(Some(&transfer), None);
    if tree.root() != details.merkle_root {
        return Err(UpdateError::MerkleRootMismatch { expected: tree.root(), actual: details.merkle_root });
    }
    if !verify_proof(&details.merkle_root, &transfer.transfer_hash(), &details.merkle_proof_data) {
        return Err(UpdateError::InvalidMerkleProof);
    }
    Ok(transfer)
}

/// The channel balance after `transfer` pays out `resolved`, which is `[initiator, responder]`.
pub(crate) fn balance_after_resolve(
    state: &ChannelState,
    transfer: &TransferState,
    resolved: &Balance,
) -> Result<Balance, UpdateError> {
    let initiator = state
        .role_of_address(&transfer.initiator)
        .ok_or_else(|| UpdateError::NotAParticipant(transfer.initiator.to_string()))?;
    state
        .balance(&transfer.asset_id)
        .credit(initiator, resolved.amounts[0])
        .and_then(|b| b.credit(initiator.counterparty(), resolved.amounts[1]))
        .ok_or(UpdateError::Overflow)
}

fn validate_resolve<'a>(
    update: &ChannelUpdate,
    state: &ChannelState,
    details: &ResolveDetails,
    ctx: &'a UpdateContext,
) -> Result<&'a TransferState, UpdateError> {
    let transfer = ctx.active_transfer(&details.transfer_id).ok_or(UpdateError::TransferNotFound(details.transfer_id))?;
    if transfer.channel_address != state.channel_address {
        return Err(UpdateError::InvalidTransferDetails("transfer belongs to another channel".into()));
    }
    if transfer.transfer_definition != details.transfer_definition {
        return Err(UpdateError::InvalidTransferDetails("transfer definition mismatch".into()));
    }
    if transfer.asset_id != update.asset_id {
        return Err(UpdateError::InvalidTransferDetails("asset id does not match the transfer".into()));
    }
    if update.from_identifier != transfer.responder_identifier {
        return Err(UpdateError::UnauthorizedResolver);
    }
    let resolved = resolve_balance(transfer, &details.transfer_resolver)?;
    let expected = balance_after_resolve(state, transfer, &resolved)?;
    if expected != update.balance {
        return Err(UpdateError::BalanceMismatch { expected, actual: update.balance });
    }
    if state.locked(&update.asset_id) < transfer.locked_amount() {
        return Err(UpdateError::InsufficientFunds);
    }
    if !verify_proof(&state.merkle_root, &transfer.transfer_hash(), &details.merkle_proof_data) {
        return Err(UpdateError::InvalidMerkleProof);
    }
    let remaining = ctx.tree(None, Some(&details.transfer_id)).root();
    if remaining != details.merkle_root {
        return Err(UpdateError::MerkleRootMismatch { expected: remaining, actual: details.merkle_root });
    }
    Ok(transfer)
}

/// The resolved copy of the transfer a resolve update closes.
pub(crate) fn resolved_transfer(details: &ResolveDetails, ctx: &UpdateContext) -> Result<TransferState, UpdateError> {
    let mut transfer =
        ctx.active_transfer(&details.transfer_id).cloned().ok_or(UpdateError::TransferNotFound(details.transfer_id))?;
    transfer.transfer_resolver = Some(details.transfer_resolver.clone());
    transfer.meta = details.meta.clone();
    Ok(transfer)
}

/// Checks the signatures on `update` over the commitment of `resultant`, the state the update produces.
///
/// The proposer's signature is always required. With `require_both`, the counterparty's is too.
pub fn verify_update_signatures(
    update: &ChannelUpdate,
    resultant: &ChannelState,
    require_both: bool,
) -> Result<(), UpdateError> {
    let proposer = resultant.role_of(&update.from_identifier).ok_or(UpdateError::IdentifierMismatch)?;
    let commitment = resultant.commitment_hash();
    for role in [ChannelRole::Alice, ChannelRole::Bob] {
        match update.signature(role) {
            Some(sig) => {
                if !verify_signature(&commitment, sig, resultant.identifier(role)) {
                    warn!("Invalid {role} signature on {update}");
                    return Err(UpdateError::InvalidSignature(role));
                }
            }
            None if role == proposer || require_both => return Err(UpdateError::MissingSignature(role)),
            None => {}
        }
    }
    Ok(())
}
