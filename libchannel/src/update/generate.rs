use crate::balance::{Balance, ChannelRole};
use crate::crypto::ChannelSigner;
use crate::primitives::Address;
use crate::state::{
    ChannelState, ChannelUpdate, CreateDetails, DepositDetails, ResolveDetails, SetupDetails, UpdateDetails,
};
use crate::transfers::{derive_transfer_id, resolve_balance};
use crate::update::validate::{balance_after_lock, balance_after_resolve, created_transfer, reconciled_deposit_balance};
use crate::update::{
    apply_update, AppliedUpdate, CreateTransferParams, DepositParams, ResolveTransferParams, SetupParams,
    UpdateContext, UpdateError, UpdateParams,
};
use log::*;

/// A freshly generated proposal, signed by its author, along with the state it produces.
#[derive(Clone, Debug)]
pub struct GeneratedUpdate {
    pub update: ChannelUpdate,
    /// The base state the update was built on. For setup updates this is the synthesized zero state.
    pub previous: ChannelState,
    pub applied: AppliedUpdate,
}

/// Builds the update `params` describe on top of `state`, applies it locally and signs the resulting commitment.
///
/// `state` must be `None` for setup and the channel's current state otherwise.
pub fn generate_update(
    params: &UpdateParams,
    state: Option<&ChannelState>,
    ctx: &UpdateContext,
    signer: &dyn ChannelSigner,
) -> Result<GeneratedUpdate, UpdateError> {
    let me = signer.public_identifier();
    let (previous, unsigned) = match (params, state) {
        (UpdateParams::Setup(p), _) => setup_update(p, signer)?,
        (_, None) => return Err(UpdateError::ChannelNotSetup),
        (UpdateParams::Deposit(p), Some(state)) => (state.clone(), deposit_update(p, state, ctx, signer)?),
        (UpdateParams::Create(p), Some(state)) => (state.clone(), create_update(p, state, ctx, signer)?),
        (UpdateParams::Resolve(p), Some(state)) => (state.clone(), resolve_update(p, state, ctx, signer)?),
    };
    let role = previous.role_of(me).ok_or_else(|| UpdateError::NotAParticipant(me.to_string()))?;
    let applied = apply_update(&unsigned, &previous, ctx)?;
    let signature = signer.sign_message(&applied.state.commitment_hash());
    let update = unsigned.with_signature(role, signature);
    debug!("Generated {update}");
    let applied = applied.with_update(update.clone());
    Ok(GeneratedUpdate { update, previous, applied })
}

fn base_update(
    state: &ChannelState,
    me: ChannelRole,
    asset_id: Address,
    balance: Balance,
    details: UpdateDetails,
) -> ChannelUpdate {
    ChannelUpdate {
        channel_address: state.channel_address,
        from_identifier: state.identifier(me).clone(),
        to_identifier: state.identifier(me.counterparty()).clone(),
        nonce: state.nonce + 1,
        asset_id,
        balance,
        details,
        signatures: [None, None],
    }
}

fn my_role(state: &ChannelState, signer: &dyn ChannelSigner) -> Result<ChannelRole, UpdateError> {
    let me = signer.public_identifier();
    state.role_of(me).ok_or_else(|| UpdateError::NotAParticipant(me.to_string()))
}

fn setup_update(
    params: &SetupParams,
    signer: &dyn ChannelSigner,
) -> Result<(ChannelState, ChannelUpdate), UpdateError> {
    let alice = signer.public_identifier().clone();
    if alice == params.counterparty {
        return Err(UpdateError::InvalidSetup("cannot open a channel with yourself".into()));
    }
    let base = ChannelState::base_state(
        alice,
        params.counterparty.clone(),
        params.network_context.clone(),
        params.timeout,
    );
    let details = SetupDetails { network_context: params.network_context.clone(), timeout: params.timeout };
    let update = base_update(&base, ChannelRole::Alice, Address::ZERO, Balance::zero(), UpdateDetails::Setup(details));
    Ok((base, update))
}

fn deposit_update(
    params: &DepositParams,
    state: &ChannelState,
    ctx: &UpdateContext,
    signer: &dyn ChannelSigner,
) -> Result<ChannelUpdate, UpdateError> {
    let me = my_role(state, signer)?;
    let asset = params.asset_id;
    let latest_deposit_nonce = ctx
        .deposits
        .iter()
        .filter(|d| d.asset_id == asset && d.channel_address == state.channel_address)
        .map(|d| d.nonce)
        .max()
        .unwrap_or_default()
        .max(state.deposit_nonce(&asset));
    let balance = reconciled_deposit_balance(state, &asset, ctx, latest_deposit_nonce)?;
    trace!("Reconciling {asset} deposits up to #{latest_deposit_nonce}: {balance}");
    let details = DepositDetails { latest_deposit_nonce };
    Ok(base_update(state, me, asset, balance, UpdateDetails::Deposit(details)))
}

fn create_update(
    params: &CreateTransferParams,
    state: &ChannelState,
    ctx: &UpdateContext,
    signer: &dyn ChannelSigner,
) -> Result<ChannelUpdate, UpdateError> {
    let me = my_role(state, signer)?;
    let registered = ctx.registry.get(&params.transfer_definition)?;
    let nonce = state.nonce + 1;
    let locked = Balance::new(params.amount, Default::default());
    let transfer_id = derive_transfer_id(&state.channel_address, &params.transfer_definition, params.timeout, nonce);
    let balance = balance_after_lock(&state.balance(&params.asset_id), me, &locked)?;
    let mut details = CreateDetails {
        transfer_id,
        transfer_definition: params.transfer_definition,
        transfer_timeout: params.timeout,
        transfer_initial_state: params.initial_state.clone(),
        transfer_encodings: registered.encodings.clone(),
        balance: locked,
        merkle_proof_data: Vec::new(),
        merkle_root: Default::default(),
        meta: params.meta.clone(),
    };
    let mut update = base_update(state, me, params.asset_id, balance, UpdateDetails::Create(Box::new(details.clone())));
    let transfer = created_transfer(&update, state, &details);
    let tree = ctx.tree(Some(&transfer), None);
    details.merkle_root = tree.root();
    details.merkle_proof_data = tree.proof(&transfer.transfer_hash()).map_err(|_| UpdateError::InvalidMerkleProof)?;
    update.details = UpdateDetails::Create(Box::new(details));
    Ok(update)
}

fn resolve_update(
    params: &ResolveTransferParams,
    state: &ChannelState,
    ctx: &UpdateContext,
    signer: &dyn ChannelSigner,
) -> Result<ChannelUpdate, UpdateError> {
    let me = my_role(state, signer)?;
    let transfer = ctx.active_transfer(&params.transfer_id).ok_or(UpdateError::TransferNotFound(params.transfer_id))?;
    if &transfer.responder_identifier != signer.public_identifier() {
        return Err(UpdateError::UnauthorizedResolver);
    }
    let resolved = resolve_balance(transfer, &params.resolver)?;
    let balance = balance_after_resolve(state, transfer, &resolved)?;
    let proof = ctx
        .tree(None, None)
        .proof(&transfer.transfer_hash())
        .map_err(|_| UpdateError::InvalidMerkleProof)?;
    let details = ResolveDetails {
        transfer_id: transfer.transfer_id,
        transfer_definition: transfer.transfer_definition,
        transfer_resolver: params.resolver.clone(),
        merkle_proof_data: proof,
        merkle_root: ctx.tree(None, Some(&transfer.transfer_id)).root(),
        meta: params.meta.clone().unwrap_or_else(|| transfer.meta.clone()),
    };
    Ok(base_update(state, me, transfer.asset_id, balance, UpdateDetails::Resolve(Box::new(details))))
}
