//! The public face of the channel protocol: one [`ChannelEngine`] per local participant.
//!
//! Every locally-initiated update goes through the lock-guarded executor: the channel's lock is taken, the update is
//! generated from the stored state, sent to the counterparty by the sync engine, and the lock is released once the
//! counterparty has acknowledged or rejected it. Counterparty-initiated updates arrive on the inbox passed to
//! [`ChannelEngine::start`].

use crate::chain::ChainService;
use crate::crypto::{ChannelSignature, ChannelSigner};
use crate::error::EngineError;
use crate::events::{ChannelDisputedPayload, ChannelEvent, EventBus};
use crate::lock::{ChannelMutexes, LockService};
use crate::messaging::{Inbox, MessagingService};
use crate::primitives::{Address, Bytes32, PublicIdentifier};
use crate::state::{derive_channel_address, ChannelState, NetworkContext};
use crate::storage::ChannelStore;
use crate::sync::{OutboundResult, PendingProposals};
use crate::transfers::{withdrawal_commitment, TransferKind, TransferResolver, TransferState};
use crate::update::{
    generate_update, AppliedUpdate, CreateTransferParams, DepositParams, ResolveTransferParams, SetupParams,
    UpdateParams,
};
use futures::StreamExt;
use log::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How many times a proposal is handed to the messaging service before giving up
    pub message_retries: usize,
    pub retry_delay: Duration,
    /// How long to wait for the counterparty to acknowledge or reject a proposal
    pub response_timeout: Duration,
    /// How many times an update is regenerated after the counterparty reports that we are behind
    pub max_sync_retries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            message_retries: 5,
            retry_delay: Duration::from_secs(3),
            response_timeout: Duration::from_secs(60),
            max_sync_retries: 1,
        }
    }
}

pub(crate) struct EngineInner<S, M, L, C> {
    pub(crate) signer: Arc<dyn ChannelSigner>,
    pub(crate) store: S,
    pub(crate) messaging: M,
    pub(crate) locks: L,
    pub(crate) chain: C,
    pub(crate) events: EventBus,
    pub(crate) pending: PendingProposals,
    /// Serialises read-apply-write cycles on one channel between the inbound loop and outbound merges.
    pub(crate) apply_locks: ChannelMutexes,
    pub(crate) config: EngineConfig,
}

pub struct ChannelEngine<S, M, L, C> {
    pub(crate) inner: Arc<EngineInner<S, M, L, C>>,
}

impl<S, M, L, C> Clone for ChannelEngine<S, M, L, C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S, M, L, C> ChannelEngine<S, M, L, C>
where
    S: ChannelStore,
    M: MessagingService,
    L: LockService,
    C: ChainService,
{
    pub fn new(
        signer: Arc<dyn ChannelSigner>,
        store: S,
        messaging: M,
        locks: L,
        chain: C,
        config: EngineConfig,
    ) -> Self {
        let inner = EngineInner {
            signer,
            store,
            messaging,
            locks,
            chain,
            events: EventBus::new(),
            pending: PendingProposals::default(),
            apply_locks: ChannelMutexes::default(),
            config,
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn public_identifier(&self) -> &PublicIdentifier {
        self.inner.signer.public_identifier()
    }

    pub fn signer_address(&self) -> Address {
        self.inner.signer.address()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Spawns the inbound loop. Messages are handled one at a time, in the order they arrive.
    pub fn start(&self, mut inbox: Inbox) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            info!("Channel engine for {} started", engine.public_identifier());
            while let Some(message) = inbox.next().await {
                engine.inbound(message).await;
            }
            info!("Inbox for {} closed. Channel engine stopped.", engine.public_identifier());
        })
    }

    //----------------------------------------   Channel operations   ----------------------------------------------//

    /// Proposes a new channel with `counterparty`. The local participant becomes alice.
    pub async fn setup(
        &self,
        counterparty: PublicIdentifier,
        timeout: u64,
        network_context: NetworkContext,
    ) -> Result<ChannelState, EngineError> {
        let params = UpdateParams::Setup(SetupParams { counterparty, timeout, network_context });
        Ok(self.execute(params).await?.state)
    }

    /// Reconciles on-chain deposits of `asset_id` into the channel balance.
    pub async fn deposit(&self, channel_address: Address, asset_id: Address) -> Result<ChannelState, EngineError> {
        let params = UpdateParams::Deposit(DepositParams { channel_address, asset_id });
        Ok(self.execute(params).await?.state)
    }

    pub async fn create_transfer(&self, params: CreateTransferParams) -> Result<AppliedUpdate, EngineError> {
        self.execute(UpdateParams::Create(params)).await
    }

    pub async fn resolve_transfer(&self, params: ResolveTransferParams) -> Result<AppliedUpdate, EngineError> {
        self.execute(UpdateParams::Resolve(params)).await
    }

    /// Signs the withdrawal commitment of `transfer_id`, as its responder. The result is what goes into the
    /// withdrawal's resolver.
    pub fn sign_withdrawal(&self, transfer_id: &Bytes32) -> Result<ChannelSignature, EngineError> {
        let transfer = self.get_transfer(transfer_id)?.ok_or(EngineError::TransferNotFound(*transfer_id))?;
        if transfer.kind() != TransferKind::Withdraw {
            return Err(EngineError::NotAWithdrawal(*transfer_id));
        }
        if &transfer.responder_identifier != self.public_identifier() {
            return Err(EngineError::NotTheResponder(*transfer_id));
        }
        let commitment = withdrawal_commitment(&transfer).ok_or(EngineError::NotAWithdrawal(*transfer_id))?;
        Ok(self.inner.signer.sign_message(&commitment))
    }

    /// Signs and resolves a withdrawal in one step.
    pub async fn resolve_withdrawal(
        &self,
        channel_address: Address,
        transfer_id: Bytes32,
    ) -> Result<AppliedUpdate, EngineError> {
        let signature = self.sign_withdrawal(&transfer_id)?;
        let resolver = TransferResolver::Withdraw { responder_signature: Some(signature) };
        self.resolve_transfer(ResolveTransferParams { channel_address, transfer_id, resolver, meta: None }).await
    }

    /// Lodges the latest double-signed state and its open transfers on-chain. Adjudication happens there.
    pub async fn dispute_channel(&self, channel_address: Address) -> Result<Bytes32, EngineError> {
        let state = self.get_channel(&channel_address)?.ok_or(EngineError::ChannelNotFound(channel_address))?;
        if !state.latest_update.as_ref().is_some_and(|u| u.is_double_signed()) {
            return Err(EngineError::NoDisputableState(channel_address));
        }
        let active = self.get_active_transfers(&channel_address)?;
        let transaction_hash = self.inner.chain.submit_dispute(&state, &active).await?;
        warn!("Channel {channel_address} disputed at nonce {} in {transaction_hash}", state.nonce);
        self.inner.events.post(ChannelEvent::ChannelDisputed(ChannelDisputedPayload {
            channel_address,
            nonce: state.nonce,
            transaction_hash,
        }));
        Ok(transaction_hash)
    }

    //-------------------------------------------   Queries   ------------------------------------------------------//

    pub fn get_channel(&self, channel_address: &Address) -> Result<Option<ChannelState>, EngineError> {
        Ok(self.inner.store.get_channel_state(channel_address)?)
    }

    pub fn get_channels(&self) -> Result<Vec<ChannelState>, EngineError> {
        Ok(self.inner.store.get_channel_states()?)
    }

    pub fn get_transfer(&self, transfer_id: &Bytes32) -> Result<Option<TransferState>, EngineError> {
        Ok(self.inner.store.get_transfer_state(transfer_id)?)
    }

    pub fn get_active_transfers(&self, channel_address: &Address) -> Result<Vec<TransferState>, EngineError> {
        Ok(self.inner.store.get_active_transfers(channel_address)?)
    }

    pub fn get_transfers_by_routing_id(&self, routing_id: &Bytes32) -> Result<Vec<TransferState>, EngineError> {
        Ok(self.inner.store.get_transfers_by_routing_id(routing_id)?)
    }

    //------------------------------------   Lock-guarded executor   -----------------------------------------------//

    fn lock_name(&self, params: &UpdateParams) -> Address {
        match params {
            UpdateParams::Setup(p) => {
                let participants = [self.signer_address(), p.counterparty.signer_address()];
                derive_channel_address(&p.network_context, &participants)
            }
            UpdateParams::Deposit(p) => p.channel_address,
            UpdateParams::Create(p) => p.channel_address,
            UpdateParams::Resolve(p) => p.channel_address,
        }
    }

    async fn execute(&self, params: UpdateParams) -> Result<AppliedUpdate, EngineError> {
        let channel = self.lock_name(&params);
        let name = channel.to_string();
        let token = self.inner.locks.acquire_lock(&name).await?;
        trace!("Executing {} update on {channel}", params.update_type());
        let result = self.execute_locked(channel, &params).await;
        if let Err(e) = self.inner.locks.release_lock(&name, token).await {
            error!("Could not release the lock on {channel}: {e}");
        }
        match &result {
            Ok(applied) => {
                debug!("{} update on {channel} complete at nonce {}", params.update_type(), applied.state.nonce)
            }
            Err(e) => warn!("{} update on {channel} failed: {e}", params.update_type()),
        }
        result
    }

    async fn execute_locked(&self, channel: Address, params: &UpdateParams) -> Result<AppliedUpdate, EngineError> {
        let mut attempts = 0;
        loop {
            let stored = self.inner.store.get_channel_state(&channel)?;
            let state = match (params, stored) {
                (UpdateParams::Setup(_), Some(_)) => return Err(EngineError::ChannelAlreadyExists(channel)),
                (UpdateParams::Setup(_), None) => None,
                (_, None) => return Err(EngineError::ChannelNotFound(channel)),
                (_, Some(state)) => Some(state),
            };
            let ctx = match (&state, params) {
                (Some(state), UpdateParams::Deposit(p)) => self.update_context(state, Some(&p.asset_id)).await?,
                (Some(state), _) => self.update_context(state, None).await?,
                (None, _) => Default::default(),
            };
            let generated = generate_update(params, state.as_ref(), &ctx, self.inner.signer.as_ref())?;
            match self.outbound(&generated).await? {
                OutboundResult::Applied(applied) => return Ok(applied),
                OutboundResult::Resynced if matches!(params, UpdateParams::Setup(_)) => {
                    // The counterparty already held the setup we proposed, and it has now been merged
                    let stored = self.inner.store.get_channel_state(&channel)?;
                    let state = stored.ok_or(EngineError::ChannelNotFound(channel))?;
                    return Ok(AppliedUpdate { state, transfer: None });
                }
                OutboundResult::Resynced if attempts < self.inner.config.max_sync_retries => {
                    attempts += 1;
                    debug!("Channel {channel} resynchronised. Regenerating the update (attempt {attempts})");
                }
                OutboundResult::Resynced => {
                    return Err(EngineError::SyncRetriesExhausted { channel, attempts: attempts + 1 });
                }
            }
        }
    }
}
