//! Two engines talking over an in-process network and chain.

mod channel_flow_tests;

use crate::amount::Amount;
use crate::chain::MemoryChain;
use crate::crypto::{ChannelSigner, KeySigner};
use crate::engine::{ChannelEngine, EngineConfig};
use crate::hashes::hash32;
use crate::lock::MemoryLockService;
use crate::messaging::MemoryNetwork;
use crate::primitives::{Address, Bytes32};
use crate::state::test_helpers::network_context;
use crate::state::ChannelState;
use crate::storage::{ChannelStore, MemoryStore};
use crate::transfers::{
    HashlockState, RegisteredTransfer, TransferInitialState, TransferMeta, TransferRegistry, WithdrawState,
    MIN_TRANSFER_TIMEOUT,
};
use crate::update::{CreateTransferParams, MIN_CHANNEL_TIMEOUT};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub type Engine = ChannelEngine<MemoryStore, MemoryNetwork, MemoryLockService, MemoryChain>;

pub const CHANNEL_TIMEOUT: u64 = 2 * MIN_CHANNEL_TIMEOUT;

pub fn hashlock_definition() -> Address {
    Address::derive_from(b"HashlockTransfer")
}

pub fn withdraw_definition() -> Address {
    Address::derive_from(b"Withdraw")
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        message_retries: 3,
        retry_delay: Duration::from_millis(10),
        response_timeout: Duration::from_secs(5),
        max_sync_retries: 1,
    }
}

pub struct Party {
    pub signer: Arc<KeySigner>,
    pub store: MemoryStore,
    pub engine: Engine,
    pub handle: JoinHandle<()>,
}

impl Party {
    fn new(network: &MemoryNetwork, chain: &MemoryChain, config: EngineConfig) -> Self {
        let signer = Arc::new(KeySigner::random());
        let store = MemoryStore::new();
        let engine = ChannelEngine::new(
            Arc::clone(&signer) as Arc<dyn ChannelSigner>,
            store.clone(),
            network.clone(),
            MemoryLockService::new(),
            chain.clone(),
            config,
        );
        let inbox = network.register(signer.public_identifier().clone());
        let handle = engine.start(inbox);
        Party { signer, store, engine, handle }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn channel(&self, channel: &Address) -> ChannelState {
        self.store.get_channel_state(channel).unwrap().expect("channel to be stored")
    }

    /// Overwrites the stored channel, as if restored from an old backup.
    pub fn restore(&self, snapshot: &ChannelState) {
        self.store.save_channel_state(snapshot, None).unwrap();
    }
}

pub struct World {
    pub network: MemoryNetwork,
    pub chain: MemoryChain,
    pub alice: Party,
    pub bob: Party,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        env_logger::try_init().ok();
        let network = MemoryNetwork::new();
        let registry = TransferRegistry::new(vec![
            RegisteredTransfer::hashlock(hashlock_definition()),
            RegisteredTransfer::withdraw(withdraw_definition()),
        ]);
        let chain = MemoryChain::new(network_context().chain_id, registry);
        let alice = Party::new(&network, &chain, config.clone());
        let bob = Party::new(&network, &chain, config);
        World { network, chain, alice, bob }
    }

    /// Alice sets up a channel with bob and returns its address.
    pub async fn setup(&self) -> Address {
        let bob = self.bob.signer.public_identifier().clone();
        let state = self.alice.engine.setup(bob, CHANNEL_TIMEOUT, network_context()).await.unwrap();
        state.channel_address
    }

    /// Deposits `amount` on-chain from `depositor` and has `reconciler` bring it into the channel.
    pub async fn deposit(&self, channel: Address, depositor: &Party, reconciler: &Party, amount: u64) -> ChannelState {
        self.chain.deposit(channel, Address::ZERO, depositor.address(), Amount::from_units(amount));
        reconciler.engine.deposit(channel, Address::ZERO).await.unwrap()
    }

    /// A channel holding `[alice, bob]` units.
    pub async fn funded(&self, alice: u64, bob: u64) -> Address {
        let channel = self.setup().await;
        if alice > 0 {
            self.deposit(channel, &self.alice, &self.alice, alice).await;
        }
        if bob > 0 {
            self.deposit(channel, &self.bob, &self.bob, bob).await;
        }
        channel
    }
}

pub fn hashlock_params(
    channel: Address,
    amount: u64,
    pre_image: &Bytes32,
    routing_id: Option<Bytes32>,
) -> CreateTransferParams {
    CreateTransferParams {
        channel_address: channel,
        asset_id: Address::ZERO,
        amount: Amount::from_units(amount),
        transfer_definition: hashlock_definition(),
        initial_state: TransferInitialState::Hashlock(HashlockState {
            lock_hash: hash32(pre_image.as_bytes()),
            expiry: 0,
        }),
        timeout: MIN_TRANSFER_TIMEOUT,
        meta: TransferMeta { routing_id, note: None },
    }
}

pub fn withdraw_params(channel: Address, amount: u64, fee: u64, recipient: Address) -> CreateTransferParams {
    CreateTransferParams {
        channel_address: channel,
        asset_id: Address::ZERO,
        amount: Amount::from_units(amount),
        transfer_definition: withdraw_definition(),
        initial_state: TransferInitialState::Withdraw(WithdrawState {
            recipient,
            fee: Amount::from_units(fee),
            nonce: 1,
        }),
        timeout: MIN_TRANSFER_TIMEOUT,
        meta: TransferMeta::default(),
    }
}

/// Both parties hold the same, fully signed channel.
pub fn assert_in_sync(world: &World, channel: &Address) {
    let alice = world.alice.channel(channel);
    let bob = world.bob.channel(channel);
    assert_eq!(alice.nonce, bob.nonce);
    assert_eq!(alice.commitment_hash(), bob.commitment_hash());
    assert_eq!(alice.latest_update, bob.latest_update);
    assert!(alice.latest_update.as_ref().unwrap().is_double_signed());
}
