//! Scripted runs of the channel protocol between two in-process engines.
//!
//! A scenario file looks like this:
//!
//! ```yaml
//! timeout: 14400
//! steps:
//!   - action: deposit
//!     party: alice
//!     amount: 100
//!   - action: hashlock
//!     from: alice
//!     amount: 30
//!   - action: unlock
//!     transfer: 0
//!   - action: withdraw
//!     party: bob
//!     amount: 20
//!     fee: 1
//!   - action: dispute
//!     party: alice
//! ```
//!
//! Transfers are numbered in the order the `hashlock` steps create them.

use crate::error::CliError;
use libchannel::amount::Amount;
use libchannel::chain::MemoryChain;
use libchannel::crypto::{ChannelSigner, KeySigner};
use libchannel::hashes::hash32;
use libchannel::lock::MemoryLockService;
use libchannel::messaging::MemoryNetwork;
use libchannel::primitives::{Address, Bytes32};
use libchannel::state::{ChannelState, NetworkContext};
use libchannel::storage::ChannelStore;
use libchannel::transfers::{
    HashlockState, RegisteredTransfer, TransferInitialState, TransferKind, TransferMeta, TransferRegistry,
    TransferResolver, WithdrawState, MIN_TRANSFER_TIMEOUT,
};
use libchannel::update::{CreateTransferParams, ResolveTransferParams, MIN_CHANNEL_TIMEOUT};
use libchannel::{ChannelEngine, EngineConfig};
use log::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Alice,
    Bob,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Deposit on-chain and reconcile the deposit into the channel.
    Deposit {
        party: Party,
        amount: u64,
        #[serde(default)]
        asset: Address,
    },
    /// Lock `amount` in a hashlock transfer to the counterparty.
    Hashlock {
        from: Party,
        amount: u64,
        #[serde(default)]
        routing_id: Option<Bytes32>,
    },
    /// Resolve a hashlock with its pre-image, or return the funds when `cancel` is set.
    Unlock {
        transfer: usize,
        #[serde(default)]
        cancel: bool,
    },
    /// Withdraw `amount` from the channel. The counterparty countersigns and keeps `fee`.
    Withdraw {
        party: Party,
        amount: u64,
        #[serde(default)]
        fee: u64,
    },
    Dispute {
        party: Party,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_network")]
    pub network: NetworkContext,
    pub steps: Vec<Step>,
}

fn default_timeout() -> u64 {
    2 * MIN_CHANNEL_TIMEOUT
}

fn default_network() -> NetworkContext {
    NetworkContext {
        chain_id: 1337,
        channel_factory_address: Address::derive_from(b"ChannelFactory"),
        transfer_registry_address: Address::derive_from(b"TransferRegistry"),
    }
}

impl Scenario {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CliError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_yml::from_reader(std::io::BufReader::new(file))?)
    }
}

pub fn hashlock_definition() -> Address {
    Address::derive_from(b"HashlockTransfer")
}

pub fn withdraw_definition() -> Address {
    Address::derive_from(b"Withdraw")
}

type Engine<S> = ChannelEngine<S, MemoryNetwork, MemoryLockService, MemoryChain>;

struct OpenHashlock {
    transfer_id: Bytes32,
    pre_image: Bytes32,
    responder: Party,
}

/// Two engines wired together over the in-memory network and chain.
pub struct Simulation<S: ChannelStore> {
    chain: MemoryChain,
    alice: Engine<S>,
    bob: Engine<S>,
    hashlocks: Vec<OpenHashlock>,
}

impl<S: ChannelStore> Simulation<S> {
    pub fn new(alice: (KeySigner, S), bob: (KeySigner, S), chain_id: u64) -> Self {
        let network = MemoryNetwork::new();
        let registry = TransferRegistry::new(vec![
            RegisteredTransfer::hashlock(hashlock_definition()),
            RegisteredTransfer::withdraw(withdraw_definition()),
        ]);
        let chain = MemoryChain::new(chain_id, registry);
        let start = |(signer, store): (KeySigner, S)| {
            let inbox = network.register(signer.public_identifier().clone());
            let engine = ChannelEngine::new(
                Arc::new(signer),
                store,
                network.clone(),
                MemoryLockService::new(),
                chain.clone(),
                EngineConfig::default(),
            );
            engine.start(inbox);
            engine
        };
        let alice = start(alice);
        let bob = start(bob);
        Simulation { chain, alice, bob, hashlocks: Vec::new() }
    }

    fn engine(&self, party: Party) -> &Engine<S> {
        match party {
            Party::Alice => &self.alice,
            Party::Bob => &self.bob,
        }
    }

    /// Sets up the channel and plays every step. Returns alice's final copy of the channel.
    pub async fn run(&mut self, scenario: &Scenario) -> Result<ChannelState, CliError> {
        let bob = self.bob.public_identifier().clone();
        let state = self.alice.setup(bob, scenario.timeout, scenario.network.clone()).await?;
        let channel = state.channel_address;
        info!("Channel {channel} set up");
        for (i, step) in scenario.steps.iter().enumerate() {
            debug!("Step {i}: {step:?}");
            self.play(channel, i, step).await?;
        }
        Ok(self.alice.get_channel(&channel)?.unwrap_or(state))
    }

    async fn play(&mut self, channel: Address, index: usize, step: &Step) -> Result<(), CliError> {
        match step {
            Step::Deposit { party, amount, asset } => {
                let engine = self.engine(*party);
                self.chain.deposit(channel, *asset, engine.signer_address(), Amount::from_units(*amount));
                let state = engine.deposit(channel, *asset).await?;
                println!("{party:?} deposited {amount}. Balance: {}", state.balance(asset));
            }
            Step::Hashlock { from, amount, routing_id } => {
                let pre_image = Bytes32::random();
                let params = CreateTransferParams {
                    channel_address: channel,
                    asset_id: Address::ZERO,
                    amount: Amount::from_units(*amount),
                    transfer_definition: hashlock_definition(),
                    initial_state: TransferInitialState::Hashlock(HashlockState {
                        lock_hash: hash32(pre_image.as_bytes()),
                        expiry: 0,
                    }),
                    timeout: MIN_TRANSFER_TIMEOUT,
                    meta: TransferMeta { routing_id: *routing_id, note: None },
                };
                let applied = self.engine(*from).create_transfer(params).await?;
                let transfer = applied.transfer.ok_or_else(|| scenario_error(index, "no transfer was created"))?;
                println!("Transfer #{} ({}) locks {amount}", self.hashlocks.len(), transfer.transfer_id);
                let responder = if *from == Party::Alice { Party::Bob } else { Party::Alice };
                self.hashlocks.push(OpenHashlock { transfer_id: transfer.transfer_id, pre_image, responder });
            }
            Step::Unlock { transfer, cancel } => {
                let open = self
                    .hashlocks
                    .get(*transfer)
                    .ok_or_else(|| scenario_error(index, &format!("there is no transfer #{transfer}")))?;
                let resolver = if *cancel {
                    TransferResolver::cancel(TransferKind::Hashlock)
                } else {
                    TransferResolver::Hashlock { pre_image: open.pre_image }
                };
                let params = ResolveTransferParams {
                    channel_address: channel,
                    transfer_id: open.transfer_id,
                    resolver,
                    meta: None,
                };
                let applied = self.engine(open.responder).resolve_transfer(params).await?;
                println!("Transfer #{transfer} resolved. Balance: {}", applied.state.balance(&Address::ZERO));
            }
            Step::Withdraw { party, amount, fee } => {
                let engine = self.engine(*party);
                let params = CreateTransferParams {
                    channel_address: channel,
                    asset_id: Address::ZERO,
                    amount: Amount::from_units(*amount),
                    transfer_definition: withdraw_definition(),
                    initial_state: TransferInitialState::Withdraw(WithdrawState {
                        recipient: engine.signer_address(),
                        fee: Amount::from_units(*fee),
                        nonce: engine.get_channel(&channel)?.map(|s| s.nonce).unwrap_or_default(),
                    }),
                    timeout: MIN_TRANSFER_TIMEOUT,
                    meta: TransferMeta::default(),
                };
                let applied = engine.create_transfer(params).await?;
                let transfer = applied.transfer.ok_or_else(|| scenario_error(index, "no withdrawal was created"))?;
                let counterparty = if *party == Party::Alice { Party::Bob } else { Party::Alice };
                let applied = self.engine(counterparty).resolve_withdrawal(channel, transfer.transfer_id).await?;
                println!("{party:?} withdrew {amount}. Balance: {}", applied.state.balance(&Address::ZERO));
            }
            Step::Dispute { party } => {
                let tx = self.engine(*party).dispute_channel(channel).await?;
                println!("{party:?} disputed the channel in {tx}");
            }
        }
        Ok(())
    }
}

fn scenario_error(step: usize, reason: &str) -> CliError {
    CliError::Scenario { step, reason: reason.to_string() }
}
