//! The update state machine.
//!
//! Three pure functions drive every channel transition:
//! - [`generate_update`] turns user parameters into a signed proposal,
//! - [`validate_update`] checks a proposal against the current state and the business rules,
//! - [`apply_update`] validates and then produces the next state.
//!
//! None of them perform I/O. Everything they need from storage or the chain is gathered up front into an
//! [`UpdateContext`], which is what makes `apply_update` deterministic: both parties compute bit-identical states,
//! and it is that state they sign.

mod apply;
mod error;
mod generate;
mod validate;

pub use apply::{apply_update, AppliedUpdate};
pub use error::UpdateError;
pub use generate::{generate_update, GeneratedUpdate};
pub use validate::{validate_update, verify_update_signatures};

use crate::amount::Amount;
use crate::chain::DepositRecord;
use crate::merkle::MerkleTree;
use crate::primitives::{Address, Bytes32, PublicIdentifier};
use crate::state::{NetworkContext, UpdateType};
use crate::transfers::{TransferInitialState, TransferMeta, TransferRegistry, TransferResolver, TransferState};
use serde::{Deserialize, Serialize};

/// The shortest dispute window a channel may be set up with, in seconds.
pub const MIN_CHANNEL_TIMEOUT: u64 = 2 * crate::transfers::MIN_TRANSFER_TIMEOUT;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupParams {
    pub counterparty: PublicIdentifier,
    pub timeout: u64,
    pub network_context: NetworkContext,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositParams {
    pub channel_address: Address,
    pub asset_id: Address,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransferParams {
    pub channel_address: Address,
    pub asset_id: Address,
    pub amount: Amount,
    pub transfer_definition: Address,
    pub initial_state: TransferInitialState,
    pub timeout: u64,
    pub meta: TransferMeta,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveTransferParams {
    pub channel_address: Address,
    pub transfer_id: Bytes32,
    pub resolver: TransferResolver,
    /// Replaces the transfer's metadata when present
    pub meta: Option<TransferMeta>,
}

/// What the caller wants to happen to a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateParams {
    Setup(SetupParams),
    Deposit(DepositParams),
    Create(CreateTransferParams),
    Resolve(ResolveTransferParams),
}

impl UpdateParams {
    pub fn update_type(&self) -> UpdateType {
        match self {
            UpdateParams::Setup(_) => UpdateType::Setup,
            UpdateParams::Deposit(_) => UpdateType::Deposit,
            UpdateParams::Create(_) => UpdateType::Create,
            UpdateParams::Resolve(_) => UpdateType::Resolve,
        }
    }
}

/// Everything outside the channel state that generating, validating or applying an update depends on.
#[derive(Clone, Debug, Default)]
pub struct UpdateContext {
    /// The channel's currently active (unresolved) transfers
    pub active_transfers: Vec<TransferState>,
    /// On-chain deposits for the update's asset, as seen by this party
    pub deposits: Vec<DepositRecord>,
    pub registry: TransferRegistry,
}

impl UpdateContext {
    pub fn active_transfer(&self, transfer_id: &Bytes32) -> Option<&TransferState> {
        self.active_transfers.iter().find(|t| &t.transfer_id == transfer_id)
    }

    /// The tree over the active transfers, optionally with one extra leaf and optionally without one.
    pub(crate) fn tree(&self, extra: Option<&TransferState>, excluding: Option<&Bytes32>) -> MerkleTree {
        let leaves = self
            .active_transfers
            .iter()
            .filter(|t| Some(&t.transfer_id) != excluding)
            .chain(extra)
            .map(|t| t.transfer_hash());
        MerkleTree::new(leaves)
    }
}
