use crate::balance::{Balance, ChannelRole};
use crate::crypto::ChannelSignature;
use crate::primitives::{Address, Bytes32, PublicIdentifier};
use crate::state::channel::NetworkContext;
use crate::transfers::{TransferInitialState, TransferMeta, TransferResolver};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateType {
    Setup,
    Deposit,
    Create,
    Resolve,
}

impl Display for UpdateType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateType::Setup => write!(f, "setup"),
            UpdateType::Deposit => write!(f, "deposit"),
            UpdateType::Create => write!(f, "create"),
            UpdateType::Resolve => write!(f, "resolve"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupDetails {
    pub network_context: NetworkContext,
    pub timeout: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositDetails {
    pub latest_deposit_nonce: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDetails {
    pub transfer_id: Bytes32,
    pub transfer_definition: Address,
    pub transfer_timeout: u64,
    pub transfer_initial_state: TransferInitialState,
    pub transfer_encodings: [String; 2],
    /// The locked balance, `[initiator, responder]`
    pub balance: Balance,
    /// Proof of the new transfer's membership under `merkle_root`
    pub merkle_proof_data: Vec<Bytes32>,
    pub merkle_root: Bytes32,
    pub meta: TransferMeta,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveDetails {
    pub transfer_id: Bytes32,
    pub transfer_definition: Address,
    pub transfer_resolver: TransferResolver,
    /// Proof of the resolved transfer's membership under the channel's previous root
    pub merkle_proof_data: Vec<Bytes32>,
    /// The root over the remaining open transfers
    pub merkle_root: Bytes32,
    pub meta: TransferMeta,
}

/// The type-specific payload of an update. The variant is the update's type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateDetails {
    Setup(SetupDetails),
    Deposit(DepositDetails),
    Create(Box<CreateDetails>),
    Resolve(Box<ResolveDetails>),
}

impl UpdateDetails {
    pub fn update_type(&self) -> UpdateType {
        match self {
            UpdateDetails::Setup(_) => UpdateType::Setup,
            UpdateDetails::Deposit(_) => UpdateType::Deposit,
            UpdateDetails::Create(_) => UpdateType::Create,
            UpdateDetails::Resolve(_) => UpdateType::Resolve,
        }
    }
}

/// A proposed or applied transition of a channel from `nonce - 1` to `nonce`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelUpdate {
    pub channel_address: Address,
    pub from_identifier: PublicIdentifier,
    pub to_identifier: PublicIdentifier,
    pub nonce: u64,
    pub asset_id: Address,
    /// The resultant channel balance for `asset_id` once this update is applied. This is not a delta.
    pub balance: Balance,
    pub details: UpdateDetails,
    /// `[alice, bob]`
    pub signatures: [Option<ChannelSignature>; 2],
}

impl ChannelUpdate {
    pub fn update_type(&self) -> UpdateType {
        self.details.update_type()
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_double_signed(&self) -> bool {
        self.signature_count() == 2
    }

    pub fn signature(&self, role: ChannelRole) -> Option<&ChannelSignature> {
        self.signatures[role.index()].as_ref()
    }

    pub fn with_signature(mut self, role: ChannelRole, signature: ChannelSignature) -> Self {
        self.signatures[role.index()] = Some(signature);
        self
    }

    pub fn unsigned(&self) -> Self {
        let mut result = self.clone();
        result.signatures = [None, None];
        result
    }
}

impl Display for ChannelUpdate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} update #{} on {} ({} sig{})",
            self.update_type(),
            self.nonce,
            self.channel_address,
            self.signature_count(),
            if self.signature_count() == 1 { "" } else { "s" }
        )
    }
}
