use crate::balance::{Balance, ChannelRole};
use crate::primitives::{Address, Bytes32};
use crate::state::UpdateType;
use crate::transfers::TransferError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons an update is rejected by validation.
///
/// These travel over the wire inside protocol error messages, so they are serializable and carry only plain data.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateError {
    #[error("Update is for channel {actual}, but the state is for {expected}")]
    ChannelAddressMismatch { expected: Address, actual: Address },
    #[error("The update's identifiers are not the channel's participants")]
    IdentifierMismatch,
    #[error("{0} is not a participant in this channel")]
    NotAParticipant(String),
    #[error("The update nonce is incorrect. Expected {expected}, got {actual}")]
    InvalidNonce { expected: u64, actual: u64 },
    #[error("A {0} update cannot be applied to a channel at nonce {1}")]
    InvalidUpdateType(UpdateType, u64),
    #[error("The channel has not been set up")]
    ChannelNotSetup,
    #[error("Invalid setup: {0}")]
    InvalidSetup(String),
    #[error("Invalid deposit: {0}")]
    InvalidDeposit(String),
    #[error("Resultant balance mismatch. Expected {expected}, got {actual}")]
    BalanceMismatch { expected: Balance, actual: Balance },
    #[error("Insufficient funds to effect the update")]
    InsufficientFunds,
    #[error("Arithmetic overflow while computing the new balance")]
    Overflow,
    #[error("Transfer {0} was not found among the channel's active transfers")]
    TransferNotFound(Bytes32),
    #[error("Transfer {0} already exists")]
    DuplicateTransfer(Bytes32),
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),
    #[error("Transfer timeout {timeout} is outside the allowed range [{min}, {max}]")]
    InvalidTransferTimeout { timeout: u64, min: u64, max: u64 },
    #[error("Transfer amount cannot be zero")]
    ZeroTransferAmount,
    #[error("Invalid transfer details: {0}")]
    InvalidTransferDetails(String),
    #[error("Only the transfer responder may resolve it")]
    UnauthorizedResolver,
    #[error("Merkle root mismatch. Expected {expected}, got {actual}")]
    MerkleRootMismatch { expected: Bytes32, actual: Bytes32 },
    #[error("The Merkle proof does not verify against the channel root")]
    InvalidMerkleProof,
    #[error("The {0} signature is missing")]
    MissingSignature(ChannelRole),
    #[error("The {0} signature is invalid")]
    InvalidSignature(ChannelRole),
}
