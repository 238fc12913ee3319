use crate::chain::ChainError;
use crate::lock::LockError;
use crate::primitives::{Address, Bytes32};
use crate::storage::StoreError;
use crate::sync::SyncError;
use crate::update::UpdateError;
use thiserror::Error;

/// Errors returned by the [`crate::engine::ChannelEngine`] operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("The update could not be generated. {0}")]
    Update(#[from] UpdateError),
    #[error("The update could not be synchronised with the counterparty. {0}")]
    Sync(#[from] SyncError),
    #[error("Error saving/loading channel. {0}")]
    Store(#[from] StoreError),
    #[error("Chain service error. {0}")]
    Chain(#[from] ChainError),
    #[error("Lock service error. {0}")]
    Lock(#[from] LockError),
    #[error("Channel {0} not found.")]
    ChannelNotFound(Address),
    #[error("Channel {0} has already been set up.")]
    ChannelAlreadyExists(Address),
    #[error("Transfer {0} not found.")]
    TransferNotFound(Bytes32),
    #[error("Transfer {0} is not a withdrawal.")]
    NotAWithdrawal(Bytes32),
    #[error("Only the responder of transfer {0} can sign for it.")]
    NotTheResponder(Bytes32),
    #[error("Channel {0} has no double-signed state to dispute with.")]
    NoDisputableState(Address),
    #[error("Channel {channel} is still out of sync after {attempts} attempts.")]
    SyncRetriesExhausted { channel: Address, attempts: usize },
}
