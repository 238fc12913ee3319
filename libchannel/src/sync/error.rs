use crate::primitives::Address;
use crate::storage::StoreError;
use crate::sync::messages::InboundFailure;
use crate::update::UpdateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Could not deliver the update after {attempts} attempts: {reason}")]
    MessageFailed { attempts: usize, reason: String },
    #[error("No response to update #{nonce} on {channel}")]
    ResponseTimeout { channel: Address, nonce: u64 },
    #[error("The counterparty rejected the update: {0}")]
    Rejected(InboundFailure),
    #[error("Channel nonces have diverged (local {local}, counterparty {counterparty}); a restore is required")]
    StaleChannelNonce { local: u64, counterparty: u64 },
    #[error("Channel {0} not found")]
    ChannelNotFound(Address),
    #[error("Could not merge the counterparty's update: {0}")]
    MergeFailed(UpdateError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Could not read channel data: {0}")]
    Context(String),
}
