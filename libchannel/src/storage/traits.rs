use crate::primitives::{Address, Bytes32};
use crate::state::ChannelState;
use crate::transfers::TransferState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not serialize channel record: {0}")]
    Serialization(String),
    #[error("Corrupt channel record {path}: {reason}")]
    Corrupt { path: String, reason: String },
    #[error("Transfer {transfer} does not belong to channel {channel}")]
    ForeignTransfer { transfer: Bytes32, channel: Address },
}

/// Persistent storage of channel and transfer state.
///
/// `save_channel_state` must write the channel and the optional transfer as a single logical operation: a reader
/// never observes one without the other.
pub trait ChannelStore: Send + Sync + 'static {
    fn get_channel_state(&self, channel: &Address) -> Result<Option<ChannelState>, StoreError>;

    fn get_channel_states(&self) -> Result<Vec<ChannelState>, StoreError>;

    fn save_channel_state(&self, state: &ChannelState, transfer: Option<&TransferState>) -> Result<(), StoreError>;

    fn get_transfer_state(&self, transfer_id: &Bytes32) -> Result<Option<TransferState>, StoreError>;

    /// Transfers in `channel` that have not been resolved.
    fn get_active_transfers(&self, channel: &Address) -> Result<Vec<TransferState>, StoreError>;

    fn get_transfers_by_routing_id(&self, routing_id: &Bytes32) -> Result<Vec<TransferState>, StoreError>;
}

pub(crate) fn check_transfer(state: &ChannelState, transfer: Option<&TransferState>) -> Result<(), StoreError> {
    match transfer {
        Some(t) if t.channel_address != state.channel_address => {
            Err(StoreError::ForeignTransfer { transfer: t.transfer_id, channel: state.channel_address })
        }
        _ => Ok(()),
    }
}
