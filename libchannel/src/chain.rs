//! The view of the chain the channel protocol relies on: deposits made to channel addresses, the transfer
//! definitions the registry contract knows about, and the place disputes are lodged.

use crate::amount::Amount;
use crate::primitives::{Address, Bytes32};
use crate::state::ChannelState;
use crate::transfers::{TransferRegistry, TransferState};
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ChainError {
    #[error("Chain {0} is not supported")]
    UnsupportedChain(u64),
    #[error("Channel {0} has already been disputed")]
    AlreadyDisputed(Address),
    #[error("Chain reader error: {0}")]
    Reader(String),
}

/// A deposit observed on-chain for a channel. Nonces increase by one per `(channel, asset)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRecord {
    pub channel_address: Address,
    pub asset_id: Address,
    pub depositor: Address,
    pub amount: Amount,
    pub nonce: u64,
    pub transaction_hash: Bytes32,
}

/// The evidence lodged when a channel is disputed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeRecord {
    pub state: ChannelState,
    pub active_transfers: Vec<TransferState>,
    pub transaction_hash: Bytes32,
}

pub trait ChainService: Clone + Send + Sync + 'static {
    /// All deposits seen for `channel` in `asset_id`, in nonce order.
    fn get_deposits(
        &self,
        chain_id: u64,
        channel: &Address,
        asset_id: &Address,
    ) -> impl Future<Output = Result<Vec<DepositRecord>, ChainError>> + Send;

    fn get_registered_transfers(&self, chain_id: u64)
        -> impl Future<Output = Result<TransferRegistry, ChainError>> + Send;

    /// Submit the latest double-signed state and its open transfers for on-chain adjudication.
    fn submit_dispute(
        &self,
        state: &ChannelState,
        active_transfers: &[TransferState],
    ) -> impl Future<Output = Result<Bytes32, ChainError>> + Send;
}

//----------------------------------------------   MemoryChain   ------------------------------------------------------

#[derive(Default)]
struct ChainData {
    deposits: HashMap<(Address, Address), Vec<DepositRecord>>,
    disputes: HashMap<Address, DisputeRecord>,
}

/// An in-process chain, shared by every party that holds a clone of it.
#[derive(Clone)]
pub struct MemoryChain {
    chain_id: u64,
    registry: TransferRegistry,
    data: Arc<RwLock<ChainData>>,
}

impl MemoryChain {
    pub fn new(chain_id: u64, registry: TransferRegistry) -> Self {
        MemoryChain { chain_id, registry, data: Arc::new(RwLock::new(ChainData::default())) }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Records a deposit of `amount` to `channel` and returns its nonce.
    pub fn deposit(&self, channel: Address, asset_id: Address, depositor: Address, amount: Amount) -> u64 {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        let records = data.deposits.entry((channel, asset_id)).or_default();
        let nonce = records.len() as u64 + 1;
        records.push(DepositRecord {
            channel_address: channel,
            asset_id,
            depositor,
            amount,
            nonce,
            transaction_hash: Bytes32::random(),
        });
        debug!("Deposit #{nonce} of {amount} {asset_id} into {channel} from {depositor}");
        nonce
    }

    pub fn dispute(&self, channel: &Address) -> Option<DisputeRecord> {
        self.data.read().unwrap_or_else(|e| e.into_inner()).disputes.get(channel).cloned()
    }

    fn check_chain(&self, chain_id: u64) -> Result<(), ChainError> {
        if chain_id == self.chain_id {
            Ok(())
        } else {
            Err(ChainError::UnsupportedChain(chain_id))
        }
    }
}

impl ChainService for MemoryChain {
    async fn get_deposits(
        &self,
        chain_id: u64,
        channel: &Address,
        asset_id: &Address,
    ) -> Result<Vec<DepositRecord>, ChainError> {
        self.check_chain(chain_id)?;
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        Ok(data.deposits.get(&(*channel, *asset_id)).cloned().unwrap_or_default())
    }

    async fn get_registered_transfers(&self, chain_id: u64) -> Result<TransferRegistry, ChainError> {
        self.check_chain(chain_id)?;
        Ok(self.registry.clone())
    }

    async fn submit_dispute(
        &self,
        state: &ChannelState,
        active_transfers: &[TransferState],
    ) -> Result<Bytes32, ChainError> {
        self.check_chain(state.network_context.chain_id)?;
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        if data.disputes.contains_key(&state.channel_address) {
            return Err(ChainError::AlreadyDisputed(state.channel_address));
        }
        let transaction_hash = Bytes32::random();
        info!("Dispute lodged for {} at nonce {}", state.channel_address, state.nonce);
        let record =
            DisputeRecord { state: state.clone(), active_transfers: active_transfers.to_vec(), transaction_hash };
        data.disputes.insert(state.channel_address, record);
        Ok(transaction_hash)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn deposit_nonces_are_per_asset() {
        let chain = MemoryChain::new(1337, TransferRegistry::default());
        let channel = Address::derive_from(b"channel");
        let token = Address::derive_from(b"token");
        let who = Address::derive_from(b"alice");
        assert_eq!(chain.deposit(channel, Address::ZERO, who, Amount::from_units(1)), 1);
        assert_eq!(chain.deposit(channel, Address::ZERO, who, Amount::from_units(2)), 2);
        assert_eq!(chain.deposit(channel, token, who, Amount::from_units(3)), 1);
        let deposits = chain.get_deposits(1337, &channel, &Address::ZERO).await.unwrap();
        assert_eq!(deposits.len(), 2);
        assert_eq!(deposits[1].amount, Amount::from_units(2));
        assert!(matches!(chain.get_deposits(1, &channel, &token).await, Err(ChainError::UnsupportedChain(1))));
    }
}
