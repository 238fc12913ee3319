use crate::primitives::{Address, Bytes32};
use crate::state::ChannelState;
use crate::storage::traits::{check_transfer, ChannelStore, StoreError};
use crate::transfers::TransferState;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    channels: HashMap<Address, ChannelState>,
    transfers: HashMap<Bytes32, TransferState>,
}

/// A volatile store. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl ChannelStore for MemoryStore {
    fn get_channel_state(&self, channel: &Address) -> Result<Option<ChannelState>, StoreError> {
        Ok(self.read().channels.get(channel).cloned())
    }

    fn get_channel_states(&self) -> Result<Vec<ChannelState>, StoreError> {
        Ok(self.read().channels.values().cloned().collect())
    }

    fn save_channel_state(&self, state: &ChannelState, transfer: Option<&TransferState>) -> Result<(), StoreError> {
        check_transfer(state, transfer)?;
        let mut tables = self.write();
        tables.channels.insert(state.channel_address, state.clone());
        if let Some(t) = transfer {
            tables.transfers.insert(t.transfer_id, t.clone());
        }
        Ok(())
    }

    fn get_transfer_state(&self, transfer_id: &Bytes32) -> Result<Option<TransferState>, StoreError> {
        Ok(self.read().transfers.get(transfer_id).cloned())
    }

    fn get_active_transfers(&self, channel: &Address) -> Result<Vec<TransferState>, StoreError> {
        let tables = self.read();
        let active = tables.transfers.values().filter(|t| &t.channel_address == channel && t.is_active()).cloned();
        Ok(active.collect())
    }

    fn get_transfers_by_routing_id(&self, routing_id: &Bytes32) -> Result<Vec<TransferState>, StoreError> {
        let tables = self.read();
        Ok(tables.transfers.values().filter(|t| t.routing_id() == Some(routing_id)).cloned().collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state::test_helpers::{channel_state, transfer};
    use crate::transfers::{TransferKind, TransferResolver};

    #[test]
    fn active_transfers_exclude_resolved() {
        let store = MemoryStore::new();
        let state = channel_state();
        let routing = Bytes32::random();
        let open = transfer(&state, Some(routing));
        let mut closed = transfer(&state, Some(routing));
        closed.transfer_resolver = Some(TransferResolver::cancel(TransferKind::Hashlock));
        store.save_channel_state(&state, Some(&open)).unwrap();
        store.save_channel_state(&state, Some(&closed)).unwrap();

        let active = store.get_active_transfers(&state.channel_address).unwrap();
        assert_eq!(active, vec![open.clone()]);
        assert_eq!(store.get_transfers_by_routing_id(&routing).unwrap().len(), 2);
        assert_eq!(store.get_transfer_state(&closed.transfer_id).unwrap(), Some(closed));
        assert_eq!(store.get_channel_state(&state.channel_address).unwrap(), Some(state));
    }

    #[test]
    fn foreign_transfers_are_refused() {
        let store = MemoryStore::new();
        let state = channel_state();
        let other = channel_state();
        let t = transfer(&other, None);
        assert!(matches!(store.save_channel_state(&state, Some(&t)), Err(StoreError::ForeignTransfer { .. })));
        assert_eq!(store.get_channel_state(&state.channel_address).unwrap(), None);
    }
}
