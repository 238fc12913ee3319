use crate::primitives::{Address, Bytes32};
use crate::state::ChannelState;
use crate::storage::traits::{check_transfer, ChannelStore, StoreError};
use crate::transfers::TransferState;
use log::*;
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Everything stored for one channel.
#[derive(Debug, Serialize, Deserialize)]
struct ChannelRecord {
    state: ChannelState,
    transfers: Vec<TransferState>,
}

/// A file-based store for channel and transfer state.
///
/// Each channel is saved, with all of its transfers, in a file named after the channel address, e.g.
/// `0x5e4b...c1d2.ron`. Writes go to a temporary file that is then renamed over the original, so a channel and the
/// transfer saved alongside it are updated together or not at all.
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Creates a new file store rooted at `path`, creating the directory if necessary.
    pub fn new(path: PathBuf) -> Result<Self, std::io::Error> {
        if !path.exists() {
            fs::create_dir_all(&path)?;
        }
        Ok(Self { path, write_lock: Mutex::new(()) })
    }

    /// Returns the path to the directory where the channel files are stored.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn channel_file(&self, channel: &Address) -> PathBuf {
        self.path.join(format!("{channel}.ron"))
    }

    fn load(path: &Path) -> Result<ChannelRecord, StoreError> {
        let val = fs::read_to_string(path)?;
        ron::de::from_str(&val)
            .map_err(|e| StoreError::Corrupt { path: path.display().to_string(), reason: e.to_string() })
    }

    fn load_channel(&self, channel: &Address) -> Result<Option<ChannelRecord>, StoreError> {
        let file = self.channel_file(channel);
        if !file.exists() {
            return Ok(None);
        }
        Self::load(&file).map(Some)
    }

    fn records(&self) -> Result<Vec<ChannelRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "ron") {
                records.push(Self::load(&path)?);
            }
        }
        Ok(records)
    }

    fn write_record(&self, record: &ChannelRecord) -> Result<(), StoreError> {
        let file_path = self.channel_file(&record.state.channel_address);
        let tmp_path = file_path.with_extension("ron.tmp");
        let config = PrettyConfig::new().compact_arrays(true).compact_maps(true);
        let val = ron::ser::to_string_pretty(record, config).map_err(|e| StoreError::Serialization(e.to_string()))?;
        fs::write(&tmp_path, &val)?;
        fs::rename(&tmp_path, &file_path)?;
        trace!("Saved {} at nonce {} to {}", record.state.channel_address, record.state.nonce, file_path.display());
        Ok(())
    }
}

impl ChannelStore for FileStore {
    fn get_channel_state(&self, channel: &Address) -> Result<Option<ChannelState>, StoreError> {
        Ok(self.load_channel(channel)?.map(|r| r.state))
    }

    fn get_channel_states(&self) -> Result<Vec<ChannelState>, StoreError> {
        Ok(self.records()?.into_iter().map(|r| r.state).collect())
    }

    fn save_channel_state(&self, state: &ChannelState, transfer: Option<&TransferState>) -> Result<(), StoreError> {
        check_transfer(state, transfer)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut transfers = self.load_channel(&state.channel_address)?.map(|r| r.transfers).unwrap_or_default();
        if let Some(t) = transfer {
            match transfers.iter_mut().find(|existing| existing.transfer_id == t.transfer_id) {
                Some(existing) => *existing = t.clone(),
                None => transfers.push(t.clone()),
            }
        }
        self.write_record(&ChannelRecord { state: state.clone(), transfers })
    }

    fn get_transfer_state(&self, transfer_id: &Bytes32) -> Result<Option<TransferState>, StoreError> {
        let found = self.records()?.into_iter().flat_map(|r| r.transfers).find(|t| &t.transfer_id == transfer_id);
        Ok(found)
    }

    fn get_active_transfers(&self, channel: &Address) -> Result<Vec<TransferState>, StoreError> {
        let transfers = self.load_channel(channel)?.map(|r| r.transfers).unwrap_or_default();
        Ok(transfers.into_iter().filter(|t| t.is_active()).collect())
    }

    fn get_transfers_by_routing_id(&self, routing_id: &Bytes32) -> Result<Vec<TransferState>, StoreError> {
        let records = self.records()?;
        Ok(records.into_iter().flat_map(|r| r.transfers).filter(|t| t.routing_id() == Some(routing_id)).collect())
    }
}
