mod file_store;
mod memory;
mod traits;

pub use file_store::FileStore;
pub use memory::MemoryStore;
pub use traits::{ChannelStore, StoreError};
