pub mod amount;
pub mod balance;
pub mod chain;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod events;
pub mod hashes;
pub mod lock;
pub mod merkle;
pub mod messaging;
pub mod primitives;
pub mod state;
pub mod storage;
pub mod sync;
pub mod transfers;
pub mod update;

pub use engine::{ChannelEngine, EngineConfig};
pub use error::EngineError;

#[cfg(test)]
mod tests;
