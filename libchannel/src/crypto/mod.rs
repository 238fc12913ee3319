pub mod keys;
pub mod signer;

pub use signer::{verify_signature, ChannelSignature, ChannelSigner, KeySigner};
