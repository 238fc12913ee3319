//! The channel data model: channel state, channel updates, and the network context they live in.
mod channel;
mod update;

pub use channel::{derive_channel_address, ChannelState, NetworkContext};
pub use update::{ChannelUpdate, CreateDetails, DepositDetails, ResolveDetails, SetupDetails, UpdateDetails, UpdateType};

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::{ChannelState, NetworkContext};
    use crate::amount::Amount;
    use crate::balance::Balance;
    use crate::crypto::{ChannelSigner, KeySigner};
    use crate::primitives::{Address, Bytes32};
    use crate::transfers::{HashlockState, TransferInitialState, TransferMeta, TransferState, MIN_TRANSFER_TIMEOUT};

    pub fn network_context() -> NetworkContext {
        NetworkContext {
            chain_id: 1337,
            channel_factory_address: Address::derive_from(b"channel factory"),
            transfer_registry_address: Address::derive_from(b"transfer registry"),
        }
    }

    /// A freshly set-up channel between two random parties.
    pub fn channel_state() -> ChannelState {
        let alice = KeySigner::random();
        let bob = KeySigner::random();
        let mut state = ChannelState::base_state(
            alice.public_identifier().clone(),
            bob.public_identifier().clone(),
            network_context(),
            86_400,
        );
        state.nonce = 1;
        state
    }

    /// An active hashlock transfer from alice to bob in `state`.
    pub fn transfer(state: &ChannelState, routing_id: Option<Bytes32>) -> TransferState {
        TransferState {
            transfer_id: Bytes32::random(),
            channel_address: state.channel_address,
            chain_id: state.network_context.chain_id,
            asset_id: Address::ZERO,
            initiator: state.participants[0],
            responder: state.participants[1],
            initiator_identifier: state.public_identifiers[0].clone(),
            responder_identifier: state.public_identifiers[1].clone(),
            balance: Balance::new(Amount::from_units(5), Amount::ZERO),
            transfer_definition: Address::derive_from(b"HashlockTransfer"),
            transfer_timeout: MIN_TRANSFER_TIMEOUT,
            initial_state: TransferInitialState::Hashlock(HashlockState { lock_hash: Bytes32::random(), expiry: 0 }),
            transfer_encodings: ["state".into(), "resolver".into()],
            transfer_resolver: None,
            channel_nonce: state.nonce,
            meta: TransferMeta { routing_id, note: None },
        }
    }
}
