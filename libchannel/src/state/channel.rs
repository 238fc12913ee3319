use crate::amount::Amount;
use crate::balance::{Balance, ChannelRole};
use crate::hashes::CommitmentHasher;
use crate::primitives::{Address, Bytes32, PublicIdentifier};
use crate::state::update::ChannelUpdate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The chain a channel lives on and the contracts it relies on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkContext {
    pub chain_id: u64,
    pub channel_factory_address: Address,
    pub transfer_registry_address: Address,
}

/// The full state of a two-party channel, as held by each participant.
///
/// Instances are never mutated in place by the update machinery. Applying an update always builds a new value, so
/// a snapshot held by one code path can never be changed underneath it by another.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    pub channel_address: Address,
    /// On-chain signing addresses, `[alice, bob]`
    pub participants: [Address; 2],
    pub public_identifiers: [PublicIdentifier; 2],
    pub network_context: NetworkContext,
    /// Every asset ever used in the channel. Order is irrelevant; commitments sort it.
    pub asset_ids: Vec<Address>,
    pub balances: BTreeMap<Address, Balance>,
    /// Value escrowed in open transfers, per asset.
    pub locked_value: BTreeMap<Address, Amount>,
    pub merkle_root: Bytes32,
    pub nonce: u64,
    /// The latest on-chain deposit sequence number reconciled into the channel, per asset.
    pub latest_deposit_nonce: BTreeMap<Address, u64>,
    /// Dispute timeout window, in seconds.
    pub timeout: u64,
    pub latest_update: Option<ChannelUpdate>,
}

impl ChannelState {
    /// The zero-nonce, zero-balance state both parties synthesize before the setup update is applied.
    pub fn base_state(
        alice: PublicIdentifier,
        bob: PublicIdentifier,
        network_context: NetworkContext,
        timeout: u64,
    ) -> Self {
        let participants = [alice.signer_address(), bob.signer_address()];
        let channel_address = derive_channel_address(&network_context, &participants);
        ChannelState {
            channel_address,
            participants,
            public_identifiers: [alice, bob],
            network_context,
            asset_ids: Vec::new(),
            balances: BTreeMap::new(),
            locked_value: BTreeMap::new(),
            merkle_root: Bytes32::ZERO,
            nonce: 0,
            latest_deposit_nonce: BTreeMap::new(),
            timeout,
            latest_update: None,
        }
    }

    pub fn identifier(&self, role: ChannelRole) -> &PublicIdentifier {
        &self.public_identifiers[role.index()]
    }

    pub fn participant(&self, role: ChannelRole) -> &Address {
        &self.participants[role.index()]
    }

    /// Which side of the channel the given identifier is on, if any.
    pub fn role_of(&self, id: &PublicIdentifier) -> Option<ChannelRole> {
        self.public_identifiers.iter().position(|p| p == id).and_then(ChannelRole::from_index)
    }

    pub fn role_of_address(&self, address: &Address) -> Option<ChannelRole> {
        self.participants.iter().position(|p| p == address).and_then(ChannelRole::from_index)
    }

    pub fn balance(&self, asset_id: &Address) -> Balance {
        self.balances.get(asset_id).copied().unwrap_or_default()
    }

    pub fn locked(&self, asset_id: &Address) -> Amount {
        self.locked_value.get(asset_id).copied().unwrap_or_default()
    }

    pub fn deposit_nonce(&self, asset_id: &Address) -> u64 {
        self.latest_deposit_nonce.get(asset_id).copied().unwrap_or_default()
    }

    /// The hash both participants sign. It commits to everything except `latest_update`.
    pub fn commitment_hash(&self) -> Bytes32 {
        let mut hasher = CommitmentHasher::new(b"ChannelCommitment v1");
        hasher
            .append(b"channel_address", self.channel_address.as_bytes())
            .append(b"alice", self.participants[0].as_bytes())
            .append(b"bob", self.participants[1].as_bytes())
            .append(b"alice_identifier", self.public_identifiers[0].to_string())
            .append(b"bob_identifier", self.public_identifiers[1].to_string())
            .append_u64(b"chain_id", self.network_context.chain_id)
            .append(b"channel_factory", self.network_context.channel_factory_address.as_bytes())
            .append(b"transfer_registry", self.network_context.transfer_registry_address.as_bytes())
            .append_u64(b"nonce", self.nonce)
            .append_u64(b"timeout", self.timeout)
            .append(b"merkle_root", self.merkle_root.as_bytes());
        let mut assets = self.asset_ids.clone();
        assets.sort();
        assets.dedup();
        hasher.append_u64(b"asset_count", assets.len() as u64);
        for asset in &assets {
            let balance = self.balance(asset);
            hasher
                .append(b"asset_id", asset.as_bytes())
                .append(b"balance_alice", balance.amounts[0].to_le_bytes())
                .append(b"balance_bob", balance.amounts[1].to_le_bytes())
                .append(b"locked_value", self.locked(asset).to_le_bytes())
                .append_u64(b"deposit_nonce", self.deposit_nonce(asset));
        }
        hasher.finish()
    }
}

/// Channel addresses are a function of the chain, the factory and the two participants, so either side can check
/// that a setup update names the right channel.
pub fn derive_channel_address(network: &NetworkContext, participants: &[Address; 2]) -> Address {
    let mut hasher = CommitmentHasher::new(b"ChannelAddress v1");
    hasher
        .append_u64(b"chain_id", network.chain_id)
        .append(b"channel_factory", network.channel_factory_address.as_bytes())
        .append(b"alice", participants[0].as_bytes())
        .append(b"bob", participants[1].as_bytes());
    Address::derive_from(hasher.finish().as_bytes())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{ChannelSigner, KeySigner};
    use crate::state::test_helpers::network_context;

    #[test]
    fn base_state_is_empty() {
        let alice = KeySigner::random();
        let bob = KeySigner::random();
        let state = ChannelState::base_state(
            alice.public_identifier().clone(),
            bob.public_identifier().clone(),
            network_context(),
            86_400,
        );
        assert_eq!(state.nonce, 0);
        assert_eq!(state.merkle_root, Bytes32::ZERO);
        assert_eq!(state.role_of(bob.public_identifier()), Some(ChannelRole::Bob));
        assert_eq!(state.role_of_address(&alice.address()), Some(ChannelRole::Alice));
        assert_eq!(state.balance(&Address::ZERO), Balance::zero());
    }

    #[test]
    fn channel_address_depends_on_participant_order() {
        let a = KeySigner::random().address();
        let b = KeySigner::random().address();
        let net = network_context();
        assert_ne!(derive_channel_address(&net, &[a, b]), derive_channel_address(&net, &[b, a]));
    }

    #[test]
    fn commitment_ignores_asset_order_but_not_balances() {
        let alice = KeySigner::random();
        let bob = KeySigner::random();
        let mut state = ChannelState::base_state(
            alice.public_identifier().clone(),
            bob.public_identifier().clone(),
            network_context(),
            86_400,
        );
        let token = Address::derive_from(b"token");
        state.asset_ids = vec![Address::ZERO, token];
        state.balances.insert(Address::ZERO, Balance::new(Amount::from_units(5), Amount::ZERO));
        let mut reordered = state.clone();
        reordered.asset_ids = vec![token, Address::ZERO];
        assert_eq!(state.commitment_hash(), reordered.commitment_hash());

        reordered.balances.insert(Address::ZERO, Balance::new(Amount::from_units(4), Amount::ZERO));
        assert_ne!(state.commitment_hash(), reordered.commitment_hash());
    }
}
