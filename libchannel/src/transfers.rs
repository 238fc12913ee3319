//! Conditional transfers: their state, the registry of supported transfer definitions, and the rules for turning a
//! resolver into a final balance.

use crate::amount::Amount;
use crate::balance::Balance;
use crate::crypto::{verify_signature, ChannelSignature};
use crate::hashes::{hash32, CommitmentHasher};
use crate::primitives::{Address, Bytes32, PublicIdentifier};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// The shortest transfer timeout a channel will accept, in seconds.
pub const MIN_TRANSFER_TIMEOUT: u64 = 3_600;

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferError {
    #[error("Transfer definition {0} is not registered")]
    UnknownDefinition(Address),
    #[error("Initial state does not match the {0} transfer definition")]
    StateKindMismatch(TransferKind),
    #[error("Resolver does not match the {0} transfer definition")]
    ResolverKindMismatch(TransferKind),
    #[error("Invalid initial state: {0}")]
    InvalidInitialState(String),
    #[error("The pre-image does not hash to the lock hash")]
    InvalidPreImage,
    #[error("The withdrawal signature is not from the transfer responder")]
    InvalidWithdrawalSignature,
    #[error("Resolved balance {resolved} does not conserve the locked balance {locked}")]
    BalanceNotConserved { locked: Balance, resolved: Balance },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferKind {
    Hashlock,
    Withdraw,
}

impl Display for TransferKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferKind::Hashlock => write!(f, "HashlockTransfer"),
            TransferKind::Withdraw => write!(f, "Withdraw"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashlockState {
    pub lock_hash: Bytes32,
    /// Informational; expiry is enforced by on-chain adjudication, not by the channel.
    pub expiry: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawState {
    pub recipient: Address,
    pub fee: Amount,
    pub nonce: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferInitialState {
    Hashlock(HashlockState),
    Withdraw(WithdrawState),
}

impl TransferInitialState {
    pub fn kind(&self) -> TransferKind {
        match self {
            TransferInitialState::Hashlock(_) => TransferKind::Hashlock,
            TransferInitialState::Withdraw(_) => TransferKind::Withdraw,
        }
    }

    pub fn state_hash(&self) -> Bytes32 {
        let mut hasher = CommitmentHasher::new(b"TransferInitialState v1");
        match self {
            TransferInitialState::Hashlock(s) => {
                hasher
                    .append(b"kind", b"hashlock")
                    .append(b"lock_hash", s.lock_hash.as_bytes())
                    .append_u64(b"expiry", s.expiry);
            }
            TransferInitialState::Withdraw(s) => {
                hasher
                    .append(b"kind", b"withdraw")
                    .append(b"recipient", s.recipient.as_bytes())
                    .append(b"fee", s.fee.to_le_bytes())
                    .append_u64(b"nonce", s.nonce);
            }
        }
        hasher.finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferResolver {
    /// The all-zero pre-image cancels the transfer.
    Hashlock { pre_image: Bytes32 },
    /// No signature cancels the withdrawal.
    Withdraw { responder_signature: Option<ChannelSignature> },
}

impl TransferResolver {
    pub fn kind(&self) -> TransferKind {
        match self {
            TransferResolver::Hashlock { .. } => TransferKind::Hashlock,
            TransferResolver::Withdraw { .. } => TransferKind::Withdraw,
        }
    }

    pub fn cancel(kind: TransferKind) -> Self {
        match kind {
            TransferKind::Hashlock => TransferResolver::Hashlock { pre_image: Bytes32::ZERO },
            TransferKind::Withdraw => TransferResolver::Withdraw { responder_signature: None },
        }
    }
}

/// Application metadata attached to a transfer. `routing_id` correlates the legs of a multi-hop payment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMeta {
    pub routing_id: Option<Bytes32>,
    pub note: Option<String>,
}

//------------------------------------          Registry          ------------------------------------------------//

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredTransfer {
    pub definition: Address,
    pub kind: TransferKind,
    /// `[state encoding, resolver encoding]`
    pub encodings: [String; 2],
}

impl RegisteredTransfer {
    pub fn hashlock(definition: Address) -> Self {
        RegisteredTransfer {
            definition,
            kind: TransferKind::Hashlock,
            encodings: ["tuple(bytes32 lockHash, uint256 expiry)".into(), "tuple(bytes32 preImage)".into()],
        }
    }

    pub fn withdraw(definition: Address) -> Self {
        RegisteredTransfer {
            definition,
            kind: TransferKind::Withdraw,
            encodings: [
                "tuple(address recipient, uint256 fee, uint256 nonce)".into(),
                "tuple(bytes responderSignature)".into(),
            ],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRegistry {
    entries: Vec<RegisteredTransfer>,
}

impl TransferRegistry {
    pub fn new(entries: Vec<RegisteredTransfer>) -> Self {
        TransferRegistry { entries }
    }

    pub fn get(&self, definition: &Address) -> Result<&RegisteredTransfer, TransferError> {
        self.entries.iter().find(|e| &e.definition == definition).ok_or(TransferError::UnknownDefinition(*definition))
    }
}

//------------------------------------        TransferState       ------------------------------------------------//

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferState {
    pub transfer_id: Bytes32,
    pub channel_address: Address,
    pub chain_id: u64,
    pub asset_id: Address,
    pub initiator: Address,
    pub responder: Address,
    pub initiator_identifier: PublicIdentifier,
    pub responder_identifier: PublicIdentifier,
    /// The initially locked balance, `[initiator, responder]`
    pub balance: Balance,
    pub transfer_definition: Address,
    pub transfer_timeout: u64,
    pub initial_state: TransferInitialState,
    pub transfer_encodings: [String; 2],
    pub transfer_resolver: Option<TransferResolver>,
    /// The channel nonce of the update that created this transfer
    pub channel_nonce: u64,
    pub meta: TransferMeta,
}

impl TransferState {
    /// A transfer is active until a resolve update for it has been applied.
    pub fn is_active(&self) -> bool {
        self.transfer_resolver.is_none()
    }

    pub fn kind(&self) -> TransferKind {
        self.initial_state.kind()
    }

    pub fn locked_amount(&self) -> Amount {
        self.balance.amounts.iter().copied().sum()
    }

    pub fn routing_id(&self) -> Option<&Bytes32> {
        self.meta.routing_id.as_ref()
    }

    /// The canonical hash of this transfer, i.e. its leaf in the channel's Merkle tree.
    pub fn transfer_hash(&self) -> Bytes32 {
        let mut hasher = CommitmentHasher::new(b"TransferState v1");
        hasher
            .append(b"transfer_id", self.transfer_id.as_bytes())
            .append(b"channel_address", self.channel_address.as_bytes())
            .append_u64(b"chain_id", self.chain_id)
            .append(b"asset_id", self.asset_id.as_bytes())
            .append(b"initiator", self.initiator.as_bytes())
            .append(b"responder", self.responder.as_bytes())
            .append(b"balance_initiator", self.balance.amounts[0].to_le_bytes())
            .append(b"balance_responder", self.balance.amounts[1].to_le_bytes())
            .append(b"transfer_definition", self.transfer_definition.as_bytes())
            .append_u64(b"transfer_timeout", self.transfer_timeout)
            .append(b"initial_state", self.initial_state.state_hash().as_bytes());
        hasher.finish()
    }
}

pub fn derive_transfer_id(
    channel_address: &Address,
    definition: &Address,
    timeout: u64,
    channel_nonce: u64,
) -> Bytes32 {
    let mut hasher = CommitmentHasher::new(b"TransferId v1");
    hasher
        .append(b"channel_address", channel_address.as_bytes())
        .append(b"transfer_definition", definition.as_bytes())
        .append_u64(b"transfer_timeout", timeout)
        .append_u64(b"channel_nonce", channel_nonce);
    hasher.finish()
}

/// The message a withdrawal responder signs to release the funds on-chain.
pub fn withdrawal_commitment(transfer: &TransferState) -> Option<Bytes32> {
    let TransferInitialState::Withdraw(w) = &transfer.initial_state else {
        return None;
    };
    let mut hasher = CommitmentHasher::new(b"WithdrawCommitment v1");
    hasher
        .append(b"channel_address", transfer.channel_address.as_bytes())
        .append(b"asset_id", transfer.asset_id.as_bytes())
        .append(b"recipient", w.recipient.as_bytes())
        .append(b"amount", transfer.balance.amounts[0].to_le_bytes())
        .append(b"fee", w.fee.to_le_bytes())
        .append_u64(b"nonce", w.nonce);
    Some(hasher.finish())
}

/// Checks an initial state against the definition it is being created under.
pub fn validate_initial_state(
    registered: &RegisteredTransfer,
    state: &TransferInitialState,
    balance: &Balance,
) -> Result<(), TransferError> {
    if state.kind() != registered.kind {
        return Err(TransferError::StateKindMismatch(registered.kind));
    }
    if !balance.amounts[1].is_zero() {
        return Err(TransferError::InvalidInitialState("the responder cannot lock funds".into()));
    }
    match state {
        TransferInitialState::Hashlock(s) if s.lock_hash.is_zero() => {
            Err(TransferError::InvalidInitialState("lock hash cannot be zero".into()))
        }
        TransferInitialState::Withdraw(s) if s.fee > balance.amounts[0] => {
            Err(TransferError::InvalidInitialState("withdrawal fee exceeds the withdrawn amount".into()))
        }
        _ => Ok(()),
    }
}

/// Computes the final `[initiator, responder]` balance of `transfer` under `resolver`.
pub fn resolve_balance(transfer: &TransferState, resolver: &TransferResolver) -> Result<Balance, TransferError> {
    let kind = transfer.kind();
    if resolver.kind() != kind {
        return Err(TransferError::ResolverKindMismatch(kind));
    }
    let total = transfer.locked_amount();
    let resolved = match (resolver, &transfer.initial_state) {
        (TransferResolver::Hashlock { pre_image }, TransferInitialState::Hashlock(state)) => {
            if pre_image.is_zero() {
                Balance::new(total, Amount::ZERO)
            } else if hash32(pre_image.as_bytes()) == state.lock_hash {
                Balance::new(Amount::ZERO, total)
            } else {
                return Err(TransferError::InvalidPreImage);
            }
        }
        (TransferResolver::Withdraw { responder_signature }, TransferInitialState::Withdraw(state)) => {
            match responder_signature {
                None => Balance::new(total, Amount::ZERO),
                Some(sig) => {
                    let commitment = withdrawal_commitment(transfer).ok_or(TransferError::StateKindMismatch(kind))?;
                    if !verify_signature(&commitment, sig, &transfer.responder_identifier) {
                        return Err(TransferError::InvalidWithdrawalSignature);
                    }
                    // The remainder leaves the channel with the on-chain withdrawal
                    return Ok(Balance::new(Amount::ZERO, state.fee));
                }
            }
        }
        _ => return Err(TransferError::ResolverKindMismatch(kind)),
    };
    if resolved.total() != Some(total) {
        return Err(TransferError::BalanceNotConserved { locked: transfer.balance, resolved });
    }
    Ok(resolved)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{ChannelSigner, KeySigner};

    fn transfer(initial_state: TransferInitialState, amount: u64) -> (TransferState, KeySigner) {
        let initiator = KeySigner::random();
        let responder = KeySigner::random();
        let state = TransferState {
            transfer_id: Bytes32::random(),
            channel_address: Address::derive_from(b"channel"),
            chain_id: 1337,
            asset_id: Address::ZERO,
            initiator: initiator.address(),
            responder: responder.address(),
            initiator_identifier: initiator.public_identifier().clone(),
            responder_identifier: responder.public_identifier().clone(),
            balance: Balance::new(Amount::from_units(amount), Amount::ZERO),
            transfer_definition: Address::derive_from(b"definition"),
            transfer_timeout: MIN_TRANSFER_TIMEOUT,
            initial_state,
            transfer_encodings: ["".into(), "".into()],
            transfer_resolver: None,
            channel_nonce: 3,
            meta: TransferMeta::default(),
        };
        (state, responder)
    }

    fn hashlock(pre_image: &Bytes32) -> TransferInitialState {
        TransferInitialState::Hashlock(HashlockState { lock_hash: hash32(pre_image.as_bytes()), expiry: 0 })
    }

    #[test]
    fn hashlock_resolution() {
        let pre_image = Bytes32::random();
        let (t, _) = transfer(hashlock(&pre_image), 10);
        let paid = resolve_balance(&t, &TransferResolver::Hashlock { pre_image }).unwrap();
        assert_eq!(paid, Balance::new(Amount::ZERO, Amount::from_units(10)));
        let cancelled = resolve_balance(&t, &TransferResolver::cancel(TransferKind::Hashlock)).unwrap();
        assert_eq!(cancelled, Balance::new(Amount::from_units(10), Amount::ZERO));
        let wrong = resolve_balance(&t, &TransferResolver::Hashlock { pre_image: Bytes32::random() });
        assert_eq!(wrong, Err(TransferError::InvalidPreImage));
        let mismatch = resolve_balance(&t, &TransferResolver::cancel(TransferKind::Withdraw));
        assert_eq!(mismatch, Err(TransferError::ResolverKindMismatch(TransferKind::Hashlock)));
    }

    #[test]
    fn withdraw_resolution() {
        let state =
            WithdrawState { recipient: Address::derive_from(b"recipient"), fee: Amount::from_units(2), nonce: 1 };
        let (t, responder) = transfer(TransferInitialState::Withdraw(state), 50);
        let commitment = withdrawal_commitment(&t).unwrap();
        let sig = responder.sign_message(&commitment);
        let resolved = resolve_balance(&t, &TransferResolver::Withdraw { responder_signature: Some(sig) }).unwrap();
        assert_eq!(resolved, Balance::new(Amount::ZERO, Amount::from_units(2)));

        let imposter = KeySigner::random().sign_message(&commitment);
        let bad = resolve_balance(&t, &TransferResolver::Withdraw { responder_signature: Some(imposter) });
        assert_eq!(bad, Err(TransferError::InvalidWithdrawalSignature));

        let cancelled = resolve_balance(&t, &TransferResolver::cancel(TransferKind::Withdraw)).unwrap();
        assert_eq!(cancelled, Balance::new(Amount::from_units(50), Amount::ZERO));
    }

    #[test]
    fn initial_state_validation() {
        let registered = RegisteredTransfer::hashlock(Address::derive_from(b"hashlock"));
        let balance = Balance::new(Amount::from_units(5), Amount::ZERO);
        let good = hashlock(&Bytes32::random());
        assert!(validate_initial_state(&registered, &good, &balance).is_ok());
        let zero_lock = TransferInitialState::Hashlock(HashlockState { lock_hash: Bytes32::ZERO, expiry: 0 });
        assert!(validate_initial_state(&registered, &zero_lock, &balance).is_err());
        let responder_funds = Balance::new(Amount::from_units(5), Amount::from_units(1));
        assert!(validate_initial_state(&registered, &good, &responder_funds).is_err());
        let withdraw = TransferInitialState::Withdraw(WithdrawState {
            recipient: Address::ZERO,
            fee: Amount::from_units(1),
            nonce: 0,
        });
        assert_eq!(
            validate_initial_state(&registered, &withdraw, &balance),
            Err(TransferError::StateKindMismatch(TransferKind::Hashlock))
        );
    }

    #[test]
    fn transfer_hash_commits_to_balance() {
        let (t, _) = transfer(hashlock(&Bytes32::random()), 10);
        let mut other = t.clone();
        other.balance = Balance::new(Amount::from_units(11), Amount::ZERO);
        assert_ne!(t.transfer_hash(), other.transfer_hash());
        // Resolving does not change the leaf
        other = t.clone();
        other.transfer_resolver = Some(TransferResolver::cancel(TransferKind::Hashlock));
        assert_eq!(t.transfer_hash(), other.transfer_hash());
    }
}
