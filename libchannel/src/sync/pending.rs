use crate::primitives::Address;
use crate::sync::messages::ProtocolError;
use crate::update::AppliedUpdate;
use futures::channel::oneshot;
use log::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// How an outbound proposal was settled by the counterparty.
#[derive(Debug)]
pub enum ProposalOutcome {
    Applied(Box<AppliedUpdate>),
    Rejected(Box<ProtocolError>),
}

/// Outbound proposals awaiting the counterparty's response, keyed by `(channel, nonce)`.
///
/// A waiter is registered before the proposal is published, so a response can never arrive before anyone is
/// listening for it.
#[derive(Clone, Default)]
pub struct PendingProposals {
    waiters: Arc<Mutex<HashMap<(Address, u64), oneshot::Sender<ProposalOutcome>>>>,
}

impl PendingProposals {
    pub fn register(&self, channel: Address, nonce: u64) -> oneshot::Receiver<ProposalOutcome> {
        let (sender, receiver) = oneshot::channel();
        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        if waiters.insert((channel, nonce), sender).is_some() {
            error!("A proposal for {channel} #{nonce} was already pending. There should only be one at a time.");
        }
        receiver
    }

    pub fn is_pending(&self, channel: &Address, nonce: u64) -> bool {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner()).contains_key(&(*channel, nonce))
    }

    /// Hands `outcome` to whoever is waiting on `(channel, nonce)`. Returns false if nobody was.
    pub fn resolve(&self, channel: &Address, nonce: u64, outcome: ProposalOutcome) -> bool {
        let sender = self.waiters.lock().unwrap_or_else(|e| e.into_inner()).remove(&(*channel, nonce));
        match sender {
            Some(sender) => sender.send(outcome).is_ok(),
            None => {
                trace!("No proposal pending for {channel} #{nonce}");
                false
            }
        }
    }

    pub fn cancel(&self, channel: &Address, nonce: u64) {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner()).remove(&(*channel, nonce));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state::test_helpers::channel_state;

    fn applied() -> AppliedUpdate {
        AppliedUpdate { state: channel_state(), transfer: None }
    }

    #[tokio::test]
    async fn waiters_are_keyed_by_channel_and_nonce() {
        let pending = PendingProposals::default();
        let outcome = applied();
        let channel = outcome.state.channel_address;
        let receiver = pending.register(channel, 2);
        assert!(pending.is_pending(&channel, 2));
        assert!(!pending.is_pending(&channel, 3));
        assert!(!pending.resolve(&channel, 3, ProposalOutcome::Applied(Box::new(outcome.clone()))));
        assert!(pending.resolve(&channel, 2, ProposalOutcome::Applied(Box::new(outcome.clone()))));
        match receiver.await.unwrap() {
            ProposalOutcome::Applied(a) => assert_eq!(*a, outcome),
            ProposalOutcome::Rejected(e) => panic!("unexpected rejection: {e}"),
        }
        assert!(!pending.is_pending(&channel, 2));
    }
}
