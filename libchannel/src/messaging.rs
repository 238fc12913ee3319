//! Point-to-point delivery of [`ChannelMessage`]s between participants.

use crate::primitives::PublicIdentifier;
use crate::sync::ChannelMessage;
use futures::channel::mpsc;
use log::*;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessagingError {
    #[error("No inbox is registered for {0}")]
    UnknownRecipient(String),
    #[error("{0} is unreachable")]
    Unreachable(String),
}

pub type Inbox = mpsc::UnboundedReceiver<ChannelMessage>;

pub trait MessagingService: Send + Sync + 'static {
    /// Fire-and-forget delivery to `message.to`'s inbox.
    fn publish(&self, message: ChannelMessage) -> impl Future<Output = Result<(), MessagingError>> + Send;
}

#[derive(Default)]
struct Routes {
    inboxes: HashMap<PublicIdentifier, mpsc::UnboundedSender<ChannelMessage>>,
    /// Number of upcoming deliveries to each recipient that will fail
    failures: HashMap<PublicIdentifier, usize>,
}

/// An in-process network. Every participant registers an inbox with [`MemoryNetwork::register`]; clones share the
/// same routes.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    routes: Arc<Mutex<Routes>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id`'s inbox. Messages for `id` are delivered to the returned receiver in the order they were sent.
    pub fn register(&self, id: PublicIdentifier) -> Inbox {
        let (sender, receiver) = mpsc::unbounded();
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        if routes.inboxes.insert(id.clone(), sender).is_some() {
            warn!("Replaced the inbox for {id}");
        }
        receiver
    }

    /// Makes the next `count` deliveries to `id` fail with [`MessagingError::Unreachable`].
    pub fn fail_next(&self, id: &PublicIdentifier, count: usize) {
        self.routes.lock().unwrap_or_else(|e| e.into_inner()).failures.insert(id.clone(), count);
    }
}

impl MessagingService for MemoryNetwork {
    async fn publish(&self, message: ChannelMessage) -> Result<(), MessagingError> {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(remaining) = routes.failures.get_mut(&message.to) {
            if *remaining > 0 {
                *remaining -= 1;
                debug!("Dropping message to {} ({} more failures queued)", message.to, remaining);
                return Err(MessagingError::Unreachable(message.to.to_string()));
            }
        }
        let to = message.to.clone();
        let inbox = routes.inboxes.get(&to).ok_or_else(|| MessagingError::UnknownRecipient(to.to_string()))?;
        trace!("Delivering {message}");
        inbox.unbounded_send(message).map_err(|_| MessagingError::Unreachable(to.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{ChannelSigner, KeySigner};
    use crate::primitives::Address;
    use crate::sync::{InboundFailure, ProtocolError};
    use futures::StreamExt;

    fn error_message(from: &KeySigner, to: &KeySigner, nonce: u64) -> ChannelMessage {
        let error = ProtocolError {
            channel_address: Address::ZERO,
            nonce,
            reason: InboundFailure::StaleUpdateNonce,
            latest_update: None,
        };
        ChannelMessage::error(from.public_identifier().clone(), to.public_identifier().clone(), error)
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let network = MemoryNetwork::new();
        let alice = KeySigner::random();
        let bob = KeySigner::random();
        let mut inbox = network.register(bob.public_identifier().clone());
        network.publish(error_message(&alice, &bob, 1)).await.unwrap();
        network.publish(error_message(&alice, &bob, 2)).await.unwrap();
        let first = inbox.next().await.unwrap();
        let second = inbox.next().await.unwrap();
        assert_eq!(first, error_message(&alice, &bob, 1));
        assert_eq!(second, error_message(&alice, &bob, 2));
    }

    #[tokio::test]
    async fn unknown_and_failing_recipients() {
        let network = MemoryNetwork::new();
        let alice = KeySigner::random();
        let bob = KeySigner::random();
        let result = network.publish(error_message(&alice, &bob, 1)).await;
        assert!(matches!(result, Err(MessagingError::UnknownRecipient(_))));

        let _inbox = network.register(bob.public_identifier().clone());
        network.fail_next(bob.public_identifier(), 1);
        let result = network.publish(error_message(&alice, &bob, 1)).await;
        assert!(matches!(result, Err(MessagingError::Unreachable(_))));
        assert!(network.publish(error_message(&alice, &bob, 1)).await.is_ok());
    }
}
