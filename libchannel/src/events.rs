//! Typed notifications of channel activity.
//!
//! Every engine owns one [`EventBus`]. Listeners subscribe to one [`EventKind`] at a time, optionally with a filter
//! that is evaluated before delivery, and either persistently ([`EventBus::on`]) or for a single matching event
//! ([`EventBus::once`]). [`EventBus::wait_for`] turns a single-fire subscription into a future with a timeout.

use crate::balance::Balance;
use crate::primitives::{Address, Bytes32};
use crate::state::{ChannelState, UpdateType};
use crate::sync::ProtocolError;
use crate::transfers::TransferState;
use futures::channel::oneshot;
use log::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    ChannelUpdated,
    DepositReconciled,
    TransferCreated,
    TransferResolved,
    WithdrawalCreated,
    WithdrawalResolved,
    ProtocolError,
    ChannelDisputed,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::ChannelUpdated,
        EventKind::DepositReconciled,
        EventKind::TransferCreated,
        EventKind::TransferResolved,
        EventKind::WithdrawalCreated,
        EventKind::WithdrawalResolved,
        EventKind::ProtocolError,
        EventKind::ChannelDisputed,
    ];
}

#[derive(Clone, Debug)]
pub struct ChannelUpdatedPayload {
    pub channel_address: Address,
    pub update_type: UpdateType,
    pub nonce: u64,
    pub state: Box<ChannelState>,
}

#[derive(Clone, Debug)]
pub struct DepositReconciledPayload {
    pub channel_address: Address,
    pub asset_id: Address,
    pub balance: Balance,
    pub latest_deposit_nonce: u64,
}

#[derive(Clone, Debug)]
pub struct TransferPayload {
    pub channel_address: Address,
    pub transfer: Box<TransferState>,
    /// The channel balance for the transfer's asset after the update
    pub channel_balance: Balance,
}

#[derive(Clone, Debug)]
pub struct ChannelDisputedPayload {
    pub channel_address: Address,
    pub nonce: u64,
    pub transaction_hash: Bytes32,
}

#[derive(Clone, Debug)]
pub enum ChannelEvent {
    ChannelUpdated(ChannelUpdatedPayload),
    DepositReconciled(DepositReconciledPayload),
    TransferCreated(TransferPayload),
    TransferResolved(TransferPayload),
    WithdrawalCreated(TransferPayload),
    WithdrawalResolved(TransferPayload),
    ProtocolError(Box<ProtocolError>),
    ChannelDisputed(ChannelDisputedPayload),
}

impl ChannelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChannelEvent::ChannelUpdated(_) => EventKind::ChannelUpdated,
            ChannelEvent::DepositReconciled(_) => EventKind::DepositReconciled,
            ChannelEvent::TransferCreated(_) => EventKind::TransferCreated,
            ChannelEvent::TransferResolved(_) => EventKind::TransferResolved,
            ChannelEvent::WithdrawalCreated(_) => EventKind::WithdrawalCreated,
            ChannelEvent::WithdrawalResolved(_) => EventKind::WithdrawalResolved,
            ChannelEvent::ProtocolError(_) => EventKind::ProtocolError,
            ChannelEvent::ChannelDisputed(_) => EventKind::ChannelDisputed,
        }
    }

    pub fn channel_address(&self) -> &Address {
        match self {
            ChannelEvent::ChannelUpdated(p) => &p.channel_address,
            ChannelEvent::DepositReconciled(p) => &p.channel_address,
            ChannelEvent::TransferCreated(p)
            | ChannelEvent::TransferResolved(p)
            | ChannelEvent::WithdrawalCreated(p)
            | ChannelEvent::WithdrawalResolved(p) => &p.channel_address,
            ChannelEvent::ProtocolError(e) => &e.channel_address,
            ChannelEvent::ChannelDisputed(p) => &p.channel_address,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("Timed out waiting for a {0:?} event")]
    Timeout(EventKind),
    #[error("The event bus was dropped")]
    Closed,
}

pub type EventFilter = Arc<dyn Fn(&ChannelEvent) -> bool + Send + Sync>;
type Callback = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
struct Listener {
    id: ListenerId,
    filter: Option<EventFilter>,
    callback: Callback,
    once: bool,
}

impl Listener {
    fn accepts(&self, event: &ChannelEvent) -> bool {
        match &self.filter {
            Some(filter) => filter(event),
            None => true,
        }
    }
}

#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<HashMap<EventKind, Vec<Listener>>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribe<F>(&self, kind: EventKind, filter: Option<EventFilter>, callback: F, once: bool) -> ListenerId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let listener = Listener { id, filter, callback: Arc::new(callback), once };
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).entry(kind).or_default().push(listener);
        id
    }

    /// Calls `callback` for every `kind` event that passes `filter`.
    pub fn on<F>(&self, kind: EventKind, filter: Option<EventFilter>, callback: F) -> ListenerId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.subscribe(kind, filter, callback, false)
    }

    /// Calls `callback` for the next `kind` event that passes `filter`, then unsubscribes.
    pub fn once<F>(&self, kind: EventKind, filter: Option<EventFilter>, callback: F) -> ListenerId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.subscribe(kind, filter, callback, true)
    }

    /// Resolves with the next `kind` event that passes `filter`, or fails after `timeout`.
    ///
    /// The subscription is in place when this method returns, so events posted after the call are never missed,
    /// even if the returned future has not been polled yet.
    pub fn wait_for(
        &self,
        kind: EventKind,
        timeout: Duration,
        filter: Option<EventFilter>,
    ) -> impl std::future::Future<Output = Result<ChannelEvent, EventError>> + Send + 'static {
        let (sender, receiver) = oneshot::channel();
        let sender = Mutex::new(Some(sender));
        let id = self.once(kind, filter, move |event| {
            if let Some(sender) = sender.lock().unwrap_or_else(|e| e.into_inner()).take() {
                let _ = sender.send(event.clone());
            }
        });
        let bus = self.clone();
        async move {
            match tokio::time::timeout(timeout, receiver).await {
                Ok(Ok(event)) => Ok(event),
                Ok(Err(_)) => Err(EventError::Closed),
                Err(_) => {
                    bus.remove(kind, id);
                    Err(EventError::Timeout(kind))
                }
            }
        }
    }

    /// Detaches every listener for `kind`, or for every kind if `kind` is `None`.
    pub fn off(&self, kind: Option<EventKind>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        match kind {
            Some(kind) => {
                listeners.remove(&kind);
            }
            None => listeners.clear(),
        }
    }

    pub fn remove(&self, kind: EventKind, id: ListenerId) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = listeners.get_mut(&kind) {
            list.retain(|l| l.id != id);
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).get(&kind).map(Vec::len).unwrap_or(0)
    }

    /// Delivers `event` to every matching listener. Callbacks run on the caller's task, outside the listener lock.
    pub fn post(&self, event: ChannelEvent) {
        let kind = event.kind();
        let matched = {
            let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            let Some(list) = listeners.get_mut(&kind) else {
                trace!("No listeners for {kind:?}");
                return;
            };
            let matched = list.iter().filter(|l| l.accepts(&event)).cloned().collect::<Vec<_>>();
            list.retain(|l| !(l.once && matched.iter().any(|m| m.id == l.id)));
            matched
        };
        trace!("Posting {kind:?} for {} to {} listeners", event.channel_address(), matched.len());
        for listener in matched {
            (listener.callback)(&event);
        }
    }
}

/// A filter that passes events for one channel.
pub fn for_channel(channel: Address) -> EventFilter {
    Arc::new(move |event| event.channel_address() == &channel)
}
