//! What the two sync engines say to each other.

use crate::primitives::{Address, PublicIdentifier};
use crate::state::ChannelUpdate;
use crate::update::UpdateError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Why an inbound update was refused. Sent back to the proposer and posted locally.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum InboundFailure {
    /// The update does not advance our state. Our latest update is attached so the proposer can catch up.
    #[error("Stale update nonce")]
    StaleUpdateNonce,
    #[error("Channel nonces have diverged too far to recover (local {local}, requested {requested})")]
    StaleChannelNonce { local: u64, requested: u64 },
    #[error("The proposer is one update ahead but did not send a usable latest update")]
    StaleChannelNonceNoUpdate,
    #[error("Channel {0} not found")]
    ChannelNotFound(Address),
    #[error("Both parties proposed an update for the same nonce")]
    UpdateCollision,
    #[error("Invalid update: {0}")]
    InvalidUpdate(UpdateError),
    #[error("Could not save the channel: {0}")]
    SaveChannelFailed(String),
    #[error("Could not read channel data: {0}")]
    ContextUnavailable(String),
}

/// A rejection, as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
    pub channel_address: Address,
    /// The nonce of the update being rejected
    pub nonce: u64,
    pub reason: InboundFailure,
    /// The rejecting party's latest update, when it helps the proposer resynchronise
    pub latest_update: Option<ChannelUpdate>,
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "update #{} on {} rejected: {}", self.nonce, self.channel_address, self.reason)
    }
}

/// A proposal (one signature) or an acknowledgement (both signatures), with the sender's latest canonical update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMessage {
    pub update: ChannelUpdate,
    pub latest_update: Option<ChannelUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    Update(Box<UpdateMessage>),
    Error(Box<ProtocolError>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub from: PublicIdentifier,
    pub to: PublicIdentifier,
    pub body: MessageBody,
}

impl ChannelMessage {
    pub fn update(
        from: PublicIdentifier,
        to: PublicIdentifier,
        update: ChannelUpdate,
        latest: Option<ChannelUpdate>,
    ) -> Self {
        let body = MessageBody::Update(Box::new(UpdateMessage { update, latest_update: latest }));
        ChannelMessage { from, to, body }
    }

    pub fn error(from: PublicIdentifier, to: PublicIdentifier, error: ProtocolError) -> Self {
        ChannelMessage { from, to, body: MessageBody::Error(Box::new(error)) }
    }
}

impl Display for ChannelMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.body {
            MessageBody::Update(m) => write!(f, "{} -> {}: {}", self.from, self.to, m.update),
            MessageBody::Error(e) => write!(f, "{} -> {}: {e}", self.from, self.to),
        }
    }
}
