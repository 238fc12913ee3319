//! Per-channel mutual exclusion for locally-initiated updates.

use crate::primitives::{Address, Bytes32};
use log::*;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock {0} is not held")]
    NotHeld(String),
    #[error("The token presented for lock {0} does not match the holder's")]
    InvalidToken(String),
}

/// Proof of holding a named lock. It must be presented to release it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LockToken(Bytes32);

pub trait LockService: Send + Sync + 'static {
    /// Wait until `name` is free, then take it.
    fn acquire_lock(&self, name: &str) -> impl Future<Output = Result<LockToken, LockError>> + Send;

    fn release_lock(&self, name: &str, token: LockToken) -> impl Future<Output = Result<(), LockError>> + Send;
}

#[derive(Default)]
struct LockTable {
    locks: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
    held: HashMap<String, (LockToken, OwnedMutexGuard<()>)>,
}

/// An in-process lock service. Waiters are served in FIFO order.
#[derive(Clone, Default)]
pub struct MemoryLockService {
    table: Arc<Mutex<LockTable>>,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).held.contains_key(name)
    }
}

impl LockService for MemoryLockService {
    async fn acquire_lock(&self, name: &str) -> Result<LockToken, LockError> {
        let mutex = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(table.locks.entry(name.to_string()).or_default())
        };
        let guard = mutex.lock_owned().await;
        let token = LockToken(Bytes32::random());
        trace!("Acquired lock {name}");
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.held.insert(name.to_string(), (token, guard));
        Ok(token)
    }

    async fn release_lock(&self, name: &str, token: LockToken) -> Result<(), LockError> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        match table.held.get(name) {
            None => Err(LockError::NotHeld(name.to_string())),
            Some((held, _)) if *held != token => Err(LockError::InvalidToken(name.to_string())),
            Some(_) => {
                // Dropping the guard hands the lock to the next waiter
                table.held.remove(name);
                if table.locks.get(name).is_some_and(|m| Arc::strong_count(m) == 1) {
                    table.locks.remove(name);
                }
                trace!("Released lock {name}");
                Ok(())
            }
        }
    }
}

type ChannelMutex = Arc<tokio::sync::Mutex<()>>;

/// One mutex per channel, for read-apply-write cycles against the store. Channels never wait on each other.
#[derive(Default)]
pub(crate) struct ChannelMutexes {
    mutexes: Mutex<HashMap<Address, ChannelMutex>>,
}

impl ChannelMutexes {
    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<Address, ChannelMutex>> {
        self.mutexes.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) async fn lock(&self, channel: &Address) -> ChannelGuard<'_> {
        let mutex = Arc::clone(self.table().entry(*channel).or_default());
        let guard = mutex.lock_owned().await;
        ChannelGuard { owner: self, channel: *channel, guard: Some(guard) }
    }
}

/// Holds a channel's mutex. The map entry goes away with the last guard or waiter.
pub(crate) struct ChannelGuard<'a> {
    owner: &'a ChannelMutexes,
    channel: Address,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ChannelGuard<'_> {
    fn drop(&mut self) {
        let mut table = self.owner.table();
        self.guard.take();
        if table.get(&self.channel).is_some_and(|m| Arc::strong_count(m) == 1) {
            table.remove(&self.channel);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn lock_is_exclusive() {
        env_logger::try_init().ok();
        let locks = MemoryLockService::new();
        let token = locks.acquire_lock("channel").await.unwrap();
        assert!(locks.is_locked("channel"));

        let contender = locks.clone();
        let waiter = tokio::spawn(async move { contender.acquire_lock("channel").await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        // Other names are independent
        let other = locks.acquire_lock("other").await.unwrap();
        locks.release_lock("other", other).await.unwrap();

        locks.release_lock("channel", token).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap().unwrap();
        assert_ne!(second, token);
        locks.release_lock("channel", second).await.unwrap();
        assert!(!locks.is_locked("channel"));
        assert!(locks.table.lock().unwrap().locks.is_empty());
    }

    #[tokio::test]
    async fn released_locks_are_forgotten() {
        let locks = MemoryLockService::new();
        for i in 0..10 {
            let name = format!("channel-{i}");
            let token = locks.acquire_lock(&name).await.unwrap();
            locks.release_lock(&name, token).await.unwrap();
        }
        assert!(locks.table.lock().unwrap().locks.is_empty());
    }

    #[tokio::test]
    async fn channel_mutexes_are_independent() {
        let mutexes = Arc::new(ChannelMutexes::default());
        let a = Address::derive_from(b"a");
        let b = Address::derive_from(b"b");
        let held = mutexes.lock(&a).await;
        // Another channel is free while `a` is held
        let other = tokio::time::timeout(Duration::from_secs(1), mutexes.lock(&b)).await.unwrap();
        drop(other);

        let contender = Arc::clone(&mutexes);
        let waiter = tokio::spawn(async move {
            let _guard = contender.lock(&a).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(mutexes.table().is_empty());
    }

    #[tokio::test]
    async fn release_requires_the_holder_token() {
        let locks = MemoryLockService::new();
        assert_eq!(
            locks.release_lock("channel", LockToken(Bytes32::ZERO)).await,
            Err(LockError::NotHeld("channel".into()))
        );
        let token = locks.acquire_lock("channel").await.unwrap();
        assert_eq!(
            locks.release_lock("channel", LockToken(Bytes32::ZERO)).await,
            Err(LockError::InvalidToken("channel".into()))
        );
        locks.release_lock("channel", token).await.unwrap();
    }
}
