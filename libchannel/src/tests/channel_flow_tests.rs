//! Happy paths through the engine API, from setup to dispute.

use super::*;
use crate::balance::Balance;
use crate::chain::ChainError;
use crate::error::EngineError;
use crate::events::{for_channel, ChannelEvent, EventKind};
use crate::state::UpdateType;
use crate::transfers::{TransferKind, TransferResolver};
use crate::update::{ResolveTransferParams, UpdateError};

fn units(alice: u64, bob: u64) -> Balance {
    Balance::new(Amount::from_units(alice), Amount::from_units(bob))
}

#[tokio::test]
async fn setup_creates_matching_channels() {
    let world = World::new();
    let channel = world.setup().await;
    assert_in_sync(&world, &channel);
    let state = world.bob.channel(&channel);
    assert_eq!(state.nonce, 1);
    assert_eq!(state.participants, [world.alice.address(), world.bob.address()]);
    assert_eq!(state.timeout, CHANNEL_TIMEOUT);

    let bob = world.bob.signer.public_identifier().clone();
    let again = world.alice.engine.setup(bob, CHANNEL_TIMEOUT, network_context());
    assert!(matches!(again.await, Err(EngineError::ChannelAlreadyExists(c)) if c == channel));
}

#[tokio::test]
async fn setup_with_a_short_timeout_is_refused() {
    let world = World::new();
    let bob = world.bob.signer.public_identifier().clone();
    let result = world.alice.engine.setup(bob, MIN_CHANNEL_TIMEOUT - 1, network_context()).await;
    assert!(matches!(result, Err(EngineError::Update(UpdateError::InvalidSetup(_)))));
    assert!(world.alice.engine.get_channels().unwrap().is_empty());
    assert!(world.bob.engine.get_channels().unwrap().is_empty());
}

#[tokio::test]
async fn deposits_are_reconciled_by_either_party() {
    let world = World::new();
    let channel = world.setup().await;
    let reconciled = world.bob.engine.events().wait_for(EventKind::DepositReconciled, Duration::from_secs(5), None);

    let state = world.deposit(channel, &world.alice, &world.alice, 100).await;
    assert_eq!(state.balance(&Address::ZERO), units(100, 0));
    match reconciled.await.unwrap() {
        ChannelEvent::DepositReconciled(p) => {
            assert_eq!(p.balance, units(100, 0));
            assert_eq!(p.latest_deposit_nonce, 1);
        }
        other => panic!("unexpected event {other:?}"),
    }

    // Bob reconciles his own deposit, and one from a third party that is credited to him
    world.chain.deposit(channel, Address::ZERO, Address::derive_from(b"faucet"), Amount::from_units(7));
    let state = world.deposit(channel, &world.bob, &world.bob, 50).await;
    assert_eq!(state.balance(&Address::ZERO), units(100, 57));
    assert_eq!(state.deposit_nonce(&Address::ZERO), 3);
    assert_eq!(state.nonce, 3);
    assert_in_sync(&world, &channel);
}

#[tokio::test]
async fn concurrent_updates_are_serialised() {
    let world = World::new();
    let channel = world.funded(10, 0).await;
    let (a, b) = tokio::join!(
        world.alice.engine.deposit(channel, Address::ZERO),
        world.alice.engine.deposit(channel, Address::ZERO)
    );
    let mut nonces = vec![a.unwrap().nonce, b.unwrap().nonce];
    nonces.sort();
    assert_eq!(nonces, vec![3, 4]);
    assert_in_sync(&world, &channel);
}

#[tokio::test]
async fn hashlock_transfer_lifecycle() {
    let world = World::new();
    let channel = world.funded(100, 50).await;
    let pre_image = Bytes32::random();
    let routing_id = Bytes32::random();
    let created = world.bob.engine.events().wait_for(EventKind::TransferCreated, Duration::from_secs(5), None);

    let applied =
        world.alice.engine.create_transfer(hashlock_params(channel, 30, &pre_image, Some(routing_id))).await.unwrap();
    let transfer = applied.transfer.unwrap();
    assert_eq!(transfer.kind(), TransferKind::Hashlock);
    assert_eq!(applied.state.balance(&Address::ZERO), units(70, 50));
    assert_eq!(applied.state.locked(&Address::ZERO), Amount::from_units(30));
    assert_in_sync(&world, &channel);
    match created.await.unwrap() {
        ChannelEvent::TransferCreated(p) => {
            assert_eq!(p.transfer.transfer_id, transfer.transfer_id);
            assert_eq!(p.channel_balance, units(70, 50));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(world.bob.engine.get_active_transfers(&channel).unwrap(), vec![transfer.clone()]);
    assert_eq!(world.bob.engine.get_transfers_by_routing_id(&routing_id).unwrap().len(), 1);

    let resolve = ResolveTransferParams {
        channel_address: channel,
        transfer_id: transfer.transfer_id,
        resolver: TransferResolver::Hashlock { pre_image },
        meta: None,
    };
    // Only the responder can resolve, and a failed attempt leaves the channel usable
    let err = world.alice.engine.resolve_transfer(resolve.clone()).await.unwrap_err();
    assert!(matches!(err, EngineError::Update(UpdateError::UnauthorizedResolver)));

    let resolved = world.alice.engine.events().wait_for(EventKind::TransferResolved, Duration::from_secs(5), None);
    let applied = world.bob.engine.resolve_transfer(resolve).await.unwrap();
    assert_eq!(applied.state.balance(&Address::ZERO), units(70, 80));
    assert_eq!(applied.state.locked(&Address::ZERO), Amount::ZERO);
    assert_eq!(applied.state.merkle_root, Bytes32::ZERO);
    assert_in_sync(&world, &channel);
    let event = resolved.await.unwrap();
    assert!(matches!(event, ChannelEvent::TransferResolved(p) if p.transfer.transfer_resolver.is_some()));
    assert!(world.alice.engine.get_active_transfers(&channel).unwrap().is_empty());
    let stored = world.alice.engine.get_transfer(&transfer.transfer_id).unwrap().unwrap();
    assert!(!stored.is_active());
}

#[tokio::test]
async fn cancelled_hashlock_returns_funds() {
    let world = World::new();
    let channel = world.funded(20, 0).await;
    let pre_image = Bytes32::random();
    let transfer = world.alice.engine.create_transfer(hashlock_params(channel, 5, &pre_image, None)).await.unwrap();
    let transfer = transfer.transfer.unwrap();
    let resolve = ResolveTransferParams {
        channel_address: channel,
        transfer_id: transfer.transfer_id,
        resolver: TransferResolver::cancel(TransferKind::Hashlock),
        meta: None,
    };
    let applied = world.bob.engine.resolve_transfer(resolve).await.unwrap();
    assert_eq!(applied.state.balance(&Address::ZERO), units(20, 0));
    assert_in_sync(&world, &channel);
}

#[tokio::test]
async fn transfers_cannot_overdraw() {
    let world = World::new();
    let channel = world.funded(10, 0).await;
    let result = world.alice.engine.create_transfer(hashlock_params(channel, 11, &Bytes32::random(), None)).await;
    assert!(matches!(result, Err(EngineError::Update(UpdateError::InsufficientFunds))));
    assert_eq!(world.alice.channel(&channel).nonce, 2);
    assert_in_sync(&world, &channel);
}

#[tokio::test]
async fn withdrawal_lifecycle() {
    let world = World::new();
    let channel = world.funded(100, 0).await;
    let created = world.bob.engine.events().wait_for(EventKind::WithdrawalCreated, Duration::from_secs(5), None);
    let resolved = world.alice.engine.events().wait_for(
        EventKind::WithdrawalResolved,
        Duration::from_secs(5),
        Some(for_channel(channel)),
    );

    let applied =
        world.alice.engine.create_transfer(withdraw_params(channel, 40, 2, world.alice.address())).await.unwrap();
    let transfer = applied.transfer.unwrap();
    assert!(matches!(created.await.unwrap(), ChannelEvent::WithdrawalCreated(_)));
    assert!(matches!(world.alice.engine.sign_withdrawal(&transfer.transfer_id), Err(EngineError::NotTheResponder(_))));

    let applied = world.bob.engine.resolve_withdrawal(channel, transfer.transfer_id).await.unwrap();
    // The withdrawn amount leaves the channel and the responder keeps the fee
    assert_eq!(applied.state.balance(&Address::ZERO), units(60, 2));
    assert_eq!(applied.state.locked(&Address::ZERO), Amount::ZERO);
    assert_in_sync(&world, &channel);
    match resolved.await.unwrap() {
        ChannelEvent::WithdrawalResolved(p) => assert_eq!(p.channel_balance, units(60, 2)),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn channel_updated_events_fire_on_both_sides() {
    let world = World::new();
    let alice_events = world.alice.engine.events().wait_for(EventKind::ChannelUpdated, Duration::from_secs(5), None);
    let bob_events = world.bob.engine.events().wait_for(EventKind::ChannelUpdated, Duration::from_secs(5), None);
    let channel = world.setup().await;
    for event in [alice_events.await.unwrap(), bob_events.await.unwrap()] {
        match event {
            ChannelEvent::ChannelUpdated(p) => {
                assert_eq!(p.channel_address, channel);
                assert_eq!(p.update_type, UpdateType::Setup);
                assert_eq!(p.nonce, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}

#[tokio::test]
async fn dispute_lodges_latest_state() {
    let world = World::new();
    let unknown = Address::derive_from(b"nowhere");
    assert!(matches!(world.alice.engine.dispute_channel(unknown).await, Err(EngineError::ChannelNotFound(_))));

    let channel = world.funded(30, 0).await;
    world.alice.engine.create_transfer(hashlock_params(channel, 10, &Bytes32::random(), None)).await.unwrap();
    let disputed = world.bob.engine.events().wait_for(EventKind::ChannelDisputed, Duration::from_secs(5), None);
    let tx = world.bob.engine.dispute_channel(channel).await.unwrap();
    assert!(matches!(disputed.await.unwrap(), ChannelEvent::ChannelDisputed(p) if p.transaction_hash == tx));

    let record = world.chain.dispute(&channel).unwrap();
    assert_eq!(record.state.nonce, 3);
    assert_eq!(record.active_transfers.len(), 1);
    let again = world.alice.engine.dispute_channel(channel).await;
    assert!(matches!(again, Err(EngineError::Chain(ChainError::AlreadyDisputed(_)))));
}
