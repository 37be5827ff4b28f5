mod common;

use common::{drain_events, next_event, test_env};
use parley_service::presence::reaper;
use parley_service::presence::ConnectionHandle;
use uuid::Uuid;

#[tokio::test]
async fn first_handle_is_the_online_transition() {
    let env = test_env();
    let user = Uuid::new_v4();

    let (first, _rx1) = ConnectionHandle::new(user);
    let (second, _rx2) = ConnectionHandle::new(user);

    assert!(env.state.presence.register(first.clone()).await);
    assert!(!env.state.presence.register(second.clone()).await);
    assert!(env.state.presence.is_online(user).await);
    assert_eq!(env.state.presence.connection_count().await, 2);

    assert_eq!(env.state.presence.unregister(user, first.id).await, 1);
    assert!(env.state.presence.is_online(user).await);
    assert_eq!(env.state.presence.unregister(user, second.id).await, 0);
    assert!(!env.state.presence.is_online(user).await);
}

#[tokio::test]
async fn presence_broadcast_skips_the_transitioning_user() {
    let env = test_env();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let (alice_handle, mut alice_rx) = ConnectionHandle::new(alice);
    let (bob_handle, mut bob_rx) = ConnectionHandle::new(bob);
    env.state.presence.register(alice_handle).await;
    env.state.presence.register(bob_handle).await;

    env.state.presence.broadcast_presence(alice, true).await;

    let event = next_event(&mut bob_rx).expect("bob should hear about alice");
    assert_eq!(event["type"], "presence.changed");
    assert_eq!(event["user_id"], alice.to_string());
    assert_eq!(event["online"], true);
    assert!(next_event(&mut alice_rx).is_none());
}

#[tokio::test]
async fn sweep_removes_dead_handles_and_marks_offline() {
    let env = test_env();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let (alice_handle, alice_rx) = ConnectionHandle::new(alice);
    let (bob_handle, mut bob_rx) = ConnectionHandle::new(bob);
    env.state.presence.register(alice_handle).await;
    env.state.presence.register(bob_handle).await;

    // Dropping the receiver simulates a socket task that died without
    // unregistering.
    drop(alice_rx);

    let reaped = reaper::sweep(&env.state.presence, &*env.accounts).await;
    assert_eq!(reaped, 1);
    assert!(!env.state.presence.is_online(alice).await);
    assert!(env.state.presence.is_online(bob).await);

    let event = next_event(&mut bob_rx).expect("offline transition should broadcast");
    assert_eq!(event["type"], "presence.changed");
    assert_eq!(event["online"], false);

    assert_eq!(env.accounts.offline_marks().await, vec![alice]);
}

#[tokio::test]
async fn sweep_leaves_live_handles_alone() {
    let env = test_env();
    let user = Uuid::new_v4();

    let (live, _live_rx) = ConnectionHandle::new(user);
    let (dead, dead_rx) = ConnectionHandle::new(user);
    env.state.presence.register(live).await;
    env.state.presence.register(dead.clone()).await;
    drop(dead_rx);

    let reaped = reaper::sweep(&env.state.presence, &*env.accounts).await;
    assert_eq!(reaped, 1);
    // the user still has a live handle, so no offline transition happened
    assert!(env.state.presence.is_online(user).await);
    assert!(env.accounts.offline_marks().await.is_empty());
}

#[tokio::test]
async fn sweep_survives_directory_failures() {
    let env = test_env();
    let user = Uuid::new_v4();

    let (handle, rx) = ConnectionHandle::new(user);
    env.state.presence.register(handle).await;
    drop(rx);
    env.accounts.fail_offline_marks(true).await;

    let reaped = reaper::sweep(&env.state.presence, &*env.accounts).await;
    assert_eq!(reaped, 1);
    // registry cleanup happens even when the external sync fails
    assert!(!env.state.presence.is_online(user).await);
}

#[tokio::test]
async fn remove_if_dead_spares_a_live_handle() {
    let env = test_env();
    let user = Uuid::new_v4();

    let (handle, mut rx) = ConnectionHandle::new(user);
    env.state.presence.register(handle.clone()).await;

    assert!(env.state.presence.remove_if_dead(user, handle.id).await.is_none());
    assert!(env.state.presence.is_online(user).await);
    let _ = drain_events(&mut rx);
}
