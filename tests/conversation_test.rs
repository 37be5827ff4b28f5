mod common;

use common::test_env;
use futures::future::join_all;
use parley_service::error::AppError;
use parley_service::services::conversation_service::ConversationService;
use parley_service::storage::ChatStore;
use uuid::Uuid;

#[tokio::test]
async fn self_conversations_are_refused() {
    let env = test_env();
    let user = Uuid::new_v4();
    let err = ConversationService::get_or_create(&*env.state.store, user, user)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SelfConversation));
}

#[tokio::test]
async fn the_pair_is_order_independent() {
    let env = test_env();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let first = ConversationService::get_or_create(&*env.state.store, a, b)
        .await
        .unwrap();
    let second = ConversationService::get_or_create(&*env.state.store, b, a)
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn concurrent_creates_collapse_to_one_conversation() {
    let env = test_env();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let attempts = (0..16).map(|i| {
        let store = env.state.store.clone();
        async move {
            if i % 2 == 0 {
                ConversationService::get_or_create(&*store, a, b).await
            } else {
                ConversationService::get_or_create(&*store, b, a).await
            }
        }
    });
    let results = join_all(attempts).await;

    let ids: std::collections::HashSet<Uuid> =
        results.into_iter().map(|r| r.unwrap().id).collect();
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn authorization_distinguishes_missing_from_outsider() {
    let env = test_env();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let conv = ConversationService::get_or_create(&*env.state.store, a, b)
        .await
        .unwrap();

    let err = ConversationService::authorize(&*env.state.store, Uuid::new_v4(), a)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    let err = ConversationService::authorize(&*env.state.store, conv.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotAParticipant));

    assert!(ConversationService::authorize(&*env.state.store, conv.id, b)
        .await
        .is_ok());
}

#[tokio::test]
async fn only_the_blocker_can_unblock() {
    let env = test_env();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let conv = ConversationService::get_or_create(&*env.state.store, a, b)
        .await
        .unwrap();

    let blocked = ConversationService::set_blocked(&*env.state.store, conv.id, a, true)
        .await
        .unwrap();
    assert_eq!(blocked.blocked_by, Some(a));

    // the counterpart can neither lift nor stack a block
    let err = ConversationService::set_blocked(&*env.state.store, conv.id, b, false)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ConversationBlocked));
    let err = ConversationService::set_blocked(&*env.state.store, conv.id, b, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ConversationBlocked));

    // re-blocking one's own block is a no-op
    let still = ConversationService::set_blocked(&*env.state.store, conv.id, a, true)
        .await
        .unwrap();
    assert_eq!(still.blocked_by, Some(a));

    let unblocked = ConversationService::set_blocked(&*env.state.store, conv.id, a, false)
        .await
        .unwrap();
    assert_eq!(unblocked.blocked_by, None);

    // unblocking an unblocked conversation is a no-op
    let still = ConversationService::set_blocked(&*env.state.store, conv.id, b, false)
        .await
        .unwrap();
    assert_eq!(still.blocked_by, None);
}

#[tokio::test]
async fn block_transitions_serialize_in_the_store() {
    let env = test_env();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let conv = ConversationService::get_or_create(&*env.state.store, a, b)
        .await
        .unwrap();

    env.state.store.set_blocked(conv.id, a, true).await.unwrap();

    // a blocker who lost the race is rejected, not silently overwritten
    let err = env.state.store.set_blocked(conv.id, b, true).await.unwrap_err();
    assert!(matches!(err, AppError::ConversationBlocked));
    // and their stale unblock cannot clear the winner's block either
    let err = env.state.store.set_blocked(conv.id, b, false).await.unwrap_err();
    assert!(matches!(err, AppError::ConversationBlocked));

    let current = env.state.store.conversation(conv.id).await.unwrap().unwrap();
    assert_eq!(current.blocked_by, Some(a));

    // the winner's own transitions stay idempotent
    env.state.store.set_blocked(conv.id, a, true).await.unwrap();
    env.state.store.set_blocked(conv.id, a, false).await.unwrap();
    env.state.store.set_blocked(conv.id, a, false).await.unwrap();
    let current = env.state.store.conversation(conv.id).await.unwrap().unwrap();
    assert_eq!(current.blocked_by, None);
}

#[tokio::test]
async fn outsiders_cannot_block() {
    let env = test_env();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let conv = ConversationService::get_or_create(&*env.state.store, a, b)
        .await
        .unwrap();

    let err = ConversationService::set_blocked(&*env.state.store, conv.id, Uuid::new_v4(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotAParticipant));
}

#[tokio::test]
async fn deletion_tombstones_and_recreation_revives() {
    let env = test_env();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let conv = ConversationService::get_or_create(&*env.state.store, a, b)
        .await
        .unwrap();

    ConversationService::delete(&*env.state.store, conv.id, a)
        .await
        .unwrap();
    let err = ConversationService::authorize(&*env.state.store, conv.id, a)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    // the pair maps back to the same revived conversation, not a duplicate
    let revived = ConversationService::get_or_create(&*env.state.store, a, b)
        .await
        .unwrap();
    assert_eq!(revived.id, conv.id);
}
