mod common;

use common::{config, init_tracing, FakeBackend};
use skillbee::backend::{AuthEventKind, Backend};
use skillbee::models::{ProfileDetails, Role, VerificationStatus};
use skillbee::session::{SessionState, SessionStore};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn store(backend: &Arc<FakeBackend>) -> Arc<SessionStore> {
    let backend: Arc<dyn Backend> = backend.clone();
    SessionStore::new(backend, &config())
}

#[tokio::test]
async fn starts_loading_and_resolves_signed_out() {
    init_tracing();
    let backend = FakeBackend::new();
    let store = store(&backend);
    assert!(store.snapshot().loading);

    store.init().await;
    assert_eq!(store.snapshot(), SessionState::signed_out());
}

#[tokio::test]
async fn init_restores_existing_session_with_profile() {
    let backend = FakeBackend::new();
    let identity = backend.add_user("amara@example.com", Role::Tasker, Some(VerificationStatus::Approved));
    backend.set_session(Some(identity.clone()));

    let store = store(&backend);
    store.init().await;

    let state = store.snapshot();
    assert!(!state.loading);
    assert_eq!(state.identity, Some(identity));
    assert_eq!(state.role(), Some(Role::Tasker));
}

#[tokio::test]
async fn session_read_failure_resolves_as_signed_out() {
    let backend = FakeBackend::new();
    backend.fail("current_session");
    let store = store(&backend);
    store.init().await;
    assert_eq!(store.snapshot(), SessionState::signed_out());
}

#[tokio::test]
async fn profile_failure_still_clears_loading() {
    let backend = FakeBackend::new();
    let identity = backend.add_user("amara@example.com", Role::Client, None);
    backend.set_session(Some(identity));
    backend.fail("fetch_profile");

    let store = store(&backend);
    store.init().await;

    let state = store.snapshot();
    assert!(!state.loading);
    assert!(state.identity.is_some());
    assert!(state.profile.is_none());
}

#[tokio::test(start_paused = true)]
async fn init_gives_up_after_timeout() {
    let backend = FakeBackend::new();
    backend.state().session_delay = Some(Duration::from_secs(60));

    let store = store(&backend);
    store.init().await;

    let state = store.snapshot();
    assert!(!state.loading);
    assert!(state.identity.is_none());
}

#[tokio::test(start_paused = true)]
async fn stale_profile_never_overwrites_newer_user() {
    init_tracing();
    let backend = FakeBackend::new();
    backend.add_user("slow@example.com", Role::Client, None);
    backend.add_user("fast@example.com", Role::Tasker, Some(VerificationStatus::Approved));
    backend.delay_profile("slow", Duration::from_secs(1));

    let store = store(&backend);
    store.init().await;

    let first = {
        let store = store.clone();
        tokio::spawn(async move { store.sign_in("slow@example.com", "pw").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.identity().map(|i| i.id), Some("slow".to_string()));

    store.sign_in("fast@example.com", "pw").await.unwrap();
    assert_eq!(store.profile().map(|p| p.id), Some("fast".to_string()));

    first.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let state = store.snapshot();
    assert_eq!(state.identity.map(|i| i.id), Some("fast".to_string()));
    assert_eq!(state.profile.map(|p| p.id), Some("fast".to_string()));
}

#[tokio::test]
async fn follows_auth_events() {
    let backend = FakeBackend::new();
    let identity = backend.add_user("amara@example.com", Role::Client, None);
    let store = store(&backend);
    store.init().await;

    let mut rx = store.subscribe();
    backend.emit(AuthEventKind::SignedIn, Some(identity));
    let state = tokio::time::timeout(
        Duration::from_secs(1),
        rx.wait_for(|s| s.profile.is_some()),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(state.role(), Some(Role::Client));

    backend.emit(AuthEventKind::SignedOut, None);
    tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| s.identity.is_none()))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn ignores_events_after_shutdown() {
    let backend = FakeBackend::new();
    let identity = backend.add_user("amara@example.com", Role::Client, None);
    let store = store(&backend);
    store.init().await;
    store.shutdown();

    backend.emit(AuthEventKind::SignedIn, Some(identity));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.identity().is_none());
}

#[tokio::test]
async fn sign_in_with_bad_password_keeps_state() {
    let backend = FakeBackend::new();
    backend.add_user("amara@example.com", Role::Client, None);
    let store = store(&backend);
    store.init().await;

    let err = store.sign_in("amara@example.com", "wrong").await.unwrap_err();
    assert_eq!(err.user_message(), "Invalid email or password.");
    assert_eq!(store.snapshot(), SessionState::signed_out());
}

#[tokio::test]
async fn sign_out_clears_state_even_when_backend_fails() {
    let backend = FakeBackend::new();
    backend.add_user("amara@example.com", Role::Client, None);
    let store = store(&backend);
    store.init().await;
    store.sign_in("amara@example.com", "pw").await.unwrap();

    backend.fail("sign_out");
    assert!(store.sign_out().await.is_err());
    assert_eq!(store.snapshot(), SessionState::signed_out());
}

#[tokio::test]
async fn sign_up_creates_missing_profile_and_wallet() {
    let backend = FakeBackend::new();
    backend.trigger_creates_profile.store(false, Ordering::SeqCst);
    let store = store(&backend);
    store.init().await;

    let details = ProfileDetails {
        full_name: Some("Amara N".to_string()),
        phone: Some("+256700000000".to_string()),
        address: None,
    };
    let result = store
        .sign_up("amara@example.com", "secret123", Role::Tasker, details)
        .await
        .unwrap();
    assert!(result.session_active);
    assert_eq!(result.identity.metadata_role(), Role::Tasker);

    let id = result.identity.id;
    let row = backend.profile(&id).unwrap();
    assert_eq!(row.role, Role::Tasker);
    assert_eq!(row.full_name.as_deref(), Some("Amara N"));
    assert_eq!(backend.balance(&id), Some(0.0));
    assert_eq!(backend.state().wallets.len(), 1);
    assert_eq!(store.profile().map(|p| p.id), Some(id));
}

#[tokio::test]
async fn sign_up_keeps_trigger_row() {
    let backend = FakeBackend::new();
    let store = store(&backend);
    store.init().await;

    store
        .sign_up("amara@example.com", "secret123", Role::Client, ProfileDetails::default())
        .await
        .unwrap();
    assert_eq!(backend.calls("insert_profile"), 0);
}

#[tokio::test]
async fn sign_up_awaiting_confirmation_stays_signed_out() {
    let backend = FakeBackend::new();
    backend.confirm_email.store(true, Ordering::SeqCst);
    let store = store(&backend);
    store.init().await;

    let result = store
        .sign_up("amara@example.com", "secret123", Role::Tasker, ProfileDetails::default())
        .await
        .unwrap();
    assert!(!result.session_active);
    assert!(store.identity().is_none());
}

#[tokio::test]
async fn wallet_failure_does_not_fail_sign_up() {
    let backend = FakeBackend::new();
    backend.fail("create_wallet");
    let store = store(&backend);
    store.init().await;

    let result = store
        .sign_up("amara@example.com", "secret123", Role::Client, ProfileDetails::default())
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn duplicate_sign_up_is_rejected() {
    let backend = FakeBackend::new();
    backend.add_user("amara@example.com", Role::Client, None);
    let store = store(&backend);
    store.init().await;

    let err = store
        .sign_up("amara@example.com", "secret123", Role::Client, ProfileDetails::default())
        .await
        .unwrap_err();
    assert!(matches!(err, skillbee::error::Error::Auth(_)));
}

#[tokio::test]
async fn ready_waits_for_first_resolution() {
    let backend = FakeBackend::new();
    let identity = backend.add_user("amara@example.com", Role::Client, None);
    backend.set_session(Some(identity));
    let store = store(&backend);

    let waiter = {
        let store = store.clone();
        tokio::spawn(async move { store.ready().await })
    };
    store.init().await;
    let state = waiter.await.unwrap();
    assert!(!state.loading);
    assert!(state.profile.is_some());
}
