mod common;

use common::{booking, config, FakeBackend};
use skillbee::backend::Backend;
use skillbee::error::{Error, ValidationError};
use skillbee::marketplace::Marketplace;
use skillbee::prelude::*;
use skillbee::wallet::TRANSACTION_LIMIT;
use std::sync::Arc;

async fn signed_in(backend: &Arc<FakeBackend>, email: &str) -> SkillBee {
    let shared: Arc<dyn Backend> = backend.clone();
    let app = SkillBee::with_backend(config(), shared);
    app.init().await;
    app.session().sign_in(email, "pw").await.unwrap();
    app
}

#[tokio::test]
async fn client_books_an_open_request() {
    let backend = FakeBackend::new();
    backend.add_user("client@example.com", Role::Client, None);
    let app = signed_in(&backend, "client@example.com").await;

    let booking = app
        .book(BookingRequest::new(" plumbing ", 50000.0, "Ntinda").with_notes("Leaking sink"))
        .await
        .unwrap();
    assert_eq!(booking.client_id, "client");
    assert_eq!(booking.status, BookingStatus::Pending);
    assert!(booking.tasker_id.is_none());
    assert_eq!(booking.service_type.as_deref(), Some("plumbing"));

    // Open requests reach taskers
    let tasker = Profile::new("tasker", Role::Tasker);
    let open = app.marketplace().available(&tasker).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, booking.id);
}

#[tokio::test]
async fn booking_a_named_tasker_assigns_it() {
    let backend = FakeBackend::new();
    backend.add_user("client@example.com", Role::Client, None);
    let app = signed_in(&backend, "client@example.com").await;

    let booking = app
        .book(BookingRequest::new("cleaning", 20000.0, "Kira").with_tasker("tasker"))
        .await
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Assigned);
    assert_eq!(booking.tasker_id.as_deref(), Some("tasker"));
}

#[tokio::test]
async fn incomplete_booking_is_refused_before_any_call() {
    let backend = FakeBackend::new();
    backend.add_user("client@example.com", Role::Client, None);
    let app = signed_in(&backend, "client@example.com").await;

    let err = app
        .book(BookingRequest::new("cleaning", 20000.0, " "))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::MissingField("location"))
    ));
    assert_eq!(backend.calls("create_booking"), 0);
}

#[tokio::test]
async fn taskers_cannot_book() {
    let backend = FakeBackend::new();
    backend.add_user("tasker@example.com", Role::Tasker, Some(VerificationStatus::Approved));
    let app = signed_in(&backend, "tasker@example.com").await;

    let err = app
        .book(BookingRequest::new("cleaning", 20000.0, "Kira"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
    assert_eq!(backend.calls("create_booking"), 0);
}

#[tokio::test]
async fn client_lists_and_summarizes_bookings() {
    let backend = FakeBackend::new();
    backend.add_booking(booking("b1", "client", None, BookingStatus::Pending));
    backend.add_booking(booking("b2", "client", Some("tasker"), BookingStatus::InProgress));
    backend.add_booking(booking("b3", "client", Some("tasker"), BookingStatus::Completed));
    backend.add_booking(booking("b4", "other", None, BookingStatus::Pending));
    let bookings = skillbee::bookings::Bookings::new(backend.clone());

    let all = bookings.list("client", None).await.unwrap();
    let ids: Vec<&str> = all.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ids, ["b3", "b2", "b1"]);

    let done = bookings
        .list("client", Some(BookingStatus::Completed))
        .await
        .unwrap();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].id, "b3");

    assert_eq!(
        bookings.summary("client").await.unwrap(),
        BookingSummary {
            active: 2,
            completed: 1,
            total: 3
        }
    );
}

#[tokio::test]
async fn top_up_records_transaction_and_raises_balance() {
    let backend = FakeBackend::new();
    backend.add_user("client@example.com", Role::Client, None);
    backend.add_wallet("client", 1000.0);
    let app = signed_in(&backend, "client@example.com").await;

    let wallet = app.top_up(2500.0).await.unwrap();
    assert_eq!(wallet.balance, 3500.0);
    assert_eq!(backend.balance("client"), Some(3500.0));

    let overview = app.wallets().overview("client").await.unwrap();
    assert_eq!(overview.balance(), 3500.0);
    assert_eq!(overview.transactions.len(), 1);
    let tx = &overview.transactions[0];
    assert_eq!(tx.amount, 2500.0);
    assert_eq!(tx.kind.as_deref(), Some("top_up"));
    assert_eq!(tx.description.as_deref(), Some("Wallet top-up"));
}

#[tokio::test]
async fn invalid_top_up_amounts_are_refused() {
    let backend = FakeBackend::new();
    backend.add_wallet("client", 0.0);
    let wallets = skillbee::wallet::Wallets::new(backend.clone());

    for amount in [0.0, -5.0, f64::INFINITY] {
        assert!(matches!(
            wallets.top_up("client", amount).await,
            Err(Error::Validation(ValidationError::InvalidAmount))
        ));
    }
    assert_eq!(backend.calls("insert_transaction"), 0);
}

#[tokio::test]
async fn top_up_without_wallet_is_not_found() {
    let backend = FakeBackend::new();
    let wallets = skillbee::wallet::Wallets::new(backend.clone());

    let err = wallets.top_up("ghost", 100.0).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(backend.calls("insert_transaction"), 0);
}

#[tokio::test]
async fn wallet_overview_without_wallet_is_empty() {
    let backend = FakeBackend::new();
    let wallets = skillbee::wallet::Wallets::new(backend.clone());

    let overview = wallets.overview("ghost").await.unwrap();
    assert!(overview.wallet.is_none());
    assert!(overview.transactions.is_empty());
    assert_eq!(backend.calls("list_transactions"), 0);
}

#[tokio::test]
async fn transactions_are_capped() {
    let backend = FakeBackend::new();
    backend.add_wallet("client", 0.0);
    let wallets = skillbee::wallet::Wallets::new(backend.clone());
    for _ in 0..(TRANSACTION_LIMIT + 5) {
        wallets.top_up("client", 1.0).await.unwrap();
    }

    let overview = wallets.overview("client").await.unwrap();
    assert_eq!(overview.transactions.len(), TRANSACTION_LIMIT as usize);
    assert_eq!(overview.balance(), f64::from(TRANSACTION_LIMIT + 5));
}

#[tokio::test]
async fn tasker_earnings_come_from_completed_bookings() {
    let backend = FakeBackend::new();
    let mut done = booking("b1", "client", Some("tasker"), BookingStatus::Completed);
    done.budget = Some(40000.0);
    let mut ongoing = booking("b2", "client", Some("tasker"), BookingStatus::InProgress);
    ongoing.budget = Some(15000.0);
    backend.add_booking(done);
    backend.add_booking(ongoing);
    let wallets = skillbee::wallet::Wallets::new(backend.clone());

    let earnings = wallets.earnings("tasker").await.unwrap();
    assert_eq!(earnings.completed.len(), 1);
    assert_eq!(earnings.total, 40000.0);
}

#[tokio::test]
async fn tasker_ratings_average() {
    let backend = FakeBackend::new();
    backend.add_rating("tasker", "b1", 5.0);
    backend.add_rating("tasker", "b2", 3.0);
    backend.add_rating("someone-else", "b3", 1.0);
    let marketplace = Marketplace::new(backend.clone(), 50.0);

    let summary = marketplace.ratings("tasker").await.unwrap();
    assert_eq!(summary.count(), 2);
    assert_eq!(summary.average, 4.0);
    assert_eq!(summary.for_booking("b1"), Some(5.0));
}

#[tokio::test]
async fn support_ticket_is_stored_open() {
    let backend = FakeBackend::new();
    backend.add_user("client@example.com", Role::Client, None);
    let app = signed_in(&backend, "client@example.com").await;

    let receipt = app
        .contact_support(" Payment ", "My top-up did not arrive")
        .await
        .unwrap();
    assert!(receipt.recorded);

    let tickets = backend.state().tickets.clone();
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].user_id, "client");
    assert_eq!(tickets[0].subject, "Payment");
    assert_eq!(tickets[0].status, "open");
}

#[tokio::test]
async fn support_still_thanks_when_storage_fails() {
    let backend = FakeBackend::new();
    backend.fail("insert_ticket");
    let support = skillbee::support::Support::new(backend.clone());

    let receipt = support
        .open_ticket("client", "Hello", "Anyone there?")
        .await
        .unwrap();
    assert!(!receipt.recorded);
    assert_eq!(
        receipt.message(),
        "Thank you for contacting us! We will get back to you soon."
    );
}

#[tokio::test]
async fn support_needs_subject_and_message() {
    let backend = FakeBackend::new();
    let support = skillbee::support::Support::new(backend.clone());

    assert!(matches!(
        support.open_ticket("client", "Hello", "   ").await,
        Err(Error::Validation(ValidationError::MissingField("message")))
    ));
    assert_eq!(backend.calls("insert_ticket"), 0);
}
