//! Remote backend facade
//!
//! The core talks to the hosted platform only through these traits. The
//! Supabase implementation lives in [`supabase`]; tests provide in-memory
//! ones.

pub mod supabase;

use crate::error::Result;
use crate::models::{
    Booking, BookingStatus, Identity, Message, NewBooking, NewMessage, NewProfile,
    NewSupportTicket, NewTransaction, Profile, ProfilePatch, Rating, ReviewUpdate, Role,
    Transaction, VerificationStatus, VerificationSubmission, Wallet,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

pub use supabase::SupabaseBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Auth state change pushed by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub identity: Option<Identity>,
}

/// Result of a sign-up request
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpResult {
    pub identity: Identity,
    /// False when the account must confirm its email before a session exists
    pub session_active: bool,
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// The current session's identity, refreshing an expired token first
    async fn current_session(&self) -> Result<Option<Identity>>;

    /// Auth state changes for as long as the receiver lives
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;

    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> Result<SignUpResult>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity>;

    async fn sign_out(&self) -> Result<()>;

    /// Adopt tokens from an email-confirmation redirect
    async fn set_session(&self, access_token: &str, refresh_token: &str)
        -> Result<Option<Identity>>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Absent rows are `Ok(None)`.
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>>;

    async fn fetch_profiles(&self, user_ids: &[String]) -> Result<Vec<Profile>>;

    async fn insert_profile(&self, profile: &NewProfile) -> Result<()>;

    async fn update_profile(&self, user_id: &str, patch: &ProfilePatch) -> Result<Option<Profile>>;

    async fn set_role(&self, user_id: &str, role: Role) -> Result<()>;

    async fn set_verification_status(
        &self,
        user_id: &str,
        status: Option<VerificationStatus>,
    ) -> Result<()>;

    /// Create an empty wallet for a new account
    async fn create_wallet(&self, user_id: &str) -> Result<()>;
}

#[async_trait]
pub trait VerificationStore: Send + Sync {
    async fn fetch_submission(&self, user_id: &str) -> Result<Option<VerificationSubmission>>;

    /// Insert or replace keyed on `user_id`
    async fn upsert_submission(
        &self,
        submission: &VerificationSubmission,
    ) -> Result<VerificationSubmission>;

    /// Newest first; `None` lists every status
    async fn list_submissions(
        &self,
        status: Option<VerificationStatus>,
    ) -> Result<Vec<VerificationSubmission>>;

    async fn count_submissions(&self, status: VerificationStatus) -> Result<u64>;

    async fn record_review(&self, user_id: &str, review: &ReviewUpdate) -> Result<()>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns the stored key inside the bucket, not a URL.
    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
        upsert: bool,
    ) -> Result<String>;

    async fn signed_url(&self, bucket: &str, key: &str, expires_in: u64) -> Result<String>;

    fn public_url(&self, bucket: &str, key: &str) -> String;
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn fetch_booking(&self, booking_id: &str) -> Result<Option<Booking>>;

    /// Pending bookings a client addressed to this tasker
    async fn offered_bookings(&self, tasker_id: &str) -> Result<Vec<Booking>>;

    /// Pending bookings with no tasker, newest first
    async fn open_bookings(&self) -> Result<Vec<Booking>>;

    /// Bookings where the user is client or tasker and a tasker is assigned
    async fn participant_bookings(&self, user_id: &str) -> Result<Vec<Booking>>;

    async fn assign_booking(&self, booking_id: &str, tasker_id: &str) -> Result<Option<Booking>>;

    /// Clears the tasker only when it is `tasker_id`
    async fn release_booking(&self, booking_id: &str, tasker_id: &str)
        -> Result<Option<Booking>>;

    async fn create_booking(&self, booking: &NewBooking) -> Result<Booking>;

    /// A client's bookings, newest first; `None` lists every status
    async fn client_bookings(
        &self,
        client_id: &str,
        status: Option<&BookingStatus>,
    ) -> Result<Vec<Booking>>;

    /// Every booking assigned to the tasker, newest first
    async fn tasker_bookings(&self, tasker_id: &str) -> Result<Vec<Booking>>;

    /// Newest first
    async fn tasker_ratings(&self, tasker_id: &str) -> Result<Vec<Rating>>;
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Absent rows are `Ok(None)`.
    async fn fetch_wallet(&self, user_id: &str) -> Result<Option<Wallet>>;

    /// Newest first, at most `limit`
    async fn list_transactions(&self, user_id: &str, limit: u32) -> Result<Vec<Transaction>>;

    async fn insert_transaction(&self, transaction: &NewTransaction) -> Result<Transaction>;

    async fn set_balance(&self, user_id: &str, balance: f64) -> Result<()>;
}

#[async_trait]
pub trait SupportStore: Send + Sync {
    async fn insert_ticket(&self, ticket: &NewSupportTicket) -> Result<()>;
}

/// Live message feed for one booking. Dropping it ends the subscription.
pub struct MessageFeed {
    receiver: mpsc::Receiver<Message>,
    forwarder: Option<JoinHandle<()>>,
}

impl MessageFeed {
    pub fn new(receiver: mpsc::Receiver<Message>, forwarder: Option<JoinHandle<()>>) -> Self {
        Self {
            receiver,
            forwarder,
        }
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }
}

impl Drop for MessageFeed {
    fn drop(&mut self) {
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Oldest first
    async fn list_messages(&self, booking_id: &str) -> Result<Vec<Message>>;

    async fn latest_message(&self, booking_id: &str) -> Result<Option<Message>>;

    async fn unread_count(&self, booking_id: &str, receiver_id: &str) -> Result<u64>;

    async fn insert_message(&self, message: &NewMessage) -> Result<Message>;

    async fn mark_read(&self, booking_id: &str, receiver_id: &str) -> Result<()>;

    async fn subscribe_messages(&self, booking_id: &str) -> Result<MessageFeed>;
}

/// Everything the core needs from the platform
pub trait Backend:
    AuthBackend
    + ProfileStore
    + VerificationStore
    + ObjectStore
    + BookingStore
    + MessageStore
    + WalletStore
    + SupportStore
{
}

impl<T> Backend for T where
    T: AuthBackend
        + ProfileStore
        + VerificationStore
        + ObjectStore
        + BookingStore
        + MessageStore
        + WalletStore
        + SupportStore
{
}
