//! Supabase implementation of the backend facade

use super::{
    AuthBackend, AuthEvent, AuthEventKind, BookingStore, MessageFeed, MessageStore, ObjectStore,
    ProfileStore, SignUpResult, SupportStore, VerificationStore, WalletStore,
};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::models::{
    Booking, BookingStatus, Identity, Message, NewBooking, NewMessage, NewProfile,
    NewSupportTicket, NewTransaction, Profile, ProfilePatch, Rating, ReviewUpdate, Role,
    Transaction, VerificationStatus, VerificationSubmission, Wallet,
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde_json::{json, Value};
use skillbee_auth::{AuthChangeEvent, AuthClient, AuthOptions, SignUpOutcome};
use skillbee_postgrest::{PostgrestClient, SortOrder};
use skillbee_realtime::{DatabaseChanges, RealtimeClient};
use skillbee_storage::{FileOptions, StorageClient};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const USERS: &str = "users";
const WALLETS: &str = "wallets";
const VERIFICATIONS: &str = "tasker_verifications";
const BOOKINGS: &str = "bookings";
const MESSAGES: &str = "messages";
const TRANSACTIONS: &str = "transactions";
const RATINGS: &str = "ratings";
const SUPPORT_TICKETS: &str = "support_tickets";

/// Backend over Supabase auth, PostgREST, storage and realtime
pub struct SupabaseBackend {
    url: String,
    key: String,
    http_client: Client,
    auth: Arc<AuthClient>,
    storage: StorageClient,
    realtime: RealtimeClient,
    events: broadcast::Sender<AuthEvent>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl SupabaseBackend {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build()?;

        let auth = AuthClient::new(
            &config.supabase_url,
            &config.anon_key,
            http_client.clone(),
            AuthOptions::default(),
        );
        let storage = StorageClient::new(&config.supabase_url, &config.anon_key, http_client.clone());
        let realtime = RealtimeClient::new(&config.supabase_url, &config.anon_key);
        let (events, _) = broadcast::channel(32);

        Ok(Self {
            url: config.supabase_url.clone(),
            key: config.anon_key.clone(),
            http_client,
            auth: Arc::new(auth),
            storage,
            realtime,
            events,
            forwarder: Mutex::new(None),
        })
    }

    /// The underlying auth client
    pub fn auth(&self) -> &AuthClient {
        &self.auth
    }

    /// Query builder carrying the signed-in user's token, or the anon key.
    fn from(&self, table: &str) -> Result<PostgrestClient> {
        let token = self.auth.access_token().unwrap_or_else(|| self.key.clone());
        Ok(PostgrestClient::new(&self.url, &self.key, table, self.http_client.clone())
            .with_auth(&token)?)
    }

    fn storage(&self) -> StorageClient {
        match self.auth.access_token() {
            Some(token) => self.storage.with_auth(&token),
            None => self.storage.clone(),
        }
    }

    fn start_forwarder(&self) {
        let mut forwarder = self.forwarder.lock().unwrap_or_else(PoisonError::into_inner);
        if forwarder.as_ref().map_or(false, |t| !t.is_finished()) {
            return;
        }
        let mut changes = self.auth.on_auth_state_change();
        let events = self.events.clone();
        let realtime = self.realtime.clone();
        *forwarder = Some(tokio::spawn(async move {
            loop {
                let change = match changes.recv().await {
                    Ok(change) => change,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "auth events lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let kind = match change.event {
                    AuthChangeEvent::SignedIn => AuthEventKind::SignedIn,
                    AuthChangeEvent::SignedOut => AuthEventKind::SignedOut,
                    AuthChangeEvent::TokenRefreshed => AuthEventKind::TokenRefreshed,
                    AuthChangeEvent::UserUpdated => AuthEventKind::UserUpdated,
                };
                realtime
                    .set_auth(change.session.as_ref().map(|s| s.access_token.clone()))
                    .await;
                let identity = change.session.as_ref().map(|s| Identity::from(&s.user));
                if events.send(AuthEvent { kind, identity }).is_err() {
                    debug!(?kind, "auth event had no listeners");
                }
            }
        }));
    }
}

impl Drop for SupabaseBackend {
    fn drop(&mut self) {
        let forwarder = self
            .forwarder
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = forwarder {
            task.abort();
        }
    }
}

#[async_trait]
impl AuthBackend for SupabaseBackend {
    async fn current_session(&self) -> Result<Option<Identity>> {
        let session = self.auth.ensure_fresh().await?;
        Ok(session.map(|s| Identity::from(&s.user)))
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        let receiver = self.events.subscribe();
        self.start_forwarder();
        receiver
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> Result<SignUpResult> {
        let outcome = self.auth.sign_up(email, password, Some(metadata)).await?;
        let session_active = matches!(outcome, SignUpOutcome::Session(_));
        Ok(SignUpResult {
            identity: Identity::from(outcome.user()),
            session_active,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let session = self.auth.sign_in_with_password(email, password).await?;
        Ok(Identity::from(&session.user))
    }

    async fn sign_out(&self) -> Result<()> {
        self.auth.sign_out().await?;
        Ok(())
    }

    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<Option<Identity>> {
        let session = self.auth.set_session(access_token, refresh_token).await?;
        Ok(Some(Identity::from(&session.user)))
    }
}

#[async_trait]
impl ProfileStore for SupabaseBackend {
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        Ok(self
            .from(USERS)?
            .select("*")
            .eq("id", user_id)
            .maybe_single::<Profile>()
            .await?)
    }

    async fn fetch_profiles(&self, user_ids: &[String]) -> Result<Vec<Profile>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<&str> = user_ids.iter().map(String::as_str).collect();
        Ok(self
            .from(USERS)?
            .select("*")
            .in_list("id", &ids)
            .execute::<Profile>()
            .await?)
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<()> {
        self.from(USERS)?.insert::<_, Value>(profile).await?;
        Ok(())
    }

    async fn update_profile(&self, user_id: &str, patch: &ProfilePatch) -> Result<Option<Profile>> {
        if patch.is_empty() {
            return self.fetch_profile(user_id).await;
        }
        let rows = self
            .from(USERS)?
            .eq("id", user_id)
            .update::<_, Profile>(patch)
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn set_role(&self, user_id: &str, role: Role) -> Result<()> {
        self.from(USERS)?
            .eq("id", user_id)
            .update::<_, Value>(json!({ "role": role }))
            .await?;
        Ok(())
    }

    async fn set_verification_status(
        &self,
        user_id: &str,
        status: Option<VerificationStatus>,
    ) -> Result<()> {
        self.from(USERS)?
            .eq("id", user_id)
            .update::<_, Value>(json!({ "verification_status": status }))
            .await?;
        Ok(())
    }

    async fn create_wallet(&self, user_id: &str) -> Result<()> {
        self.from(WALLETS)?
            .insert::<_, Value>(json!({ "user_id": user_id, "balance": 0 }))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VerificationStore for SupabaseBackend {
    async fn fetch_submission(&self, user_id: &str) -> Result<Option<VerificationSubmission>> {
        Ok(self
            .from(VERIFICATIONS)?
            .select("*")
            .eq("user_id", user_id)
            .maybe_single::<VerificationSubmission>()
            .await?)
    }

    async fn upsert_submission(
        &self,
        submission: &VerificationSubmission,
    ) -> Result<VerificationSubmission> {
        let rows = self
            .from(VERIFICATIONS)?
            .upsert::<_, VerificationSubmission>(submission, "user_id")
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::general("upsert returned no submission"))
    }

    async fn list_submissions(
        &self,
        status: Option<VerificationStatus>,
    ) -> Result<Vec<VerificationSubmission>> {
        let mut query = self.from(VERIFICATIONS)?.select("*");
        if let Some(status) = status {
            query = query.eq("status", status.as_str());
        }
        Ok(query
            .order("created_at", SortOrder::Descending)
            .execute::<VerificationSubmission>()
            .await?)
    }

    async fn count_submissions(&self, status: VerificationStatus) -> Result<u64> {
        Ok(self
            .from(VERIFICATIONS)?
            .eq("status", status.as_str())
            .count()
            .await?)
    }

    async fn record_review(&self, user_id: &str, review: &ReviewUpdate) -> Result<()> {
        let rows = self
            .from(VERIFICATIONS)?
            .eq("user_id", user_id)
            .update::<_, Value>(review)
            .await?;
        if rows.is_empty() {
            return Err(Error::not_found(format!("submission for {}", user_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for SupabaseBackend {
    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
        upsert: bool,
    ) -> Result<String> {
        let options = FileOptions::new()
            .with_content_type(content_type)
            .with_cache_control("3600")
            .with_upsert(upsert);
        let storage = self.storage();
        Ok(storage.from(bucket).upload(key, data, Some(options)).await?)
    }

    async fn signed_url(&self, bucket: &str, key: &str, expires_in: u64) -> Result<String> {
        let storage = self.storage();
        Ok(storage.from(bucket).create_signed_url(key, expires_in).await?)
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        self.storage.from(bucket).get_public_url(key)
    }
}

#[async_trait]
impl BookingStore for SupabaseBackend {
    async fn fetch_booking(&self, booking_id: &str) -> Result<Option<Booking>> {
        Ok(self
            .from(BOOKINGS)?
            .select("*")
            .eq("id", booking_id)
            .maybe_single::<Booking>()
            .await?)
    }

    async fn offered_bookings(&self, tasker_id: &str) -> Result<Vec<Booking>> {
        Ok(self
            .from(BOOKINGS)?
            .select("*")
            .eq("tasker_id", tasker_id)
            .eq("status", "pending")
            .order("created_at", SortOrder::Descending)
            .execute::<Booking>()
            .await?)
    }

    async fn open_bookings(&self) -> Result<Vec<Booking>> {
        Ok(self
            .from(BOOKINGS)?
            .select("*")
            .eq("status", "pending")
            .is_null("tasker_id")
            .order("created_at", SortOrder::Descending)
            .execute::<Booking>()
            .await?)
    }

    async fn participant_bookings(&self, user_id: &str) -> Result<Vec<Booking>> {
        Ok(self
            .from(BOOKINGS)?
            .select("*")
            .or_eq(&["client_id", "tasker_id"], user_id)
            .not_null("tasker_id")
            .order("created_at", SortOrder::Descending)
            .execute::<Booking>()
            .await?)
    }

    async fn assign_booking(&self, booking_id: &str, tasker_id: &str) -> Result<Option<Booking>> {
        let rows = self
            .from(BOOKINGS)?
            .eq("id", booking_id)
            .update::<_, Booking>(json!({ "tasker_id": tasker_id, "status": "assigned" }))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn release_booking(
        &self,
        booking_id: &str,
        tasker_id: &str,
    ) -> Result<Option<Booking>> {
        let rows = self
            .from(BOOKINGS)?
            .eq("id", booking_id)
            .eq("tasker_id", tasker_id)
            .update::<_, Booking>(json!({ "tasker_id": null }))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn create_booking(&self, booking: &NewBooking) -> Result<Booking> {
        let rows = self.from(BOOKINGS)?.insert::<_, Booking>(booking).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::general("insert returned no booking"))
    }

    async fn client_bookings(
        &self,
        client_id: &str,
        status: Option<&BookingStatus>,
    ) -> Result<Vec<Booking>> {
        let mut query = self.from(BOOKINGS)?.select("*").eq("client_id", client_id);
        if let Some(status) = status {
            query = query.eq("status", status.as_str());
        }
        Ok(query
            .order("created_at", SortOrder::Descending)
            .execute::<Booking>()
            .await?)
    }

    async fn tasker_bookings(&self, tasker_id: &str) -> Result<Vec<Booking>> {
        Ok(self
            .from(BOOKINGS)?
            .select("*")
            .eq("tasker_id", tasker_id)
            .order("created_at", SortOrder::Descending)
            .execute::<Booking>()
            .await?)
    }

    async fn tasker_ratings(&self, tasker_id: &str) -> Result<Vec<Rating>> {
        Ok(self
            .from(RATINGS)?
            .select("*")
            .eq("tasker_id", tasker_id)
            .order("created_at", SortOrder::Descending)
            .execute::<Rating>()
            .await?)
    }
}

#[async_trait]
impl WalletStore for SupabaseBackend {
    async fn fetch_wallet(&self, user_id: &str) -> Result<Option<Wallet>> {
        Ok(self
            .from(WALLETS)?
            .select("*")
            .eq("user_id", user_id)
            .maybe_single::<Wallet>()
            .await?)
    }

    async fn list_transactions(&self, user_id: &str, limit: u32) -> Result<Vec<Transaction>> {
        Ok(self
            .from(TRANSACTIONS)?
            .select("*")
            .eq("user_id", user_id)
            .order("created_at", SortOrder::Descending)
            .limit(limit)
            .execute::<Transaction>()
            .await?)
    }

    async fn insert_transaction(&self, transaction: &NewTransaction) -> Result<Transaction> {
        let rows = self
            .from(TRANSACTIONS)?
            .insert::<_, Transaction>(transaction)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::general("insert returned no transaction"))
    }

    async fn set_balance(&self, user_id: &str, balance: f64) -> Result<()> {
        let rows = self
            .from(WALLETS)?
            .eq("user_id", user_id)
            .update::<_, Value>(json!({ "balance": balance }))
            .await?;
        if rows.is_empty() {
            return Err(Error::not_found(format!("wallet for {}", user_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl SupportStore for SupabaseBackend {
    async fn insert_ticket(&self, ticket: &NewSupportTicket) -> Result<()> {
        self.from(SUPPORT_TICKETS)?
            .insert::<_, Value>(ticket)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SupabaseBackend {
    async fn list_messages(&self, booking_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .from(MESSAGES)?
            .select("*")
            .eq("booking_id", booking_id)
            .order("created_at", SortOrder::Ascending)
            .execute::<Message>()
            .await?)
    }

    async fn latest_message(&self, booking_id: &str) -> Result<Option<Message>> {
        let rows = self
            .from(MESSAGES)?
            .select("*")
            .eq("booking_id", booking_id)
            .order("created_at", SortOrder::Descending)
            .limit(1)
            .execute::<Message>()
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn unread_count(&self, booking_id: &str, receiver_id: &str) -> Result<u64> {
        Ok(self
            .from(MESSAGES)?
            .eq("booking_id", booking_id)
            .eq("receiver_id", receiver_id)
            .eq("read", "false")
            .count()
            .await?)
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        let rows = self.from(MESSAGES)?.insert::<_, Message>(message).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::general("insert returned no message"))
    }

    async fn mark_read(&self, booking_id: &str, receiver_id: &str) -> Result<()> {
        self.from(MESSAGES)?
            .eq("booking_id", booking_id)
            .eq("receiver_id", receiver_id)
            .eq("read", "false")
            .update::<_, Value>(json!({ "read": true }))
            .await?;
        Ok(())
    }

    async fn subscribe_messages(&self, booking_id: &str) -> Result<MessageFeed> {
        self.realtime.set_auth(self.auth.access_token()).await;
        let mut subscription = self
            .realtime
            .subscribe(
                &format!("messages:{}", booking_id),
                DatabaseChanges::new(MESSAGES)
                    .event("INSERT")
                    .eq("booking_id", booking_id),
            )
            .await?;

        let (tx, rx) = mpsc::channel(32);
        let forwarder = tokio::spawn(async move {
            while let Some(change) = subscription.recv().await {
                match change.record_as::<Message>() {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "dropping malformed message change"),
                }
            }
        });
        Ok(MessageFeed::new(rx, Some(forwarder)))
    }
}
