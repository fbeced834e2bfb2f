#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use skillbee::backend::{
    AuthBackend, AuthEvent, AuthEventKind, BookingStore, MessageFeed, MessageStore, ObjectStore,
    ProfileStore, SignUpResult, SupportStore, VerificationStore, WalletStore,
};
use skillbee::config::{AppConfig, PollPolicy};
use skillbee::error::{Error, Result};
use skillbee::models::{
    Booking, BookingStatus, Identity, Message, NewBooking, NewMessage, NewProfile,
    NewSupportTicket, NewTransaction, Profile, ProfilePatch, Rating, ReviewUpdate, Role,
    Transaction, VerificationStatus, VerificationSubmission, Wallet,
};
use skillbee_auth::AuthError;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> AppConfig {
    AppConfig::new("http://localhost:54321", "anon-key").with_profile_poll(PollPolicy {
        attempts: 5,
        delay: Duration::from_millis(300),
    })
}

#[derive(Default)]
pub struct FakeState {
    pub session: Option<Identity>,
    /// email -> (password, identity)
    pub accounts: HashMap<String, (String, Identity)>,
    pub profiles: HashMap<String, Profile>,
    pub submissions: HashMap<String, VerificationSubmission>,
    /// (bucket, key) -> (content type, data)
    pub objects: HashMap<(String, String), (String, Bytes)>,
    /// user id -> wallet
    pub wallets: HashMap<String, Wallet>,
    /// Newest last
    pub transactions: Vec<Transaction>,
    pub ratings: Vec<Rating>,
    pub tickets: Vec<NewSupportTicket>,
    pub bookings: Vec<Booking>,
    pub messages: Vec<Message>,
    /// Profile fetches to answer with "no row" before the row shows up
    pub hidden_profile_fetches: HashMap<String, u32>,
    pub profile_delays: HashMap<String, Duration>,
    pub session_delay: Option<Duration>,
    pub feeds: HashMap<String, Vec<mpsc::Sender<Message>>>,
    /// Uploads whose key contains one of these fail
    pub rejected_keys: Vec<String>,
    pub calls: Vec<String>,
}

/// In-memory backend with failure injection
pub struct FakeBackend {
    state: Mutex<FakeState>,
    failing: Mutex<HashSet<&'static str>>,
    events: broadcast::Sender<AuthEvent>,
    next_id: AtomicU64,
    /// Sign-up needs email confirmation before a session exists
    pub confirm_email: AtomicBool,
    /// Sign-up creates the profile row the way the database trigger does
    pub trigger_creates_profile: AtomicBool,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            state: Mutex::new(FakeState::default()),
            failing: Mutex::new(HashSet::new()),
            events,
            next_id: AtomicU64::new(1),
            confirm_email: AtomicBool::new(false),
            trigger_creates_profile: AtomicBool::new(true),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn heal(&self, op: &'static str) {
        self.failing.lock().unwrap().remove(op);
    }

    fn check(&self, op: &'static str) -> Result<()> {
        self.state().calls.push(op.to_string());
        if self.failing.lock().unwrap().contains(op) {
            return Err(Error::Timeout(format!("{} failed", op)));
        }
        Ok(())
    }

    pub fn calls(&self, op: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == op).count()
    }

    pub fn emit(&self, kind: AuthEventKind, identity: Option<Identity>) {
        let _ = self.events.send(AuthEvent { kind, identity });
    }

    /// Register an account and its profile row
    pub fn add_user(&self, email: &str, role: Role, status: Option<VerificationStatus>) -> Identity {
        let id = email.split('@').next().unwrap_or(email).to_string();
        let identity = Identity::new(&id, Some(email))
            .with_metadata(serde_json::json!({ "role": role.as_str() }));
        let mut profile = Profile::new(&id, role).with_verification(status);
        profile.email = Some(email.to_string());
        profile.full_name = Some(format!("{} Example", id));
        let mut state = self.state();
        state
            .accounts
            .insert(email.to_string(), ("pw".to_string(), identity.clone()));
        state.profiles.insert(id, profile);
        identity
    }

    /// Register an account with no profile row
    pub fn add_account(&self, email: &str, metadata: Value) -> Identity {
        let id = email.split('@').next().unwrap_or(email).to_string();
        let identity = Identity::new(&id, Some(email)).with_metadata(metadata);
        self.state()
            .accounts
            .insert(email.to_string(), ("pw".to_string(), identity.clone()));
        identity
    }

    pub fn set_session(&self, identity: Option<Identity>) {
        self.state().session = identity;
    }

    pub fn profile(&self, id: &str) -> Option<Profile> {
        self.state().profiles.get(id).cloned()
    }

    pub fn submission(&self, id: &str) -> Option<VerificationSubmission> {
        self.state().submissions.get(id).cloned()
    }

    pub fn delay_profile(&self, id: &str, delay: Duration) {
        self.state().profile_delays.insert(id.to_string(), delay);
    }

    pub fn hide_profile_for(&self, id: &str, fetches: u32) {
        self.state()
            .hidden_profile_fetches
            .insert(id.to_string(), fetches);
    }

    pub fn reject_uploads(&self, pattern: &str) {
        self.state().rejected_keys.push(pattern.to_string());
    }

    pub fn add_booking(&self, booking: Booking) {
        self.state().bookings.push(booking);
    }

    pub fn object_keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Deliver a message as the change feed would
    pub fn push_message(&self, message: Message) {
        let senders = self
            .state()
            .feeds
            .get(&message.booking_id)
            .cloned()
            .unwrap_or_default();
        for tx in senders {
            let _ = tx.try_send(message.clone());
        }
        self.state().messages.push(message);
    }

    pub fn add_wallet(&self, user_id: &str, balance: f64) {
        self.state().wallets.insert(
            user_id.to_string(),
            Wallet {
                wallet_id: Some(format!("wallet-{}", user_id)),
                user_id: user_id.to_string(),
                balance,
                created_at: None,
            },
        );
    }

    pub fn add_rating(&self, tasker_id: &str, task_id: &str, score: f64) {
        self.state().ratings.push(Rating {
            id: None,
            task_id: Some(task_id.to_string()),
            tasker_id: tasker_id.to_string(),
            score: Some(score),
            comment: None,
            created_at: None,
        });
    }

    pub fn balance(&self, user_id: &str) -> Option<f64> {
        self.state().wallets.get(user_id).map(|w| w.balance)
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

pub fn booking(id: &str, client_id: &str, tasker_id: Option<&str>, status: BookingStatus) -> Booking {
    Booking {
        id: id.to_string(),
        client_id: client_id.to_string(),
        tasker_id: tasker_id.map(str::to_string),
        service_type: None,
        status,
        budget: None,
        location: None,
        notes: None,
        latitude: None,
        longitude: None,
        created_at: None,
    }
}

#[async_trait]
impl AuthBackend for FakeBackend {
    async fn current_session(&self) -> Result<Option<Identity>> {
        self.check("current_session")?;
        let delay = self.state().session_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.state().session.clone())
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> Result<SignUpResult> {
        self.check("sign_up")?;
        if self.state().accounts.contains_key(email) {
            return Err(Error::Auth(AuthError::ApiError {
                status: reqwest::StatusCode::UNPROCESSABLE_ENTITY,
                message: "User already registered".into(),
            }));
        }
        let id = self.next_id("user");
        let identity = Identity::new(&id, Some(email)).with_metadata(metadata);
        let session_active = !self.confirm_email.load(Ordering::SeqCst);
        {
            let mut state = self.state();
            state
                .accounts
                .insert(email.to_string(), (password.to_string(), identity.clone()));
            if self.trigger_creates_profile.load(Ordering::SeqCst) {
                let mut row = Profile::new(&id, Role::Client);
                row.email = Some(email.to_string());
                state.profiles.insert(id.clone(), row);
            }
            if session_active {
                state.session = Some(identity.clone());
            }
        }
        if session_active {
            self.emit(AuthEventKind::SignedIn, Some(identity.clone()));
        }
        Ok(SignUpResult {
            identity,
            session_active,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        self.check("sign_in")?;
        let account = self.state().accounts.get(email).cloned();
        match account {
            Some((pw, identity)) if pw == password => {
                self.state().session = Some(identity.clone());
                self.emit(AuthEventKind::SignedIn, Some(identity.clone()));
                Ok(identity)
            }
            _ => Err(Error::Auth(AuthError::ApiError {
                status: reqwest::StatusCode::BAD_REQUEST,
                message: "Invalid login credentials".into(),
            })),
        }
    }

    async fn sign_out(&self) -> Result<()> {
        self.state().session = None;
        self.emit(AuthEventKind::SignedOut, None);
        self.check("sign_out")
    }

    async fn set_session(&self, access_token: &str, _refresh_token: &str) -> Result<Option<Identity>> {
        self.check("set_session")?;
        // Tokens in tests are "token-for:<email>"
        let email = access_token.strip_prefix("token-for:").unwrap_or_default();
        let identity = self.state().accounts.get(email).map(|(_, i)| i.clone());
        if let Some(identity) = &identity {
            self.state().session = Some(identity.clone());
            self.emit(AuthEventKind::SignedIn, Some(identity.clone()));
        }
        Ok(identity)
    }
}

#[async_trait]
impl ProfileStore for FakeBackend {
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        self.check("fetch_profile")?;
        let delay = self.state().profile_delays.get(user_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        if let Some(hidden) = state.hidden_profile_fetches.get_mut(user_id) {
            if *hidden > 0 {
                *hidden -= 1;
                return Ok(None);
            }
        }
        Ok(state.profiles.get(user_id).cloned())
    }

    async fn fetch_profiles(&self, user_ids: &[String]) -> Result<Vec<Profile>> {
        self.check("fetch_profiles")?;
        let state = self.state();
        Ok(user_ids
            .iter()
            .filter_map(|id| state.profiles.get(id).cloned())
            .collect())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<()> {
        self.check("insert_profile")?;
        let mut row = Profile::new(&profile.id, profile.role);
        row.email = Some(profile.email.clone());
        row.full_name = profile.details.full_name.clone();
        row.phone = profile.details.phone.clone();
        row.address = profile.details.address.clone();
        self.state().profiles.insert(profile.id.clone(), row);
        Ok(())
    }

    async fn update_profile(&self, user_id: &str, patch: &ProfilePatch) -> Result<Option<Profile>> {
        self.check("update_profile")?;
        let mut state = self.state();
        Ok(state.profiles.get_mut(user_id).map(|p| {
            patch.apply_to(p);
            p.clone()
        }))
    }

    async fn set_role(&self, user_id: &str, role: Role) -> Result<()> {
        self.check("set_role")?;
        if let Some(p) = self.state().profiles.get_mut(user_id) {
            p.role = role;
        }
        Ok(())
    }

    async fn set_verification_status(
        &self,
        user_id: &str,
        status: Option<VerificationStatus>,
    ) -> Result<()> {
        self.check("set_verification_status")?;
        if let Some(p) = self.state().profiles.get_mut(user_id) {
            p.verification_status = status;
        }
        Ok(())
    }

    async fn create_wallet(&self, user_id: &str) -> Result<()> {
        self.check("create_wallet")?;
        self.add_wallet(user_id, 0.0);
        Ok(())
    }
}

#[async_trait]
impl VerificationStore for FakeBackend {
    async fn fetch_submission(&self, user_id: &str) -> Result<Option<VerificationSubmission>> {
        self.check("fetch_submission")?;
        Ok(self.state().submissions.get(user_id).cloned())
    }

    async fn upsert_submission(
        &self,
        submission: &VerificationSubmission,
    ) -> Result<VerificationSubmission> {
        self.check("upsert_submission")?;
        let mut stored = submission.clone();
        if stored.created_at.is_none() {
            stored.created_at = Some(chrono::Utc::now());
        }
        self.state()
            .submissions
            .insert(stored.user_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn list_submissions(
        &self,
        status: Option<VerificationStatus>,
    ) -> Result<Vec<VerificationSubmission>> {
        self.check("list_submissions")?;
        let mut rows: Vec<VerificationSubmission> = self
            .state()
            .submissions
            .values()
            .filter(|s| status.map_or(true, |st| s.status == st))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn count_submissions(&self, status: VerificationStatus) -> Result<u64> {
        self.check("count_submissions")?;
        Ok(self
            .state()
            .submissions
            .values()
            .filter(|s| s.status == status)
            .count() as u64)
    }

    async fn record_review(&self, user_id: &str, review: &ReviewUpdate) -> Result<()> {
        self.check("record_review")?;
        if let Some(s) = self.state().submissions.get_mut(user_id) {
            s.status = review.status;
            s.rejection_reason = review.rejection_reason.clone();
            s.reviewed_by = Some(review.reviewed_by.clone());
            s.reviewed_at = Some(review.reviewed_at);
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FakeBackend {
    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
        upsert: bool,
    ) -> Result<String> {
        self.check("upload_object")?;
        let slot = (bucket.to_string(), key.to_string());
        let mut state = self.state();
        if state.rejected_keys.iter().any(|k| key.contains(k.as_str())) {
            return Err(Error::general("upload rejected"));
        }
        if !upsert && state.objects.contains_key(&slot) {
            return Err(Error::general("The resource already exists"));
        }
        state.objects.insert(slot, (content_type.to_string(), data));
        Ok(key.to_string())
    }

    async fn signed_url(&self, bucket: &str, key: &str, expires_in: u64) -> Result<String> {
        self.check("signed_url")?;
        if !self
            .state()
            .objects
            .contains_key(&(bucket.to_string(), key.to_string()))
        {
            return Err(Error::not_found(key));
        }
        Ok(format!(
            "http://localhost:54321/storage/v1/object/sign/{}/{}?token=t&expires_in={}",
            bucket, key, expires_in
        ))
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "http://localhost:54321/storage/v1/object/public/{}/{}",
            bucket, key
        )
    }
}

#[async_trait]
impl BookingStore for FakeBackend {
    async fn fetch_booking(&self, booking_id: &str) -> Result<Option<Booking>> {
        self.check("fetch_booking")?;
        Ok(self
            .state()
            .bookings
            .iter()
            .find(|b| b.id == booking_id)
            .cloned())
    }

    async fn offered_bookings(&self, tasker_id: &str) -> Result<Vec<Booking>> {
        self.check("offered_bookings")?;
        Ok(self
            .state()
            .bookings
            .iter()
            .filter(|b| b.tasker_id.as_deref() == Some(tasker_id))
            .filter(|b| b.status == BookingStatus::Pending)
            .cloned()
            .collect())
    }

    async fn open_bookings(&self) -> Result<Vec<Booking>> {
        self.check("open_bookings")?;
        Ok(self
            .state()
            .bookings
            .iter()
            .filter(|b| b.tasker_id.is_none() && b.status == BookingStatus::Pending)
            .cloned()
            .collect())
    }

    async fn participant_bookings(&self, user_id: &str) -> Result<Vec<Booking>> {
        self.check("participant_bookings")?;
        Ok(self
            .state()
            .bookings
            .iter()
            .filter(|b| b.tasker_id.is_some())
            .filter(|b| b.client_id == user_id || b.tasker_id.as_deref() == Some(user_id))
            .cloned()
            .collect())
    }

    async fn assign_booking(&self, booking_id: &str, tasker_id: &str) -> Result<Option<Booking>> {
        self.check("assign_booking")?;
        let mut state = self.state();
        Ok(state
            .bookings
            .iter_mut()
            .find(|b| b.id == booking_id)
            .map(|b| {
                b.tasker_id = Some(tasker_id.to_string());
                b.status = BookingStatus::Assigned;
                b.clone()
            }))
    }

    async fn release_booking(&self, booking_id: &str, tasker_id: &str) -> Result<Option<Booking>> {
        self.check("release_booking")?;
        let mut state = self.state();
        Ok(state
            .bookings
            .iter_mut()
            .find(|b| b.id == booking_id && b.tasker_id.as_deref() == Some(tasker_id))
            .map(|b| {
                b.tasker_id = None;
                b.clone()
            }))
    }

    async fn create_booking(&self, booking: &NewBooking) -> Result<Booking> {
        self.check("create_booking")?;
        let stored = Booking {
            id: self.next_id("booking"),
            client_id: booking.client_id.clone(),
            tasker_id: booking.tasker_id.clone(),
            service_type: Some(booking.service_type.clone()),
            status: booking.status.clone(),
            budget: Some(booking.budget),
            location: Some(booking.location.clone()),
            notes: booking.notes.clone(),
            latitude: booking.latitude,
            longitude: booking.longitude,
            created_at: Some(chrono::Utc::now()),
        };
        self.state().bookings.push(stored.clone());
        Ok(stored)
    }

    async fn client_bookings(
        &self,
        client_id: &str,
        status: Option<&BookingStatus>,
    ) -> Result<Vec<Booking>> {
        self.check("client_bookings")?;
        Ok(self
            .state()
            .bookings
            .iter()
            .rev()
            .filter(|b| b.client_id == client_id)
            .filter(|b| status.map_or(true, |s| &b.status == s))
            .cloned()
            .collect())
    }

    async fn tasker_bookings(&self, tasker_id: &str) -> Result<Vec<Booking>> {
        self.check("tasker_bookings")?;
        Ok(self
            .state()
            .bookings
            .iter()
            .rev()
            .filter(|b| b.tasker_id.as_deref() == Some(tasker_id))
            .cloned()
            .collect())
    }

    async fn tasker_ratings(&self, tasker_id: &str) -> Result<Vec<Rating>> {
        self.check("tasker_ratings")?;
        Ok(self
            .state()
            .ratings
            .iter()
            .rev()
            .filter(|r| r.tasker_id == tasker_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WalletStore for FakeBackend {
    async fn fetch_wallet(&self, user_id: &str) -> Result<Option<Wallet>> {
        self.check("fetch_wallet")?;
        Ok(self.state().wallets.get(user_id).cloned())
    }

    async fn list_transactions(&self, user_id: &str, limit: u32) -> Result<Vec<Transaction>> {
        self.check("list_transactions")?;
        Ok(self
            .state()
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id.as_deref() == Some(user_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn insert_transaction(&self, transaction: &NewTransaction) -> Result<Transaction> {
        self.check("insert_transaction")?;
        let stored = Transaction {
            id: Some(self.next_id("tx")),
            user_id: Some(transaction.user_id.clone()),
            wallet_id: None,
            amount: transaction.amount,
            kind: Some(transaction.kind.clone()),
            description: Some(transaction.description.clone()),
            created_at: Some(chrono::Utc::now()),
        };
        self.state().transactions.push(stored.clone());
        Ok(stored)
    }

    async fn set_balance(&self, user_id: &str, balance: f64) -> Result<()> {
        self.check("set_balance")?;
        match self.state().wallets.get_mut(user_id) {
            Some(wallet) => {
                wallet.balance = balance;
                Ok(())
            }
            None => Err(Error::not_found(format!("wallet for {}", user_id))),
        }
    }
}

#[async_trait]
impl SupportStore for FakeBackend {
    async fn insert_ticket(&self, ticket: &NewSupportTicket) -> Result<()> {
        self.check("insert_ticket")?;
        self.state().tickets.push(ticket.clone());
        Ok(())
    }
}

#[async_trait]
impl MessageStore for FakeBackend {
    async fn list_messages(&self, booking_id: &str) -> Result<Vec<Message>> {
        self.check("list_messages")?;
        Ok(self
            .state()
            .messages
            .iter()
            .filter(|m| m.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn latest_message(&self, booking_id: &str) -> Result<Option<Message>> {
        self.check("latest_message")?;
        Ok(self
            .state()
            .messages
            .iter()
            .filter(|m| m.booking_id == booking_id)
            .last()
            .cloned())
    }

    async fn unread_count(&self, booking_id: &str, receiver_id: &str) -> Result<u64> {
        self.check("unread_count")?;
        Ok(self
            .state()
            .messages
            .iter()
            .filter(|m| m.booking_id == booking_id && m.receiver_id == receiver_id && !m.read)
            .count() as u64)
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        self.check("insert_message")?;
        let stored = Message {
            id: self.next_id("msg"),
            booking_id: message.booking_id.clone(),
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            content: message.content.clone(),
            read: message.read,
            created_at: Some(chrono::Utc::now()),
        };
        self.push_message(stored.clone());
        Ok(stored)
    }

    async fn mark_read(&self, booking_id: &str, receiver_id: &str) -> Result<()> {
        self.check("mark_read")?;
        for m in self.state().messages.iter_mut() {
            if m.booking_id == booking_id && m.receiver_id == receiver_id {
                m.read = true;
            }
        }
        Ok(())
    }

    async fn subscribe_messages(&self, booking_id: &str) -> Result<MessageFeed> {
        self.check("subscribe_messages")?;
        let (tx, rx) = mpsc::channel(16);
        self.state()
            .feeds
            .entry(booking_id.to_string())
            .or_default()
            .push(tx);
        Ok(MessageFeed::new(rx, None))
    }
}
