//! GoTrue authentication client
//!
//! Covers the password flows the marketplace uses: sign up with user
//! metadata, sign in, adopting a session handed back by an email
//! confirmation link, token refresh and sign out. Every change to the held
//! session is published on a broadcast channel so long-lived observers can
//! follow sign-in, sign-out and refresh events.

use jsonwebtoken::{DecodingKey, Validation};
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;

/// Error type
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("API error ({status}): {message}")]
    ApiError {
        status: reqwest::StatusCode,
        message: String,
    },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Missing session")]
    MissingSession,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

impl AuthError {
    /// True for 400/401/422 responses, which GoTrue uses for bad credentials
    /// and rejected tokens.
    pub fn is_rejected_credentials(&self) -> bool {
        matches!(
            self,
            AuthError::ApiError { status, .. }
                if status.as_u16() == 400 || status.as_u16() == 401 || status.as_u16() == 422
        )
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

/// A user as returned by GoTrue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub app_metadata: Value,
    #[serde(default)]
    pub user_metadata: Value,
    #[serde(default)]
    pub email_confirmed_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl User {
    /// Read a string entry from the user metadata.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.user_metadata.get(key).and_then(Value::as_str)
    }
}

/// An issued session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// Build a session from raw tokens, reading the expiry from the access
    /// token's `exp` claim when it is a JWT.
    pub fn from_tokens(access_token: &str, refresh_token: &str, user: User) -> Self {
        let now = chrono::Utc::now().timestamp();
        let expires_at = token_expiry(access_token);
        let expires_in = expires_at.map(|at| (at - now).max(0)).unwrap_or(0);

        Self {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_in,
            expires_at,
            token_type: default_token_type(),
            user,
        }
    }

    /// Check if the session has expired
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => chrono::Utc::now().timestamp() >= expires_at,
            None => false,
        }
    }

    fn stamp_expiry(mut self) -> Self {
        if self.expires_at.is_none() && self.expires_in > 0 {
            self.expires_at = Some(chrono::Utc::now().timestamp() + self.expires_in);
        }
        self
    }
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    exp: Option<i64>,
}

/// Extract `exp` from an access token without verifying the signature.
/// The token came from GoTrue itself; verification happens server side.
fn token_expiry(token: &str) -> Option<i64> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    jsonwebtoken::decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .and_then(|data| data.claims.exp)
}

/// Result of a sign-up call.
///
/// GoTrue answers with a full session when email confirmation is disabled,
/// and with a bare user otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    Session(Session),
    ConfirmationRequired(User),
}

impl SignUpOutcome {
    pub fn user(&self) -> &User {
        match self {
            SignUpOutcome::Session(session) => &session.user,
            SignUpOutcome::ConfirmationRequired(user) => user,
        }
    }
}

/// Kind of auth state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChangeEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// A published change to the held session
#[derive(Debug, Clone)]
pub struct AuthStateChange {
    pub event: AuthChangeEvent,
    pub session: Option<Session>,
}

/// Client options
#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub persist_session: bool,
    /// Capacity of the auth-state broadcast channel
    pub event_capacity: usize,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            persist_session: true,
            event_capacity: 32,
        }
    }
}

/// Auth client
pub struct AuthClient {
    url: String,
    key: String,
    http_client: Client,
    options: AuthOptions,
    current_session: Arc<RwLock<Option<Session>>>,
    events: broadcast::Sender<AuthStateChange>,
}

impl AuthClient {
    pub fn new(url: &str, key: &str, http_client: Client, options: AuthOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            http_client,
            options,
            current_session: Arc::new(RwLock::new(None)),
            events,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.url, path)
    }

    /// Subscribe to auth state changes for as long as the receiver lives.
    pub fn on_auth_state_change(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }

    /// The currently held session
    pub fn get_session(&self) -> Option<Session> {
        self.current_session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Access token of the held session, if any
    pub fn access_token(&self) -> Option<String> {
        self.get_session().map(|s| s.access_token)
    }

    fn store(&self, session: Option<Session>, event: AuthChangeEvent) {
        if self.options.persist_session || session.is_none() {
            let mut guard = self
                .current_session
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *guard = session.clone();
        }
        // No receivers is fine; nobody is listening yet.
        if self.events.send(AuthStateChange { event, session }).is_err() {
            debug!("auth state change {:?} had no listeners", event);
        }
    }

    async fn read_error(response: reqwest::Response) -> AuthError {
        let status = response.status();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        AuthError::ApiError { status, message }
    }

    /// Register a new user. `data` becomes the user's metadata.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        data: Option<Value>,
    ) -> Result<SignUpOutcome> {
        let mut payload = serde_json::json!({
            "email": email,
            "password": password,
        });
        if let Some(data) = data {
            payload["data"] = data;
        }

        let response = self
            .http_client
            .post(self.endpoint("/signup"))
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let body: Value = response.json().await?;
        if body.get("access_token").is_some() {
            let session: Session = serde_json::from_value(body)?;
            let session = session.stamp_expiry();
            self.store(Some(session.clone()), AuthChangeEvent::SignedIn);
            Ok(SignUpOutcome::Session(session))
        } else {
            // Some GoTrue versions wrap the user, others return it bare.
            let user_value = body.get("user").cloned().unwrap_or(body);
            let user: User = serde_json::from_value(user_value)?;
            debug!("sign up for {} requires email confirmation", user.id);
            Ok(SignUpOutcome::ConfirmationRequired(user))
        }
    }

    /// Sign in with email and password
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });

        let response = self
            .http_client
            .post(self.endpoint("/token?grant_type=password"))
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let session: Session = response.json::<Session>().await?.stamp_expiry();
        self.store(Some(session.clone()), AuthChangeEvent::SignedIn);
        Ok(session)
    }

    /// Adopt tokens delivered out of band (an email confirmation redirect).
    /// The user is fetched with the access token to validate it.
    pub async fn set_session(&self, access_token: &str, refresh_token: &str) -> Result<Session> {
        if access_token.is_empty() || refresh_token.is_empty() {
            return Err(AuthError::InvalidToken("empty token".to_string()));
        }

        let user = self.get_user_by_token(access_token).await?;
        let session = Session::from_tokens(access_token, refresh_token, user);
        self.store(Some(session.clone()), AuthChangeEvent::SignedIn);
        Ok(session)
    }

    /// Fetch the user behind the held session
    pub async fn get_user(&self) -> Result<User> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;
        self.get_user_by_token(&session.access_token).await
    }

    async fn get_user_by_token(&self, token: &str) -> Result<User> {
        let response = self
            .http_client
            .get(self.endpoint("/user"))
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        Ok(response.json::<User>().await?)
    }

    /// Exchange the refresh token for a new session
    pub async fn refresh_session(&self) -> Result<Session> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let payload = serde_json::json!({
            "refresh_token": session.refresh_token,
        });

        let response = self
            .http_client
            .post(self.endpoint("/token?grant_type=refresh_token"))
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let new_session: Session = response.json::<Session>().await?.stamp_expiry();
        self.store(Some(new_session.clone()), AuthChangeEvent::TokenRefreshed);
        Ok(new_session)
    }

    /// Refresh the held session only when it has expired. An expired
    /// session that cannot be refreshed is dropped, so requests fall back to
    /// the anon key instead of a dead token.
    pub async fn ensure_fresh(&self) -> Result<Option<Session>> {
        match self.get_session() {
            Some(session) if session.is_expired() => match self.refresh_session().await {
                Ok(session) => Ok(Some(session)),
                Err(err) => {
                    warn!("refresh of expired session failed, signing out: {}", err);
                    self.store(None, AuthChangeEvent::SignedOut);
                    Err(err)
                }
            },
            other => Ok(other),
        }
    }

    /// Sign out. The local session is cleared even when the server call
    /// fails, so a dead token never keeps the client signed in.
    pub async fn sign_out(&self) -> Result<()> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let response = self
            .http_client
            .post(self.endpoint("/logout"))
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await;

        self.store(None, AuthChangeEvent::SignedOut);

        let response = response?;
        if !response.status().is_success() {
            let err = Self::read_error(response).await;
            warn!("logout request failed after local sign out: {}", err);
            return Err(err);
        }

        Ok(())
    }

    /// Update the current user's metadata
    pub async fn update_user_metadata(&self, data: Value) -> Result<User> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let response = self
            .http_client
            .put(self.endpoint("/user"))
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .json(&serde_json::json!({ "data": data }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let user: User = response.json().await?;
        let mut updated = session;
        updated.user = user.clone();
        self.store(Some(updated), AuthChangeEvent::UserUpdated);
        Ok(user)
    }
}
