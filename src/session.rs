//! Session store
//!
//! Single source of truth for who is signed in and their profile. State is
//! published on a `watch` channel; readers must treat identity and profile
//! as undefined while `loading` is set.
//!
//! Profile loads complete in any order. A result is applied only while its
//! identity is still the current one, so a slow load for a signed-out user
//! can never overwrite the profile of whoever signed in after them.

use crate::backend::{Backend, SignUpResult};
use crate::config::AppConfig;
use crate::error::Result;
use crate::models::{Identity, NewProfile, Profile, ProfileDetails, Role};
use crate::profile::ProfileLoader;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Snapshot of the session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub loading: bool,
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
}

impl SessionState {
    pub fn loading() -> Self {
        Self {
            loading: true,
            identity: None,
            profile: None,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            loading: false,
            identity: None,
            profile: None,
        }
    }

    pub fn signed_in(identity: Identity, profile: Option<Profile>) -> Self {
        Self {
            loading: false,
            identity: Some(identity),
            profile,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.loading && self.identity.is_some()
    }

    pub fn role(&self) -> Option<Role> {
        self.profile.as_ref().map(|p| p.role)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::loading()
    }
}

pub struct SessionStore {
    backend: Arc<dyn Backend>,
    loader: ProfileLoader,
    state: watch::Sender<SessionState>,
    init_timeout: Duration,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn Backend>, config: &AppConfig) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::loading());
        Arc::new(Self {
            loader: ProfileLoader::new(backend.clone()),
            backend,
            state,
            init_timeout: config.session_init_timeout,
            listener: Mutex::new(None),
        })
    }

    /// Start listening for auth changes and resolve the initial session.
    ///
    /// Never fails: backend errors resolve as "no session", and the load
    /// is abandoned after the configured timeout so `loading` always clears.
    pub async fn init(self: &Arc<Self>) {
        self.start_listener();

        let resolved = tokio::time::timeout(self.init_timeout, async {
            match self.backend.current_session().await {
                Ok(identity) => self.resolve(identity).await,
                Err(e) => {
                    warn!(error = %e, "could not read the current session");
                    self.resolve(None).await;
                }
            }
        })
        .await;

        if resolved.is_err() {
            warn!(timeout = ?self.init_timeout, "session init timed out");
            self.state.send_if_modified(|s| std::mem::replace(&mut s.loading, false));
        }
    }

    fn start_listener(self: &Arc<Self>) {
        let mut events = self.backend.auth_events();
        let store: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "auth events lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(store) = store.upgrade() else { break };
                debug!(kind = ?event.kind, "auth state change");
                store.resolve(event.identity).await;
            }
        });

        let previous = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Apply a new identity (or its absence) and load its profile.
    async fn resolve(&self, identity: Option<Identity>) {
        let Some(identity) = identity else {
            self.state.send_replace(SessionState::signed_out());
            return;
        };
        let user_id = identity.id.clone();
        self.state.send_modify(|s| {
            let same_user = s.identity.as_ref().map_or(false, |c| c.id == user_id);
            if !same_user {
                s.profile = None;
            }
            s.identity = Some(identity);
        });
        self.load_profile(&user_id).await;
    }

    /// Load `user_id`'s profile and apply it if that user is still current.
    pub async fn load_profile(&self, user_id: &str) -> Option<Profile> {
        let profile = self.loader.load(user_id).await;
        let applied = self.state.send_if_modified(|s| match &s.identity {
            Some(current) if current.id == user_id => {
                s.profile = profile.clone();
                s.loading = false;
                true
            }
            _ => false,
        });
        if !applied {
            debug!(user_id, "discarding profile for a user no longer signed in");
        }
        profile
    }

    /// Reload the current user's profile
    pub async fn refresh(&self) -> Option<Profile> {
        let user_id = self.identity()?.id;
        self.load_profile(&user_id).await
    }

    /// Create an account. The role and details travel as user metadata; the
    /// profile row and an empty wallet are created if the backend trigger
    /// did not already do so.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        role: Role,
        details: ProfileDetails,
    ) -> Result<SignUpResult> {
        let mut metadata = serde_json::to_value(&details)?;
        metadata["role"] = json!(role);

        let result = self.backend.sign_up(email, password, metadata).await?;
        let user_id = result.identity.id.clone();
        info!(user_id = %user_id, role = %role, "signed up");

        match self.backend.fetch_profile(&user_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                let row = NewProfile {
                    id: user_id.clone(),
                    email: email.to_string(),
                    role,
                    details,
                };
                if let Err(e) = self.backend.insert_profile(&row).await {
                    warn!(user_id = %user_id, error = %e, "could not create profile row");
                }
            }
            Err(e) => warn!(user_id = %user_id, error = %e, "could not check profile row"),
        }
        if let Err(e) = self.backend.create_wallet(&user_id).await {
            warn!(user_id = %user_id, error = %e, "could not create wallet");
        }

        if result.session_active {
            self.resolve(Some(result.identity.clone())).await;
        }
        Ok(result)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let identity = self.backend.sign_in(email, password).await?;
        info!(user_id = %identity.id, "signed in");
        self.resolve(Some(identity.clone())).await;
        Ok(identity)
    }

    /// Sign out. Local state is cleared even if the backend call fails.
    pub async fn sign_out(&self) -> Result<()> {
        let result = self.backend.sign_out().await;
        self.state.send_replace(SessionState::signed_out());
        if let Err(e) = &result {
            warn!(error = %e, "sign out request failed");
        }
        result
    }

    /// Adopt tokens delivered to the auth callback
    pub async fn adopt_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<Option<Identity>> {
        let identity = self
            .backend
            .set_session(access_token, refresh_token)
            .await?;
        if let Some(identity) = &identity {
            self.resolve(Some(identity.clone())).await;
        }
        Ok(identity)
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.state.borrow().profile.clone()
    }

    /// Wait for the first resolution to finish
    pub async fn ready(&self) -> SessionState {
        let mut rx = self.state.subscribe();
        let result = rx.wait_for(|s| !s.loading).await.map(|s| s.clone());
        result.unwrap_or_else(|_| self.snapshot())
    }

    /// Stop following auth changes
    pub fn shutdown(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = listener {
            task.abort();
        }
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}
