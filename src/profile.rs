//! Profile loading
//!
//! Turns an identity into its `users` row. A failed lookup is `None`, never
//! an error, so guards can apply their own missing-profile policy. The
//! email-confirmation path polls instead, because the row is created by a
//! trigger that may not have run yet.

use crate::backend::Backend;
use crate::config::PollPolicy;
use crate::error::{Error, Result};
use crate::models::{Identity, Profile, Role};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ProfileLoader {
    backend: Arc<dyn Backend>,
}

impl ProfileLoader {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Fetch the profile, treating every failure as absent
    pub async fn load(&self, user_id: &str) -> Option<Profile> {
        if user_id.trim().is_empty() {
            return None;
        }
        match self.backend.fetch_profile(user_id).await {
            Ok(Some(profile)) => Some(profile),
            Ok(None) => {
                debug!(user_id, "no profile row");
                None
            }
            Err(e) => {
                warn!(user_id, error = %e, "profile load failed");
                None
            }
        }
    }

    /// Poll until the row exists or the budget runs out. Only an absent
    /// row is retried; a failed lookup is returned as is.
    pub async fn poll_until_present(&self, user_id: &str, policy: PollPolicy) -> Result<Profile> {
        let attempts = policy.attempts.max(1);
        for attempt in 1..=attempts {
            match self.backend.fetch_profile(user_id).await {
                Ok(Some(profile)) => return Ok(profile),
                Ok(None) => debug!(user_id, attempt, "profile not created yet"),
                Err(e) => {
                    warn!(user_id, attempt, error = %e, "profile poll failed");
                    return Err(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(policy.delay).await;
            }
        }
        Err(Error::SetupIncomplete {
            user_id: user_id.to_string(),
            attempts,
        })
    }

    /// The sign-up trigger creates every row as a client. Promote it to
    /// tasker when that is what the account signed up as. Verification
    /// status is left alone; only the verification workflow moves it.
    pub async fn normalize(&self, identity: &Identity, profile: Profile) -> Profile {
        if identity.metadata_role() != Role::Tasker || profile.role == Role::Tasker {
            return profile;
        }
        // An admin row is never demoted by stale metadata.
        if profile.role == Role::Admin {
            return profile;
        }
        match self.backend.set_role(&profile.id, Role::Tasker).await {
            Ok(()) => {
                debug!(user_id = %profile.id, "promoted profile to tasker");
                Profile {
                    role: Role::Tasker,
                    ..profile
                }
            }
            Err(e) => {
                warn!(user_id = %profile.id, error = %e, "could not set tasker role");
                profile
            }
        }
    }
}
