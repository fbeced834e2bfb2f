//! Email-confirmation callback
//!
//! The auth service redirects to `/auth/callback` with the outcome in the
//! URL fragment. [`AuthCallback::handle`] adopts the session, waits for the
//! profile row created by the sign-up trigger, and names the next location.

use crate::config::PollPolicy;
use crate::error::Error;
use crate::models::Identity;
use crate::profile::ProfileLoader;
use crate::routes::paths;
use crate::session::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const NOTICE_DELAY: Duration = Duration::from_secs(3);
const SUCCESS_DELAY: Duration = Duration::from_millis(300);

/// Parameters carried in the callback fragment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl CallbackParams {
    /// Parse `a=b&c=d`, with or without the leading `#`
    pub fn from_fragment(fragment: &str) -> Self {
        let mut params = Self::default();
        let fragment = fragment.strip_prefix('#').unwrap_or(fragment);
        for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
            let value = Some(value.into_owned()).filter(|v| !v.is_empty());
            match key.as_ref() {
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                "access_token" => params.access_token = value,
                "refresh_token" => params.refresh_token = value,
                _ => {}
            }
        }
        params
    }

    /// Parse the fragment of a full callback URL
    pub fn from_url(url: &str) -> crate::error::Result<Self> {
        let url = url::Url::parse(url)?;
        Ok(Self::from_fragment(url.fragment().unwrap_or_default()))
    }

    fn tokens(&self) -> Option<(&str, &str)> {
        Some((self.access_token.as_deref()?, self.refresh_token.as_deref()?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    LinkExpired,
    VerificationFailed,
    SignInFailed,
    SetupIncomplete,
    Verified,
    Failed,
}

impl CallbackStatus {
    pub fn title(&self) -> &'static str {
        match self {
            CallbackStatus::LinkExpired => "Link Expired",
            CallbackStatus::VerificationFailed => "Verification Failed",
            CallbackStatus::SignInFailed => "Sign In Failed",
            CallbackStatus::SetupIncomplete => "Account Setup Incomplete",
            CallbackStatus::Verified => "Email Verified",
            CallbackStatus::Failed => "Error",
        }
    }
}

/// What to show and where to go next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub status: CallbackStatus,
    pub message: String,
    pub redirect: String,
    /// How long the message stays up before redirecting
    pub delay: Duration,
}

impl CallbackOutcome {
    fn notice(status: CallbackStatus, message: &str, redirect: &str) -> Self {
        Self {
            status,
            message: message.to_string(),
            redirect: redirect.to_string(),
            delay: NOTICE_DELAY,
        }
    }

    fn verified() -> Self {
        Self {
            status: CallbackStatus::Verified,
            message: "Email verified successfully! Signing you in...".to_string(),
            redirect: paths::ROOT.to_string(),
            delay: SUCCESS_DELAY,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CallbackStatus::Verified
    }
}

pub struct AuthCallback {
    session: Arc<SessionStore>,
    loader: ProfileLoader,
    poll: PollPolicy,
}

impl AuthCallback {
    pub fn new(session: Arc<SessionStore>, loader: ProfileLoader, poll: PollPolicy) -> Self {
        Self {
            session,
            loader,
            poll,
        }
    }

    pub async fn handle(&self, params: &CallbackParams) -> CallbackOutcome {
        if let Some(code) = &params.error {
            warn!(error = %code, description = ?params.error_description, "auth callback error");
            let expired = params
                .error_description
                .as_deref()
                .map_or(false, |d| d.contains("expired"));
            if code == "access_denied" && expired {
                return CallbackOutcome::notice(
                    CallbackStatus::LinkExpired,
                    "Email link has expired. Please sign up again or request a new confirmation email.",
                    "/signup?error=link_expired",
                );
            }
            let message = params
                .error_description
                .as_deref()
                .unwrap_or("An error occurred during email verification.");
            return CallbackOutcome::notice(
                CallbackStatus::VerificationFailed,
                message,
                "/login?error=verification_failed",
            );
        }

        let identity = match params.tokens() {
            Some((access, refresh)) => match self.session.adopt_session(access, refresh).await {
                Ok(Some(identity)) => identity,
                Ok(None) => {
                    return CallbackOutcome::notice(
                        CallbackStatus::SignInFailed,
                        "Session created but no user found. Please try logging in manually.",
                        "/login?error=no_user",
                    )
                }
                Err(e) => {
                    error!(error = %e, "could not adopt callback session");
                    return CallbackOutcome::notice(
                        CallbackStatus::SignInFailed,
                        "Failed to sign you in. Please try logging in manually.",
                        "/login?error=session_failed",
                    );
                }
            },
            None => match self.session.ready().await.identity {
                Some(identity) => identity,
                None => {
                    return CallbackOutcome::notice(
                        CallbackStatus::VerificationFailed,
                        "No authentication tokens found. Please try signing up again.",
                        "/signup?error=no_tokens",
                    )
                }
            },
        };

        self.finish_setup(&identity).await
    }

    async fn finish_setup(&self, identity: &Identity) -> CallbackOutcome {
        let profile = match self.loader.poll_until_present(&identity.id, self.poll).await {
            Ok(profile) => profile,
            Err(Error::SetupIncomplete { attempts, .. }) => {
                warn!(user_id = %identity.id, attempts, "profile row missing after confirmation");
                return CallbackOutcome::notice(
                    CallbackStatus::SetupIncomplete,
                    "Your account is still being set up. Please try signing in again in a moment.",
                    "/login?error=profile_missing",
                );
            }
            Err(e) => {
                error!(user_id = %identity.id, error = %e, "auth callback failed");
                return CallbackOutcome::notice(
                    CallbackStatus::Failed,
                    "An unexpected error occurred. Please try again.",
                    "/login?error=unexpected",
                );
            }
        };

        let profile = self.loader.normalize(identity, profile).await;
        info!(user_id = %identity.id, role = %profile.role, "email confirmed");
        self.session.load_profile(&identity.id).await;
        CallbackOutcome::verified()
    }
}
