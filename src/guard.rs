//! Route guards
//!
//! Each guard looks at the session snapshot and the requested location and
//! returns a [`Decision`]. Guards compose into a [`GuardChain`] where the
//! first non-`Allow` decision wins.
//!
//! Role and verification rejections redirect to the root so the landing
//! gate alone decides where each role and verification status belongs.

use crate::models::{Role, VerificationStatus};
use crate::routes::paths;
use crate::session::SessionState;
use std::fmt;

/// Where to send the user instead of the requested view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub to: String,
    /// Requested location, kept so sign-in can return there
    pub from: Option<String>,
    /// Replace the history entry rather than push a new one
    pub replace: bool,
}

impl Redirect {
    pub fn to(path: &str) -> Self {
        Self {
            to: path.to_string(),
            from: None,
            replace: true,
        }
    }

    pub fn with_from(mut self, location: &str) -> Self {
        self.from = Some(location.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Session still loading: render a placeholder, do not navigate
    Placeholder,
    Redirect(Redirect),
}

impl Decision {
    pub fn redirect(path: &str) -> Self {
        Decision::Redirect(Redirect::to(path))
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

pub trait Guard: Send + Sync + fmt::Debug {
    fn check(&self, state: &SessionState, location: &str) -> Decision;
}

/// What a role-aware guard does for a signed-in user with no profile row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingProfilePolicy {
    /// Render the view. A missing row must not trap the user.
    #[default]
    FailOpen,
    /// Send the user to the root, which shows public content
    Deny,
}

#[derive(Debug, Clone)]
pub struct AuthGuard {
    login_path: String,
}

impl AuthGuard {
    pub fn new() -> Self {
        Self {
            login_path: paths::LOGIN.to_string(),
        }
    }

    /// Admin pages send unauthenticated visitors to the admin sign-in
    pub fn with_login_path(mut self, path: &str) -> Self {
        self.login_path = path.to_string();
        self
    }
}

impl Default for AuthGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Guard for AuthGuard {
    fn check(&self, state: &SessionState, location: &str) -> Decision {
        if state.loading {
            return Decision::Placeholder;
        }
        match state.identity {
            Some(_) => Decision::Allow,
            None => Decision::Redirect(Redirect::to(&self.login_path).with_from(location)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoleGuard {
    allowed: Vec<Role>,
    require_verification: bool,
    missing_profile: MissingProfilePolicy,
}

impl RoleGuard {
    pub fn new(allowed: &[Role]) -> Self {
        Self {
            allowed: allowed.to_vec(),
            require_verification: false,
            missing_profile: MissingProfilePolicy::default(),
        }
    }

    /// Taskers must also be approved
    pub fn require_verification(mut self) -> Self {
        self.require_verification = true;
        self
    }

    pub fn with_missing_profile(mut self, policy: MissingProfilePolicy) -> Self {
        self.missing_profile = policy;
        self
    }
}

impl Guard for RoleGuard {
    fn check(&self, state: &SessionState, _location: &str) -> Decision {
        if state.loading {
            return Decision::Placeholder;
        }
        if state.identity.is_none() {
            return Decision::redirect(paths::ROOT);
        }
        let Some(profile) = &state.profile else {
            return missing_profile(self.missing_profile);
        };

        let role = profile.role.effective();
        if !self.allowed.contains(&role) {
            return Decision::redirect(paths::ROOT);
        }
        if self.require_verification {
            return verification_check(role, profile.verification_status);
        }
        Decision::Allow
    }
}

/// Standalone tasker-verification precondition
#[derive(Debug, Clone, Default)]
pub struct VerificationGuard {
    missing_profile: MissingProfilePolicy,
}

impl VerificationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_missing_profile(mut self, policy: MissingProfilePolicy) -> Self {
        self.missing_profile = policy;
        self
    }
}

impl Guard for VerificationGuard {
    fn check(&self, state: &SessionState, _location: &str) -> Decision {
        if state.loading {
            return Decision::Placeholder;
        }
        if state.identity.is_none() {
            return Decision::redirect(paths::ROOT);
        }
        match &state.profile {
            Some(profile) => verification_check(profile.role.effective(), profile.verification_status),
            None => missing_profile(self.missing_profile),
        }
    }
}

fn verification_check(role: Role, status: Option<VerificationStatus>) -> Decision {
    if role == Role::Tasker && status != Some(VerificationStatus::Approved) {
        Decision::redirect(paths::TASKER_ONBOARDING)
    } else {
        Decision::Allow
    }
}

fn missing_profile(policy: MissingProfilePolicy) -> Decision {
    match policy {
        MissingProfilePolicy::FailOpen => Decision::Allow,
        MissingProfilePolicy::Deny => Decision::redirect(paths::ROOT),
    }
}

/// Ordered guards; the first decision other than `Allow` is returned
#[derive(Debug, Default)]
pub struct GuardChain {
    guards: Vec<Box<dyn Guard>>,
}

impl GuardChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<G: Guard + 'static>(mut self, guard: G) -> Self {
        self.guards.push(Box::new(guard));
        self
    }

    /// Sign-in required, any role
    pub fn authenticated() -> Self {
        Self::new().with(AuthGuard::new())
    }

    /// Sign-in required and one of `roles`
    pub fn roles(roles: &[Role]) -> Self {
        Self::authenticated().with(RoleGuard::new(roles))
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    pub fn check(&self, state: &SessionState, location: &str) -> Decision {
        for guard in &self.guards {
            match guard.check(state, location) {
                Decision::Allow => continue,
                other => return other,
            }
        }
        Decision::Allow
    }
}
