//! Landing gate for the application root
//!
//! The only place a role and verification status map to a destination.
//! Guards send rejected navigations to `/` and this decides from there.

use crate::models::{Role, VerificationStatus};
use crate::routes::paths;
use crate::session::SessionState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Landing {
    Placeholder,
    /// Show the public landing content
    Public,
    Redirect(&'static str),
}

pub struct LandingGate;

impl LandingGate {
    pub fn resolve(state: &SessionState) -> Landing {
        if state.loading {
            return Landing::Placeholder;
        }
        match (&state.identity, &state.profile) {
            (Some(_), Some(profile)) => {
                Landing::Redirect(Self::destination(profile.role, profile.verification_status))
            }
            _ => Landing::Public,
        }
    }

    /// Home view for a role and verification status
    pub fn destination(role: Role, status: Option<VerificationStatus>) -> &'static str {
        match role.effective() {
            Role::Admin => paths::ADMIN_DASHBOARD,
            Role::Tasker if status == Some(VerificationStatus::Approved) => paths::TASKER_DASHBOARD,
            Role::Tasker => paths::TASKER_ONBOARDING,
            _ => paths::DASHBOARD,
        }
    }
}
