//! Route table and navigation
//!
//! [`Router::navigate`] resolves a location against the table and the
//! session snapshot. It never panics: an unknown path is
//! [`Navigation::NotFound`].

use crate::guard::{AuthGuard, Decision, GuardChain, Redirect, RoleGuard, VerificationGuard};
use crate::landing::{Landing, LandingGate};
use crate::models::Role;
use crate::session::SessionState;
use std::collections::HashMap;
use tracing::debug;

pub mod paths {
    pub const ROOT: &str = "/";
    pub const HOME: &str = "/home";
    pub const SIGNUP: &str = "/signup";
    pub const LOGIN: &str = "/login";
    pub const ADMIN_LOGIN: &str = "/admin/login";
    pub const AUTH_CALLBACK: &str = "/auth/callback";
    pub const APP_HOME: &str = "/app-home";
    pub const DASHBOARD: &str = "/dashboard";
    pub const TASKER_DASHBOARD: &str = "/tasker-dashboard";
    pub const TASKER_ONBOARDING: &str = "/tasker-onboarding";
    pub const TASK_REQUESTS: &str = "/task-requests";
    pub const BOOK: &str = "/book";
    pub const TASKS: &str = "/tasks";
    pub const PROFILE: &str = "/profile";
    pub const TASKER_PROFILE: &str = "/tasker-profile";
    pub const WALLET: &str = "/wallet";
    pub const TASKER_WALLET: &str = "/tasker-wallet";
    pub const SUPPORT: &str = "/support";
    pub const MESSAGES: &str = "/messages";
    pub const ADMIN_DASHBOARD: &str = "/admin/dashboard";
    pub const ADMIN_REVIEW: &str = "/admin/review/:userId";
}

#[derive(Debug)]
pub enum Access {
    Public,
    /// The root, resolved by the landing gate
    Landing,
    Guarded(GuardChain),
}

#[derive(Debug)]
pub struct Route {
    pub pattern: String,
    pub access: Access,
}

impl Route {
    /// Captured `:params` when `path` matches
    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let pattern: Vec<&str> = segments(&self.pattern).collect();
        let actual: Vec<&str> = segments(path).collect();
        if pattern.len() != actual.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (p, a) in pattern.iter().zip(actual.iter()) {
            if let Some(name) = p.strip_prefix(':') {
                if a.is_empty() {
                    return None;
                }
                params.insert(name.to_string(), a.to_string());
            } else if p != a {
                return None;
            }
        }
        Some(params)
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Outcome of a navigation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Render {
        route: String,
        params: HashMap<String, String>,
    },
    Placeholder,
    /// Public landing content at the root
    Public,
    Redirect(Redirect),
    NotFound,
}

#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, pattern: &str, access: Access) -> Self {
        self.routes.push(Route {
            pattern: pattern.to_string(),
            access,
        });
        self
    }

    /// The SkillBee route table
    pub fn skillbee() -> Self {
        let client = || Access::Guarded(GuardChain::roles(&[Role::Client]));
        let tasker = || Access::Guarded(GuardChain::roles(&[Role::Tasker]));
        let admin = || {
            Access::Guarded(
                GuardChain::new()
                    .with(AuthGuard::new().with_login_path(paths::ADMIN_LOGIN))
                    .with(RoleGuard::new(&[Role::Admin])),
            )
        };

        let mut router = Self::new().route(paths::ROOT, Access::Landing);
        for path in [
            paths::HOME,
            paths::SIGNUP,
            paths::LOGIN,
            paths::ADMIN_LOGIN,
            paths::AUTH_CALLBACK,
        ] {
            router = router.route(path, Access::Public);
        }
        for path in [paths::APP_HOME, paths::WALLET, paths::SUPPORT, paths::MESSAGES] {
            router = router.route(path, Access::Guarded(GuardChain::authenticated()));
        }
        for path in [paths::DASHBOARD, paths::BOOK, paths::TASKS, paths::PROFILE] {
            router = router.route(path, client());
        }
        for path in [
            paths::TASKER_ONBOARDING,
            paths::TASKER_PROFILE,
            paths::TASKER_WALLET,
        ] {
            router = router.route(path, tasker());
        }
        router
            .route(
                paths::TASKER_DASHBOARD,
                Access::Guarded(
                    GuardChain::authenticated()
                        .with(RoleGuard::new(&[Role::Tasker]).require_verification()),
                ),
            )
            .route(
                paths::TASK_REQUESTS,
                Access::Guarded(GuardChain::roles(&[Role::Tasker]).with(VerificationGuard::new())),
            )
            .route(paths::ADMIN_DASHBOARD, admin())
            .route(paths::ADMIN_REVIEW, admin())
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Resolve `location` (path plus optional query and fragment)
    pub fn navigate(&self, location: &str, state: &SessionState) -> Navigation {
        let path = normalize(location);
        let Some((route, params)) = self
            .routes
            .iter()
            .find_map(|r| r.matches(&path).map(|params| (r, params)))
        else {
            debug!(path = %path, "no route");
            return Navigation::NotFound;
        };

        let render = || Navigation::Render {
            route: route.pattern.clone(),
            params: params.clone(),
        };
        match &route.access {
            Access::Public => render(),
            Access::Landing => match LandingGate::resolve(state) {
                Landing::Placeholder => Navigation::Placeholder,
                Landing::Public => Navigation::Public,
                Landing::Redirect(to) => Navigation::Redirect(Redirect::to(to)),
            },
            Access::Guarded(chain) => match chain.check(state, location) {
                Decision::Allow => render(),
                Decision::Placeholder => Navigation::Placeholder,
                Decision::Redirect(redirect) => {
                    debug!(from = %path, to = %redirect.to, "redirect");
                    Navigation::Redirect(redirect)
                }
            },
        }
    }
}

/// Path without query, fragment or trailing slash
fn normalize(location: &str) -> String {
    let end = location.find(|c| c == '?' || c == '#').unwrap_or(location.len());
    let path = location[..end].trim_end_matches('/');
    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}
