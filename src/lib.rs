//! SkillBee core
//!
//! Session, access gating and tasker verification for the SkillBee
//! local-services marketplace. Authentication, records, files and change
//! feeds live on a hosted Supabase project; this crate decides who is
//! signed in, which views they may reach and how verification moves.
//!
//! ```no_run
//! use skillbee::prelude::*;
//!
//! # async fn run() -> skillbee::error::Result<()> {
//! let app = SkillBee::from_env()?;
//! app.init().await;
//!
//! match app.navigate("/tasker-dashboard") {
//!     Navigation::Render { route, .. } => println!("render {}", route),
//!     Navigation::Redirect(r) => println!("go to {}", r.to),
//!     other => println!("{:?}", other),
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod bookings;
pub mod callback;
pub mod config;
pub mod documents;
pub mod error;
pub mod geo;
pub mod guard;
pub mod landing;
pub mod marketplace;
pub mod messaging;
pub mod models;
pub mod profile;
pub mod review;
pub mod routes;
pub mod session;
pub mod support;
pub mod verification;
pub mod wallet;

use crate::backend::{Backend, SupabaseBackend};
use crate::bookings::{BookingRequest, Bookings};
use crate::callback::{AuthCallback, CallbackOutcome, CallbackParams};
use crate::config::AppConfig;
use crate::documents::{DocumentStore, Upload};
use crate::error::{Error, Result};
use crate::marketplace::Marketplace;
use crate::messaging::Messaging;
use crate::models::{Booking, Identity, Profile, ProfilePatch, Wallet};
use crate::profile::ProfileLoader;
use crate::review::ReviewQueue;
use crate::routes::{Navigation, Router};
use crate::session::SessionStore;
use crate::support::{Support, SupportReceipt};
use crate::verification::{
    ReviewDecision, ReviewReport, SubmissionForm, SubmitReport, VerificationWorkflow,
};
use crate::wallet::Wallets;
use std::sync::Arc;
use tracing::debug;

/// Application-scoped context: one per running app
pub struct SkillBee {
    config: AppConfig,
    backend: Arc<dyn Backend>,
    session: Arc<SessionStore>,
    loader: ProfileLoader,
    router: Router,
    documents: DocumentStore,
    verification: VerificationWorkflow,
    review: ReviewQueue,
    marketplace: Marketplace,
    messaging: Messaging,
    bookings: Bookings,
    wallets: Wallets,
    support: Support,
}

impl SkillBee {
    /// Connect to the Supabase project named in `config`
    pub fn new(config: AppConfig) -> Result<Self> {
        let backend = SupabaseBackend::new(&config)?;
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    /// Configuration from the environment, see [`AppConfig::from_env`]
    pub fn from_env() -> Result<Self> {
        Self::new(AppConfig::from_env()?)
    }

    pub fn with_backend(config: AppConfig, backend: Arc<dyn Backend>) -> Self {
        let documents = DocumentStore::new(backend.clone(), &config);
        Self {
            session: SessionStore::new(backend.clone(), &config),
            loader: ProfileLoader::new(backend.clone()),
            router: Router::skillbee(),
            verification: VerificationWorkflow::new(backend.clone(), documents.clone()),
            review: ReviewQueue::new(backend.clone(), documents.clone()),
            marketplace: Marketplace::new(backend.clone(), config.nearby_radius_km),
            messaging: Messaging::new(backend.clone()),
            bookings: Bookings::new(backend.clone()),
            wallets: Wallets::new(backend.clone()),
            support: Support::new(backend.clone()),
            documents,
            backend,
            config,
        }
    }

    /// Resolve the initial session and start following auth changes
    pub async fn init(&self) {
        self.session.init().await;
        debug!(signed_in = self.session.identity().is_some(), "session ready");
    }

    pub fn shutdown(&self) {
        self.session.shutdown();
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub fn verification(&self) -> &VerificationWorkflow {
        &self.verification
    }

    pub fn review_queue(&self) -> &ReviewQueue {
        &self.review
    }

    pub fn marketplace(&self) -> &Marketplace {
        &self.marketplace
    }

    pub fn messaging(&self) -> &Messaging {
        &self.messaging
    }

    pub fn bookings(&self) -> &Bookings {
        &self.bookings
    }

    pub fn wallets(&self) -> &Wallets {
        &self.wallets
    }

    pub fn support(&self) -> &Support {
        &self.support
    }

    /// Resolve a location against the current session
    pub fn navigate(&self, location: &str) -> Navigation {
        self.router.navigate(location, &self.session.snapshot())
    }

    pub fn auth_callback(&self) -> AuthCallback {
        AuthCallback::new(self.session.clone(), self.loader.clone(), self.config.profile_poll)
    }

    /// Handle the `/auth/callback` fragment
    pub async fn handle_callback(&self, fragment: &str) -> CallbackOutcome {
        self.auth_callback()
            .handle(&CallbackParams::from_fragment(fragment))
            .await
    }

    fn require_identity(&self) -> Result<Identity> {
        self.session.identity().ok_or(Error::NotAuthenticated)
    }

    fn require_profile(&self) -> Result<Profile> {
        let identity = self.require_identity()?;
        self.session
            .profile()
            .ok_or_else(|| Error::not_found(format!("profile for {}", identity.id)))
    }

    /// Submit the signed-in tasker's verification and refresh the session
    pub async fn submit_verification(&self, form: SubmissionForm) -> Result<SubmitReport> {
        let identity = self.require_identity()?;
        let report = self.verification.submit(&identity.id, form).await?;
        self.session.refresh().await;
        Ok(report)
    }

    /// Review as the signed-in admin
    pub async fn review_verification(
        &self,
        user_id: &str,
        decision: ReviewDecision,
    ) -> Result<ReviewReport> {
        let reviewer = self.require_profile()?;
        self.verification.review(&reviewer, user_id, decision).await
    }

    /// Edit the signed-in user's own profile
    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<Profile> {
        let identity = self.require_identity()?;
        if patch.is_empty() {
            return self.require_profile();
        }
        let updated = self
            .backend
            .update_profile(&identity.id, &patch)
            .await?
            .ok_or_else(|| Error::not_found(format!("profile for {}", identity.id)))?;
        self.session.refresh().await;
        Ok(updated)
    }

    /// Book a task as the signed-in client
    pub async fn book(&self, request: BookingRequest) -> Result<Booking> {
        let client = self.require_profile()?;
        self.bookings.create(&client, request).await
    }

    /// Top up the signed-in user's wallet
    pub async fn top_up(&self, amount: f64) -> Result<Wallet> {
        let identity = self.require_identity()?;
        self.wallets.top_up(&identity.id, amount).await
    }

    pub async fn contact_support(&self, subject: &str, message: &str) -> Result<SupportReceipt> {
        let identity = self.require_identity()?;
        self.support.open_ticket(&identity.id, subject, message).await
    }

    /// Replace the signed-in user's avatar; returns its public URL
    pub async fn upload_avatar(&self, upload: &Upload) -> Result<String> {
        let identity = self.require_identity()?;
        let url = self.documents.upload_avatar(&identity.id, upload).await?;
        self.session.refresh().await;
        Ok(url)
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::backend::{AuthEvent, AuthEventKind, Backend, MessageFeed, SupabaseBackend};
    pub use crate::bookings::{BookingRequest, BookingSummary};
    pub use crate::callback::{CallbackOutcome, CallbackParams, CallbackStatus};
    pub use crate::config::{AppConfig, PollPolicy};
    pub use crate::documents::{DocumentKind, Upload};
    pub use crate::error::{Error, Result, ValidationError};
    pub use crate::guard::{
        AuthGuard, Decision, Guard, GuardChain, MissingProfilePolicy, Redirect, RoleGuard,
        VerificationGuard,
    };
    pub use crate::landing::{Landing, LandingGate};
    pub use crate::models::{
        Booking, BookingStatus, Identity, Message, Profile, ProfileDetails, ProfilePatch, Rating,
        Role, Transaction, VerificationStatus, VerificationSubmission, Wallet,
    };
    pub use crate::review::{QueueFilter, StatusCounts};
    pub use crate::routes::{paths, Navigation, Router};
    pub use crate::session::{SessionState, SessionStore};
    pub use crate::support::SupportReceipt;
    pub use crate::verification::{ReviewDecision, SubmissionForm};
    pub use crate::wallet::{Earnings, WalletOverview};
    pub use crate::SkillBee;
}
