//! Configuration for the SkillBee core

use crate::error::{Error, Result};
use std::time::Duration;
use tracing::debug;

const MIB: usize = 1024 * 1024;

/// Bounded fixed-delay retry, used while waiting for the profile row
/// created by the sign-up trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_millis(300),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Backend project URL
    pub supabase_url: String,

    /// Anonymous API key
    pub anon_key: String,

    /// Public bucket for avatars
    pub avatar_bucket: String,

    /// Private bucket for verification documents
    pub documents_bucket: String,

    /// Upper bound on resolving the initial session
    pub session_init_timeout: Duration,

    pub profile_poll: PollPolicy,

    /// Lifetime of signed document URLs, in seconds
    pub signed_url_ttl: u64,

    pub document_size_limit: usize,

    pub avatar_size_limit: usize,

    pub request_timeout: Option<Duration>,

    pub nearby_radius_km: f64,
}

impl AppConfig {
    pub fn new(supabase_url: &str, anon_key: &str) -> Self {
        Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            avatar_bucket: "avatars".to_string(),
            documents_bucket: "tasker-documents".to_string(),
            session_init_timeout: Duration::from_secs(5),
            profile_poll: PollPolicy::default(),
            signed_url_ttl: 3600,
            document_size_limit: 10 * MIB,
            avatar_size_limit: 5 * MIB,
            request_timeout: Some(Duration::from_secs(30)),
            nearby_radius_km: 50.0,
        }
    }

    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| lookup(k))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        let url = first(&["SKILLBEE_SUPABASE_URL", "SUPABASE_URL"])
            .ok_or_else(|| Error::config("SKILLBEE_SUPABASE_URL is not set"))?;
        let key = first(&[
            "SKILLBEE_SUPABASE_ANON_KEY",
            "SUPABASE_ANON_KEY",
            "SUPABASE_KEY",
        ])
        .ok_or_else(|| Error::config("SKILLBEE_SUPABASE_ANON_KEY is not set"))?;
        url::Url::parse(&url).map_err(|e| Error::config(format!("invalid backend URL: {}", e)))?;

        let mut config = Self::new(&url, &key);
        if let Some(bucket) = first(&["SKILLBEE_AVATAR_BUCKET"]) {
            config.avatar_bucket = bucket;
        }
        if let Some(bucket) = first(&["SKILLBEE_DOCUMENTS_BUCKET"]) {
            config.documents_bucket = bucket;
        }
        Ok(config)
    }

    pub fn with_avatar_bucket(mut self, value: &str) -> Self {
        self.avatar_bucket = value.to_string();
        self
    }

    pub fn with_documents_bucket(mut self, value: &str) -> Self {
        self.documents_bucket = value.to_string();
        self
    }

    pub fn with_session_init_timeout(mut self, value: Duration) -> Self {
        self.session_init_timeout = value;
        self
    }

    pub fn with_profile_poll(mut self, value: PollPolicy) -> Self {
        self.profile_poll = value;
        self
    }

    pub fn with_signed_url_ttl(mut self, seconds: u64) -> Self {
        self.signed_url_ttl = seconds;
        self
    }

    pub fn with_document_size_limit(mut self, bytes: usize) -> Self {
        self.document_size_limit = bytes;
        self
    }

    pub fn with_avatar_size_limit(mut self, bytes: usize) -> Self {
        self.avatar_size_limit = bytes;
        self
    }

    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    pub fn with_nearby_radius_km(mut self, value: f64) -> Self {
        self.nearby_radius_km = value;
        self
    }
}
