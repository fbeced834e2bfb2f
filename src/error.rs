//! Error handling for the SkillBee core

use crate::models::VerificationStatus;
use skillbee_auth::AuthError;
use skillbee_postgrest::PostgrestError;
use skillbee_realtime::RealtimeError;
use skillbee_storage::StorageError;
use std::fmt;
use thiserror::Error;

/// Input problems caught before any backend round-trip
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("{0} is required")]
    MissingDocument(&'static str),

    #[error("{what} exceeds the {limit_mb}MB limit")]
    FileTooLarge { what: &'static str, limit_mb: usize },

    #[error("{what} does not accept {mime}")]
    UnsupportedType { what: &'static str, mime: String },

    #[error("a rejection reason is required")]
    MissingRejectionReason,

    #[error("message content cannot be empty")]
    EmptyMessage,

    #[error("please enter a valid amount")]
    InvalidAmount,

    #[error("invalid file path format: {0}. Expected format: userId/filename.ext")]
    InvalidPath(String),

    #[error("verification cannot move from {from} to {to}")]
    InvalidTransition {
        from: StatusLabel,
        to: VerificationStatus,
    },
}

/// `verification_status` as shown in messages, including the unset state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusLabel(pub Option<VerificationStatus>);

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(status) => write!(f, "{}", status),
            None => write!(f, "unsubmitted"),
        }
    }
}

/// Unified error type for the SkillBee core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Database error: {0}")]
    Database(#[from] PostgrestError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{document} upload failed: {message}")]
    DocumentUpload {
        document: &'static str,
        message: String,
    },

    #[error("Profile for {user_id} did not appear after {attempts} attempts")]
    SetupIncomplete { user_id: String, attempts: u32 },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    General(String),
}

impl Error {
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }

    pub fn forbidden<T: fmt::Display>(msg: T) -> Self {
        Error::Forbidden(msg.to_string())
    }

    pub fn not_found<T: fmt::Display>(msg: T) -> Self {
        Error::NotFound(msg.to_string())
    }

    pub fn general<T: fmt::Display>(msg: T) -> Self {
        Error::General(msg.to_string())
    }

    /// Network-level failures worth showing as "try again"
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(_) | Error::Timeout(_) => true,
            Error::Auth(AuthError::NetworkError(_)) => true,
            Error::Database(PostgrestError::NetworkError(_)) => true,
            Error::Storage(StorageError::NetworkError(_)) => true,
            Error::Realtime(_) => true,
            _ => false,
        }
    }

    /// Best-effort message for inline display
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation(e) => e.to_string(),
            Error::Auth(e) if e.is_rejected_credentials() => {
                "Invalid email or password.".to_string()
            }
            Error::NotAuthenticated => "Please sign in to continue.".to_string(),
            Error::Forbidden(_) => "You do not have access to this action.".to_string(),
            Error::NotFound(what) => format!("{} could not be found.", what),
            Error::DocumentUpload { document, .. } => {
                format!("Uploading the {} failed. Please try again.", document)
            }
            Error::SetupIncomplete { .. } => {
                "Your account setup is not complete yet. Please sign in again shortly.".to_string()
            }
            e if e.is_transient() => {
                "We could not reach the server. Please try again.".to_string()
            }
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
