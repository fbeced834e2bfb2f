//! Records shared between the core and the backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Client,
    Tasker,
    Admin,
    /// Any value the backend sends that this build does not know
    #[serde(other)]
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Tasker => "tasker",
            Role::Admin => "admin",
            Role::Unknown => "unknown",
        }
    }

    /// Unrecognized roles are routed and gated as clients so that the
    /// landing gate and the role guards agree on them.
    pub fn effective(self) -> Role {
        match self {
            Role::Unknown => Role::Client,
            other => other,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "client" => Role::Client,
            "tasker" => Role::Tasker,
            "admin" => Role::Admin,
            _ => Role::Unknown,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Approved => "approved",
            VerificationStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(VerificationStatus::Pending),
            "approved" => Ok(VerificationStatus::Approved),
            "rejected" => Ok(VerificationStatus::Rejected),
            other => Err(format!("unknown verification status: {}", other)),
        }
    }
}

/// Authenticated identity as issued by the auth service
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
    /// User metadata supplied at sign-up
    pub metadata: Value,
}

impl Identity {
    pub fn new(id: &str, email: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            email: email.map(str::to_string),
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Role requested at sign-up, defaulting to client
    pub fn metadata_role(&self) -> Role {
        self.metadata
            .get("role")
            .and_then(Value::as_str)
            .map(|r| r.parse().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl From<&skillbee_auth::User> for Identity {
    fn from(user: &skillbee_auth::User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            metadata: user.user_metadata.clone(),
        }
    }
}

/// A row of the `users` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default, deserialize_with = "lenient_role")]
    pub role: Role,
    #[serde(default, deserialize_with = "lenient_status")]
    pub verification_status: Option<VerificationStatus>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "phone_number")]
    pub phone: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub hourly_rate: Option<f64>,
    #[serde(default)]
    pub skills: Option<Vec<String>>,
    #[serde(default)]
    pub services_offered: Option<Vec<String>>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl Profile {
    pub fn new(id: &str, role: Role) -> Self {
        Self {
            id: id.to_string(),
            role,
            verification_status: None,
            full_name: None,
            email: None,
            phone: None,
            bio: None,
            address: None,
            avatar_url: None,
            hourly_rate: None,
            skills: None,
            services_offered: None,
            latitude: None,
            longitude: None,
        }
    }

    pub fn with_verification(mut self, status: Option<VerificationStatus>) -> Self {
        self.verification_status = status;
        self
    }

    pub fn is_verified_tasker(&self) -> bool {
        self.role == Role::Tasker && self.verification_status == Some(VerificationStatus::Approved)
    }

    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("Unknown User")
    }
}

/// A present but null or non-string role reads as [`Role::Unknown`]; a
/// missing one keeps the default.
fn lenient_role<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Role, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    Ok(raw
        .as_str()
        .map_or(Role::Unknown, |r| r.parse().unwrap_or(Role::Unknown)))
}

/// Anything outside the known statuses, `""` included, reads as no status,
/// which no gate treats as approved.
fn lenient_status<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<VerificationStatus>, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    Ok(raw.as_str().and_then(|s| s.parse().ok()))
}

/// Optional profile fields collected at sign-up
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Row inserted when the sign-up trigger has not created the profile
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewProfile {
    pub id: String,
    pub email: String,
    pub role: Role,
    #[serde(flatten)]
    pub details: ProfileDetails,
}

/// Self-service profile edit. Role and verification status are not
/// editable here.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hourly_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services_offered: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self == &ProfilePatch::default()
    }

    /// Apply to a local copy the same way the backend applies the update
    pub fn apply_to(&self, profile: &mut Profile) {
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(v) = &self.$field { profile.$field = Some(v.clone()); })*
            };
        }
        set!(
            full_name,
            phone,
            bio,
            address,
            avatar_url,
            hourly_rate,
            skills,
            services_offered,
            latitude,
            longitude
        );
    }
}

/// A row of `tasker_verifications`; one per user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSubmission {
    pub user_id: String,
    pub service_category: String,
    pub national_id_number: String,
    #[serde(rename = "id_document_url", default)]
    pub id_document_ref: Option<String>,
    #[serde(rename = "passport_photo_url", default)]
    pub passport_photo_ref: Option<String>,
    #[serde(rename = "certificate_url", default)]
    pub certificate_ref: Option<String>,
    #[serde(rename = "cv_url", default)]
    pub cv_ref: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub hourly_rate: Option<f64>,
    #[serde(default)]
    pub operating_radius: Option<f64>,
    pub status: VerificationStatus,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Admin decision recorded on a submission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewUpdate {
    pub status: VerificationStatus,
    pub rejection_reason: Option<String>,
    pub reviewed_by: String,
    pub reviewed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    #[serde(other)]
    Other,
}

/// A row of `bookings`. Only the fields the core filters on are typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub client_id: String,
    #[serde(default)]
    pub tasker_id: Option<String>,
    #[serde(default)]
    pub service_type: Option<String>,
    pub status: BookingStatus,
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Assigned => "assigned",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Other => "other",
        }
    }
}

impl Booking {
    /// The participant on the other side from `user_id`
    pub fn counterpart(&self, user_id: &str) -> Option<&str> {
        if self.client_id == user_id {
            self.tasker_id.as_deref()
        } else {
            Some(self.client_id.as_str())
        }
    }
}

/// A booking placed by a client. Naming a tasker assigns it directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewBooking {
    pub client_id: String,
    pub service_type: String,
    pub budget: f64,
    pub location: String,
    pub notes: Option<String>,
    pub status: BookingStatus,
    pub tasker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

/// A row of `wallets`; one per user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    #[serde(default)]
    pub wallet_id: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A row of `transactions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub wallet_id: Option<String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTransaction {
    pub user_id: String,
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

/// A row of `ratings`, left by a client on a completed booking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    pub tasker_id: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A row inserted into `support_tickets`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewSupportTicket {
    pub user_id: String,
    pub subject: String,
    pub message: String,
    pub status: String,
}

/// A row of `messages`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub booking_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessage {
    pub booking_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub read: bool,
}
