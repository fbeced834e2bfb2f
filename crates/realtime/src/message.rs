use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Phoenix frame as sent over the socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub event: ChannelEvent,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub message_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelEvent {
    PostgresChanges,
    #[serde(rename = "phx_join")]
    PhoenixJoin,
    #[serde(rename = "phx_leave")]
    PhoenixLeave,
    #[serde(rename = "phx_reply")]
    PhoenixReply,
    #[serde(rename = "phx_error")]
    PhoenixError,
    #[serde(rename = "phx_close")]
    PhoenixClose,
    Heartbeat,
    AccessToken,
    System,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelEvent::PostgresChanges => "postgres_changes",
            ChannelEvent::PhoenixJoin => "phx_join",
            ChannelEvent::PhoenixLeave => "phx_leave",
            ChannelEvent::PhoenixReply => "phx_reply",
            ChannelEvent::PhoenixError => "phx_error",
            ChannelEvent::PhoenixClose => "phx_close",
            ChannelEvent::Heartbeat => "heartbeat",
            ChannelEvent::AccessToken => "access_token",
            ChannelEvent::System => "system",
            ChannelEvent::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// Kind of row change carried by a postgres_changes frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row change delivered to a subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type", alias = "eventType")]
    pub kind: ChangeKind,
    pub schema: String,
    pub table: String,
    #[serde(default, alias = "new")]
    pub record: Value,
    #[serde(default, alias = "old")]
    pub old_record: Value,
    pub commit_timestamp: Option<String>,
}

impl ChangeEvent {
    /// Extract the change from a postgres_changes payload. The server nests
    /// it under `data`; older servers send it flat.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let body = payload.get("data").unwrap_or(payload);
        serde_json::from_value(body.clone()).ok()
    }

    /// Typed view of the new row
    pub fn record_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.record.clone())
    }
}
