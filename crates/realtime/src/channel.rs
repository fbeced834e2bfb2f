use crate::client::Inner;
use crate::filters::{DatabaseFilter, FilterOperator};
use crate::message::{ChangeEvent, ChannelEvent};
use log::{debug, warn};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which row changes a subscription wants
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseChanges {
    schema: String,
    table: String,
    event: String,
    filter: Option<DatabaseFilter>,
}

impl DatabaseChanges {
    /// All change kinds on `public.{table}`
    pub fn new(table: &str) -> Self {
        Self {
            schema: "public".to_string(),
            table: table.to_string(),
            event: "*".to_string(),
            filter: None,
        }
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    /// Restrict to `INSERT`, `UPDATE` or `DELETE`
    pub fn event(mut self, event: &str) -> Self {
        self.event = event.to_uppercase();
        self
    }

    /// The server accepts a single filter per binding.
    pub fn filter(mut self, filter: DatabaseFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn eq<T: Into<serde_json::Value>>(self, column: &str, value: T) -> Self {
        self.filter(DatabaseFilter {
            column: column.to_string(),
            operator: FilterOperator::Eq,
            value: value.into(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub(crate) fn to_binding(&self) -> serde_json::Value {
        let mut binding = json!({
            "event": self.event,
            "schema": self.schema,
            "table": self.table,
        });
        if let Some(filter) = &self.filter {
            binding["filter"] = json!(filter.to_filter_string());
        }
        binding
    }

    pub(crate) fn matches(&self, change: &ChangeEvent) -> bool {
        change.table == self.table
            && change.schema == self.schema
            && (self.event == "*"
                || serde_json::to_value(change.kind)
                    .map(|v| v == json!(self.event))
                    .unwrap_or(false))
    }
}

/// Live feed of row changes for one channel. Dropping it leaves the channel.
pub struct Subscription {
    topic: String,
    receiver: mpsc::Receiver<ChangeEvent>,
    inner: Arc<Inner>,
    left: bool,
}

impl Subscription {
    pub(crate) fn new(topic: String, receiver: mpsc::Receiver<ChangeEvent>, inner: Arc<Inner>) -> Self {
        Self {
            topic,
            receiver,
            inner,
            left: false,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next change, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    /// Leave the channel and wait for the leave frame to be queued.
    pub async fn unsubscribe(mut self) {
        self.left = true;
        self.inner.forget_channel(&self.topic);
        if let Some(tx) = self.inner.socket_sender() {
            let frame = self.inner.frame(&self.topic, ChannelEvent::PhoenixLeave, json!({}));
            if tx.send(frame).await.is_err() {
                debug!("socket closed before leaving {}", self.topic);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.left {
            return;
        }
        self.inner.forget_channel(&self.topic);
        if let Some(tx) = self.inner.socket_sender() {
            let frame = self.inner.frame(&self.topic, ChannelEvent::PhoenixLeave, json!({}));
            if let Err(e) = tx.try_send(frame) {
                warn!("could not queue leave for {}: {}", self.topic, e);
            }
        }
    }
}
