//! Booking conversations

use crate::backend::{Backend, MessageFeed};
use crate::error::{Error, Result, ValidationError};
use crate::models::{Booking, Message, NewMessage, Profile};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A booking seen as a conversation by one participant
#[derive(Debug, Clone)]
pub struct Conversation {
    pub booking: Booking,
    pub counterpart: Option<Profile>,
    pub last_message: Option<Message>,
    pub unread: u64,
}

#[derive(Clone)]
pub struct Messaging {
    backend: Arc<dyn Backend>,
}

impl Messaging {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Bookings with an assigned tasker where `user_id` is either party
    pub async fn conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let bookings = self.backend.participant_bookings(user_id).await?;

        let others: Vec<String> = bookings
            .iter()
            .filter_map(|b| b.counterpart(user_id).map(str::to_string))
            .collect();
        let mut profiles: HashMap<String, Profile> = HashMap::new();
        if !others.is_empty() {
            match self.backend.fetch_profiles(&others).await {
                Ok(found) => profiles.extend(found.into_iter().map(|p| (p.id.clone(), p))),
                Err(e) => warn!(error = %e, "could not load conversation participants"),
            }
        }

        let mut conversations = Vec::with_capacity(bookings.len());
        for booking in bookings {
            let last_message = self.backend.latest_message(&booking.id).await.unwrap_or_else(|e| {
                warn!(booking_id = %booking.id, error = %e, "could not load latest message");
                None
            });
            let unread = self
                .backend
                .unread_count(&booking.id, user_id)
                .await
                .unwrap_or_else(|e| {
                    warn!(booking_id = %booking.id, error = %e, "could not count unread messages");
                    0
                });
            let counterpart = booking
                .counterpart(user_id)
                .and_then(|id| profiles.get(id).cloned());
            conversations.push(Conversation {
                booking,
                counterpart,
                last_message,
                unread,
            });
        }
        Ok(conversations)
    }

    /// Oldest first
    pub async fn history(&self, booking_id: &str) -> Result<Vec<Message>> {
        self.backend.list_messages(booking_id).await
    }

    pub async fn send(
        &self,
        booking_id: &str,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        if receiver_id.is_empty() {
            return Err(Error::general("message has no recipient"));
        }
        let message = NewMessage {
            booking_id: booking_id.to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            read: false,
        };
        let sent = self.backend.insert_message(&message).await?;
        debug!(booking_id, message_id = %sent.id, "message sent");
        Ok(sent)
    }

    /// Mark everything addressed to `reader_id` in the booking as read
    pub async fn mark_read(&self, booking_id: &str, reader_id: &str) -> Result<()> {
        self.backend.mark_read(booking_id, reader_id).await
    }

    /// New messages as they arrive; dropping the feed unsubscribes
    pub async fn live(&self, booking_id: &str) -> Result<MessageFeed> {
        self.backend.subscribe_messages(booking_id).await
    }
}
