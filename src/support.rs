//! Support requests

use crate::backend::Backend;
use crate::error::{Result, ValidationError};
use crate::models::NewSupportTicket;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of a support request. The user is thanked either way; `recorded`
/// says whether a ticket row was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportReceipt {
    pub recorded: bool,
}

impl SupportReceipt {
    pub fn message(&self) -> &'static str {
        if self.recorded {
            "Support ticket created successfully! We will get back to you soon."
        } else {
            "Thank you for contacting us! We will get back to you soon."
        }
    }
}

#[derive(Clone)]
pub struct Support {
    backend: Arc<dyn Backend>,
}

impl Support {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub async fn open_ticket(
        &self,
        user_id: &str,
        subject: &str,
        message: &str,
    ) -> Result<SupportReceipt> {
        let (subject, message) = (subject.trim(), message.trim());
        if subject.is_empty() {
            return Err(ValidationError::MissingField("subject").into());
        }
        if message.is_empty() {
            return Err(ValidationError::MissingField("message").into());
        }

        let ticket = NewSupportTicket {
            user_id: user_id.to_string(),
            subject: subject.to_string(),
            message: message.to_string(),
            status: "open".to_string(),
        };
        match self.backend.insert_ticket(&ticket).await {
            Ok(()) => {
                info!(user_id, "support ticket opened");
                Ok(SupportReceipt { recorded: true })
            }
            Err(e) => {
                warn!(user_id, error = %e, "could not store support ticket");
                Ok(SupportReceipt { recorded: false })
            }
        }
    }
}
