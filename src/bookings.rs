//! Client-side bookings

use crate::backend::Backend;
use crate::error::{Error, Result, ValidationError};
use crate::geo::Coordinates;
use crate::models::{Booking, BookingStatus, NewBooking, Profile, Role};
use std::sync::Arc;
use tracing::info;

/// What a client fills in to book a task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingRequest {
    pub service_type: String,
    pub budget: f64,
    pub location: String,
    pub notes: Option<String>,
    /// Book this tasker directly instead of posting an open request
    pub tasker_id: Option<String>,
    pub coordinates: Option<Coordinates>,
}

impl BookingRequest {
    pub fn new(service_type: &str, budget: f64, location: &str) -> Self {
        Self {
            service_type: service_type.to_string(),
            budget,
            location: location.to_string(),
            ..Default::default()
        }
    }

    pub fn with_tasker(mut self, tasker_id: &str) -> Self {
        self.tasker_id = Some(tasker_id.to_string());
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }

    fn check(&self) -> std::result::Result<(), ValidationError> {
        if self.service_type.trim().is_empty() {
            return Err(ValidationError::MissingField("service type"));
        }
        if self.location.trim().is_empty() {
            return Err(ValidationError::MissingField("location"));
        }
        if !self.budget.is_finite() || self.budget <= 0.0 {
            return Err(ValidationError::InvalidAmount);
        }
        Ok(())
    }

    fn into_row(self, client_id: &str) -> NewBooking {
        let tasker_id = self.tasker_id.filter(|t| !t.trim().is_empty());
        NewBooking {
            client_id: client_id.to_string(),
            service_type: self.service_type.trim().to_string(),
            budget: self.budget,
            location: self.location.trim().to_string(),
            notes: self.notes.filter(|n| !n.trim().is_empty()),
            status: if tasker_id.is_some() {
                BookingStatus::Assigned
            } else {
                BookingStatus::Pending
            },
            tasker_id,
            latitude: self.coordinates.map(|c| c.latitude),
            longitude: self.coordinates.map(|c| c.longitude),
        }
    }
}

/// Counts shown on the client dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookingSummary {
    /// Pending or in progress
    pub active: usize,
    pub completed: usize,
    pub total: usize,
}

impl BookingSummary {
    pub fn from_bookings(bookings: &[Booking]) -> Self {
        let count = |f: fn(&BookingStatus) -> bool| bookings.iter().filter(|b| f(&b.status)).count();
        Self {
            active: count(|s| matches!(s, BookingStatus::Pending | BookingStatus::InProgress)),
            completed: count(|s| *s == BookingStatus::Completed),
            total: bookings.len(),
        }
    }
}

#[derive(Clone)]
pub struct Bookings {
    backend: Arc<dyn Backend>,
}

impl Bookings {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub async fn create(&self, client: &Profile, request: BookingRequest) -> Result<Booking> {
        if client.role.effective() != Role::Client {
            return Err(Error::forbidden("only clients can book tasks"));
        }
        request.check()?;
        let row = request.into_row(&client.id);
        let booking = self.backend.create_booking(&row).await?;
        info!(
            booking_id = %booking.id,
            client_id = %client.id,
            assigned = booking.tasker_id.is_some(),
            "booking created"
        );
        Ok(booking)
    }

    /// The client's bookings, newest first, optionally of one status
    pub async fn list(&self, client_id: &str, status: Option<BookingStatus>) -> Result<Vec<Booking>> {
        self.backend
            .client_bookings(client_id, status.as_ref())
            .await
    }

    pub async fn summary(&self, client_id: &str) -> Result<BookingSummary> {
        let bookings = self.backend.client_bookings(client_id, None).await?;
        Ok(BookingSummary::from_bookings(&bookings))
    }
}
