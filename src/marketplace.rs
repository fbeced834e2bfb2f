//! Tasker-side booking queries and ratings

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::geo::Coordinates;
use crate::models::{Booking, Profile, Rating};
use std::sync::Arc;
use tracing::{debug, info};

/// An open booking with its distance from the tasker
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyBooking {
    pub booking: Booking,
    pub distance_km: f64,
}

/// A tasker's ratings with their average score
#[derive(Debug, Clone, PartialEq)]
pub struct RatingSummary {
    pub ratings: Vec<Rating>,
    /// 0 when there are no ratings; an unscored rating counts as 0
    pub average: f64,
}

impl RatingSummary {
    pub fn new(ratings: Vec<Rating>) -> Self {
        let average = if ratings.is_empty() {
            0.0
        } else {
            ratings.iter().map(|r| r.score.unwrap_or(0.0)).sum::<f64>() / ratings.len() as f64
        };
        Self { ratings, average }
    }

    pub fn count(&self) -> usize {
        self.ratings.len()
    }

    /// Score left on one booking
    pub fn for_booking(&self, booking_id: &str) -> Option<f64> {
        self.ratings
            .iter()
            .find(|r| r.task_id.as_deref() == Some(booking_id))
            .and_then(|r| r.score)
    }
}

#[derive(Clone)]
pub struct Marketplace {
    backend: Arc<dyn Backend>,
    radius_km: f64,
}

impl Marketplace {
    pub fn new(backend: Arc<dyn Backend>, radius_km: f64) -> Self {
        Self { backend, radius_km }
    }

    /// Requests a client addressed to this tasker
    pub async fn offered(&self, tasker_id: &str) -> Result<Vec<Booking>> {
        self.backend.offered_bookings(tasker_id).await
    }

    /// Open requests in the services the tasker offers. A tasker who has not
    /// listed any services sees every open request.
    pub async fn available(&self, tasker: &Profile) -> Result<Vec<Booking>> {
        let open = self.backend.open_bookings().await?;
        let services = tasker.services_offered.as_deref().unwrap_or_default();
        Ok(filter_by_services(open, services))
    }

    pub async fn accept(&self, booking_id: &str, tasker_id: &str) -> Result<Booking> {
        let booking = self
            .backend
            .assign_booking(booking_id, tasker_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("booking {}", booking_id)))?;
        info!(booking_id, tasker_id, "booking accepted");
        Ok(booking)
    }

    /// Return an offered booking to the open pool. Only the tasker it is
    /// currently offered to can do this.
    pub async fn decline(&self, booking_id: &str, tasker_id: &str) -> Result<Booking> {
        let booking = self
            .backend
            .release_booking(booking_id, tasker_id)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("booking {} offered to {}", booking_id, tasker_id))
            })?;
        info!(booking_id, tasker_id, "booking declined");
        Ok(booking)
    }

    pub async fn ratings(&self, tasker_id: &str) -> Result<RatingSummary> {
        let ratings = self.backend.tasker_ratings(tasker_id).await?;
        Ok(RatingSummary::new(ratings))
    }

    /// Open requests within the configured radius, nearest first
    pub async fn nearby(&self, origin: Option<Coordinates>) -> Result<Vec<NearbyBooking>> {
        let Some(origin) = origin else {
            debug!("no tasker location, skipping nearby search");
            return Ok(Vec::new());
        };
        let open = self.backend.open_bookings().await?;
        Ok(within_radius(open, &origin, self.radius_km))
    }
}

pub fn filter_by_services(bookings: Vec<Booking>, services: &[String]) -> Vec<Booking> {
    if services.is_empty() {
        return bookings;
    }
    bookings
        .into_iter()
        .filter(|b| {
            b.service_type
                .as_ref()
                .map_or(false, |t| services.iter().any(|s| s == t))
        })
        .collect()
}

pub fn within_radius(bookings: Vec<Booking>, origin: &Coordinates, radius_km: f64) -> Vec<NearbyBooking> {
    let mut nearby: Vec<NearbyBooking> = bookings
        .into_iter()
        .filter_map(|booking| {
            let at = Coordinates::from_parts(booking.latitude, booking.longitude)?;
            let distance_km = origin.distance_km(&at);
            (distance_km <= radius_km).then_some(NearbyBooking {
                booking,
                distance_km,
            })
        })
        .collect();
    nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    nearby
}
