//! Distance and location freshness helpers

use chrono::{DateTime, Utc};
use std::time::Duration;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Locations older than this are shown as stale
pub const STALE_LOCATION_THRESHOLD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Both parts present and non-zero
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) if lat != 0.0 && lon != 0.0 => Some(Self::new(lat, lon)),
            _ => None,
        }
    }

    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        haversine_km(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Great-circle distance in kilometres
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// A missing timestamp counts as stale
pub fn is_stale(updated_at: Option<DateTime<Utc>>, now: DateTime<Utc>, threshold: Duration) -> bool {
    let Some(updated_at) = updated_at else {
        return true;
    };
    match (now - updated_at).to_std() {
        Ok(age) => age > threshold,
        // In the future: clock skew, not stale
        Err(_) => false,
    }
}
