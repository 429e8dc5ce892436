//! Great-circle distance and radius filtering.
//!
//! Coordinates are taken as degrees and are not range-checked: a latitude of
//! 120° yields a number, just not a meaningful one.

use crate::types::{AircraftRecord, GeoPoint};

/// Mean Earth radius in statute miles.
pub const EARTH_RADIUS_MILES: f64 = 3959.0;
/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two points, in the unit of `radius`.
pub fn haversine_distance(from: GeoPoint, to: GeoPoint, radius: f64) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let delta_lat = lat2 - lat1;
    let delta_lon = to.lon.to_radians() - from.lon.to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);

    2.0 * a.sqrt().asin() * radius
}

/// Keeps records within `radius` of `center`.
///
/// The predicate is `0 < |d| <= radius`: a record sitting exactly on the
/// center is dropped. A non-positive radius disables filtering.
#[derive(Debug, Clone, Copy)]
pub struct RadiusFilter {
    pub center: GeoPoint,
    pub radius: f64,
    /// Sphere radius the distance is measured on (sets the unit).
    pub unit_radius: f64,
}

impl RadiusFilter {
    pub fn new(center: GeoPoint, radius: f64) -> Self {
        Self {
            center,
            radius,
            unit_radius: EARTH_RADIUS_MILES,
        }
    }

    pub fn with_unit_radius(mut self, unit_radius: f64) -> Self {
        self.unit_radius = unit_radius;
        self
    }

    pub fn is_active(&self) -> bool {
        self.radius > 0.0
    }

    /// Distance from the center, `None` when the record has no position.
    pub fn distance_to(&self, record: &AircraftRecord) -> Option<f64> {
        record
            .position()
            .map(|p| haversine_distance(self.center, p, self.unit_radius))
    }

    pub fn within(&self, distance: f64) -> bool {
        let d = distance.abs();
        d > 0.0 && d <= self.radius
    }

    /// Whether a record with this distance is kept.
    pub fn retains(&self, distance: Option<f64>) -> bool {
        if !self.is_active() {
            return true;
        }
        distance.is_some_and(|d| self.within(d))
    }
}
