//! Where the host is, for stamping observations.

#![allow(missing_docs)]

use std::sync::Arc;

use crate::core::config::LocationConfig;
use crate::pipeline::records::GeoPoint;

/// Point-in-time location fix.
pub trait LocationProvider: Send + Sync {
    fn current(&self) -> Option<GeoPoint>;
}

/// No positioning available; records persist as `0.0;0.0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

impl LocationProvider for NoLocation {
    fn current(&self) -> Option<GeoPoint> {
        None
    }
}

/// Stationary sensor with a configured position.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation {
    point: GeoPoint,
}

impl FixedLocation {
    #[must_use]
    pub const fn new(point: GeoPoint) -> Self {
        Self { point }
    }
}

impl LocationProvider for FixedLocation {
    fn current(&self) -> Option<GeoPoint> {
        Some(self.point)
    }
}

#[must_use]
pub fn location_from_config(config: &LocationConfig) -> Arc<dyn LocationProvider> {
    match (config.latitude, config.longitude) {
        (Some(latitude), Some(longitude)) => match GeoPoint::from_stored(latitude, longitude) {
            Some(point) => Arc::new(FixedLocation::new(point)),
            None => Arc::new(NoLocation),
        },
        _ => Arc::new(NoLocation),
    }
}
