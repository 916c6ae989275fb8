//! Route planning interface and the straight-line fallback planner.

use async_trait::async_trait;
use thiserror::Error;

use fleet_core::geo::{bearing, distance_m, offset_by_bearing};
use fleet_core::models::{GeoPoint, Route, Waypoint};

#[derive(Debug, Clone, Error)]
pub enum PlanError {
    /// The service answered but found no drivable path. Not retryable:
    /// the input will not become routable without caller intervention.
    #[error("no route found between the requested waypoints")]
    RouteNotFound,
    /// Transport-level failure. Retryable with backoff.
    #[error("route service error: {0}")]
    Network(String),
}

/// External service that turns an ordered itinerary into a polyline.
///
/// Implementations must be idempotent for identical input, and must keep the
/// waypoints as a monotone subsequence of the returned polyline: every stop
/// appears on the route, in itinerary order. The scheduler relies on this to
/// detect checkpoint arrival structurally instead of by coordinate equality.
#[async_trait]
pub trait RoutePlanner: Send + Sync {
    async fn plan(&self, waypoints: &[Waypoint]) -> Result<Route, PlanError>;
}

/// Planner that connects stops with straight legs, subdivided so no segment
/// exceeds `max_segment_m`. Deterministic; used by tests and offline runs.
pub struct DirectPlanner {
    pub max_segment_m: f64,
}

impl Default for DirectPlanner {
    fn default() -> Self {
        Self {
            max_segment_m: 200.0,
        }
    }
}

#[async_trait]
impl RoutePlanner for DirectPlanner {
    async fn plan(&self, waypoints: &[Waypoint]) -> Result<Route, PlanError> {
        if waypoints.len() < 2 {
            return Err(PlanError::RouteNotFound);
        }
        let max_segment_m = self.max_segment_m.max(1.0);
        let mut points = vec![waypoints[0].point];
        let mut total_m = 0.0;
        for pair in waypoints.windows(2) {
            let (start, end) = (pair[0].point, pair[1].point);
            let leg_m = distance_m(start, end);
            total_m += leg_m;
            let heading = bearing(start.lat, start.lon, end.lat, end.lon);
            let steps = (leg_m / max_segment_m).ceil().max(1.0) as usize;
            for step in 1..=steps {
                if step == steps {
                    points.push(end);
                } else {
                    let fraction = step as f64 / steps as f64;
                    let (lat, lon) =
                        offset_by_bearing(start.lat, start.lon, leg_m * fraction, heading);
                    points.push(GeoPoint::new(lat, lon));
                }
            }
        }
        Ok(Route {
            points,
            total_distance_m: Some(total_m),
            total_duration_s: None,
        })
    }
}
