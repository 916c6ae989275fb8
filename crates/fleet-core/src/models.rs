//! Core data models for the journey engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo;

/// A geographic coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Role of a stop within an itinerary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaypointKind {
    Origin,
    Checkpoint,
    Destination,
}

/// A caller-specified stop the journey must pass through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub point: GeoPoint,
    pub kind: WaypointKind,
}

impl Waypoint {
    pub fn origin(lat: f64, lon: f64) -> Self {
        Self {
            point: GeoPoint::new(lat, lon),
            kind: WaypointKind::Origin,
        }
    }

    pub fn checkpoint(lat: f64, lon: f64) -> Self {
        Self {
            point: GeoPoint::new(lat, lon),
            kind: WaypointKind::Checkpoint,
        }
    }

    pub fn destination(lat: f64, lon: f64) -> Self {
        Self {
            point: GeoPoint::new(lat, lon),
            kind: WaypointKind::Destination,
        }
    }
}

/// Ways an itinerary can fail validation.
///
/// A journey is never constructed from a malformed itinerary; a stop whose
/// coordinate could not be resolved upstream must be rejected by the caller
/// before it gets here, not carried along as a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItineraryError {
    #[error("itinerary needs at least 2 waypoints, got {0}")]
    TooShort(usize),
    #[error("first waypoint must be the origin")]
    MissingOrigin,
    #[error("last waypoint must be the destination")]
    MissingDestination,
    #[error("waypoint {0} must be a checkpoint")]
    MisplacedTerminal(usize),
}

/// Check itinerary shape: at least two stops, origin first, destination
/// last, only checkpoints in between.
pub fn validate_itinerary(waypoints: &[Waypoint]) -> Result<(), ItineraryError> {
    if waypoints.len() < 2 {
        return Err(ItineraryError::TooShort(waypoints.len()));
    }
    if waypoints[0].kind != WaypointKind::Origin {
        return Err(ItineraryError::MissingOrigin);
    }
    if waypoints[waypoints.len() - 1].kind != WaypointKind::Destination {
        return Err(ItineraryError::MissingDestination);
    }
    for (index, waypoint) in waypoints[1..waypoints.len() - 1].iter().enumerate() {
        if waypoint.kind != WaypointKind::Checkpoint {
            return Err(ItineraryError::MisplacedTerminal(index + 1));
        }
    }
    Ok(())
}

/// Ordered polyline connecting an itinerary, produced by an external planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub points: Vec<GeoPoint>,
    #[serde(default)]
    pub total_distance_m: Option<f64>,
    #[serde(default)]
    pub total_duration_s: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouteMatchError {
    #[error("route start is {distance_m:.0}m from the origin")]
    OriginMismatch { distance_m: f64 },
    #[error("route end is {distance_m:.0}m from the destination")]
    DestinationMismatch { distance_m: f64 },
    #[error("waypoint {index} not found on the route after index {searched_from}")]
    WaypointOffRoute { index: usize, searched_from: usize },
}

impl Route {
    pub fn new(points: Vec<GeoPoint>) -> Self {
        Self {
            points,
            total_distance_m: None,
            total_duration_s: None,
        }
    }

    /// Locate each waypoint on the polyline and return the index of the
    /// segment it lies on.
    ///
    /// The search for a waypoint starts at the segment matched by the
    /// previous one, so the returned indices are non-decreasing by
    /// construction; a waypoint with no segment within `epsilon_m` in the
    /// remaining polyline fails the whole match. Matching is distance-based:
    /// routed paths snap stops onto the road network, so an interpolated or
    /// snapped coordinate never compares equal to the requested one.
    pub fn waypoint_indices(
        &self,
        waypoints: &[Waypoint],
        epsilon_m: f64,
    ) -> Result<Vec<usize>, RouteMatchError> {
        let points = &self.points;
        if let (Some(&first), Some(&last)) = (points.first(), points.last()) {
            if let Some(origin) = waypoints.first() {
                let distance_m = geo::distance_m(first, origin.point);
                if distance_m > epsilon_m {
                    return Err(RouteMatchError::OriginMismatch { distance_m });
                }
            }
            if let Some(destination) = waypoints.last() {
                let distance_m = geo::distance_m(last, destination.point);
                if distance_m > epsilon_m {
                    return Err(RouteMatchError::DestinationMismatch { distance_m });
                }
            }
        }

        let mut indices = Vec::with_capacity(waypoints.len());
        let mut from = 0usize;
        for (index, waypoint) in waypoints.iter().enumerate() {
            let mut found = None;
            for segment in from..points.len().saturating_sub(1) {
                let distance_m = geo::distance_to_segment_m(
                    waypoint.point,
                    points[segment],
                    points[segment + 1],
                );
                if distance_m <= epsilon_m {
                    found = Some(segment);
                    break;
                }
            }
            match found {
                Some(segment) => {
                    indices.push(segment);
                    from = segment;
                }
                None => {
                    return Err(RouteMatchError::WaypointOffRoute {
                        index,
                        searched_from: from,
                    })
                }
            }
        }
        Ok(indices)
    }
}

/// A circular region with an associated effect when the vehicle enters it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub center: GeoPoint,
    pub radius_m: f64,
    pub effect: ZoneEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneEffect {
    /// Hold position for the dwell duration, then resume.
    Pause { dwell_ms: u64 },
    /// Request a fresh route from the current position.
    Reroute,
}

/// Scheduler-level status of the simulated vehicle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionStatus {
    /// Not yet armed with a route
    #[default]
    Idle,
    /// Advancing along the route
    Running,
    /// Holding at a zone until the dwell deadline
    Paused,
    /// Final route point reached
    Completed,
    /// Stopped by the caller
    Cancelled,
}

impl MotionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MotionStatus::Completed | MotionStatus::Cancelled)
    }
}

/// Snapshot of the simulated vehicle, updated once per tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotionState {
    pub position: GeoPoint,
    pub segment_index: usize,
    /// Progress along the current segment, in [0, 1].
    pub segment_progress: f64,
    pub status: MotionStatus,
}

/// Journey-level lifecycle owned by the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JourneyStatus {
    #[default]
    Idle,
    /// Waiting on the route planner
    Planning,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl JourneyStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JourneyStatus::Completed | JourneyStatus::Cancelled | JourneyStatus::Failed
        )
    }
}

/// Why a journey's active route was replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteChangeReason {
    Initial,
    Reroute,
}

/// Lifecycle event published to external listeners.
///
/// Events are delivered in the order they were generated by ticking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyEvent {
    pub journey_id: String,
    pub position: GeoPoint,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: JourneyEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JourneyEventKind {
    /// An intermediate stop was structurally reached on the polyline.
    CheckpointArrived { waypoint_index: usize },
    Paused {
        zone_id: String,
        resume_at: DateTime<Utc>,
    },
    Resumed,
    RouteChanged {
        reason: RouteChangeReason,
        points: usize,
    },
    Completed,
    Cancelled,
    Failed { reason: String },
}
