pub mod geo;
pub mod models;
pub mod scheduler;
pub mod zones;

pub use geo::{distance_m, haversine_distance};
pub use models::{
    GeoPoint, ItineraryError, JourneyEvent, JourneyEventKind, JourneyStatus, MotionState,
    MotionStatus, Route, RouteChangeReason, RouteMatchError, Waypoint, WaypointKind, Zone,
    ZoneEffect, validate_itinerary,
};
pub use scheduler::{MotionError, MotionEvent, MotionScheduler, ROUTE_MATCH_EPSILON_M};
pub use zones::{checkpoint_zones, zones_within};
