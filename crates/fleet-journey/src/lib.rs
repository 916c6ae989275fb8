pub mod backoff;
pub mod config;
pub mod controller;
pub mod osrm;
pub mod planner;

pub use config::JourneyConfig;
pub use controller::{JourneyController, JourneyError};
pub use osrm::OsrmPlanner;
pub use planner::{DirectPlanner, PlanError, RoutePlanner};
