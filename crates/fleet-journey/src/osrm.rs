//! OSRM routing service adapter.
//!
//! Speaks the public OSRM HTTP API (`/route/v1/<profile>/...`) and maps its
//! responses onto the `RoutePlanner` contract. OSRM snaps stops onto the
//! road network, so returned endpoints sit near, not on, the requested ones.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use fleet_core::models::{GeoPoint, Route, Waypoint};

use crate::planner::{PlanError, RoutePlanner};

const DEFAULT_PROFILE: &str = "driving";
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// HTTP client for an OSRM routing server.
pub struct OsrmPlanner {
    client: Client,
    base_url: String,
    profile: String,
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
    distance: f64,
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    /// GeoJSON order: [lon, lat]
    coordinates: Vec<[f64; 2]>,
}

impl OsrmPlanner {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.into(),
            profile: DEFAULT_PROFILE.to_string(),
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    fn request_url(&self, waypoints: &[Waypoint]) -> String {
        let coords = waypoints
            .iter()
            .map(|wp| format!("{:.6},{:.6}", wp.point.lon, wp.point.lat))
            .collect::<Vec<_>>()
            .join(";");
        format!(
            "{}/route/v1/{}/{}?overview=full&geometries=geojson",
            self.base_url, self.profile, coords
        )
    }
}

fn route_from_response(response: OsrmResponse) -> Result<Route, PlanError> {
    match response.code.as_str() {
        "Ok" => {}
        // NoRoute means the stops cannot be connected on the road network
        "NoRoute" => return Err(PlanError::RouteNotFound),
        code => return Err(PlanError::Network(format!("osrm error code {code}"))),
    }
    let Some(route) = response.routes.into_iter().next() else {
        return Err(PlanError::RouteNotFound);
    };
    let points: Vec<GeoPoint> = route
        .geometry
        .coordinates
        .iter()
        .map(|[lon, lat]| GeoPoint::new(*lat, *lon))
        .collect();
    if points.len() < 2 {
        return Err(PlanError::RouteNotFound);
    }
    Ok(Route {
        points,
        total_distance_m: Some(route.distance),
        total_duration_s: Some(route.duration),
    })
}

#[async_trait]
impl RoutePlanner for OsrmPlanner {
    async fn plan(&self, waypoints: &[Waypoint]) -> Result<Route, PlanError> {
        if waypoints.len() < 2 {
            return Err(PlanError::RouteNotFound);
        }
        let url = self.request_url(waypoints);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| PlanError::Network(err.to_string()))?;

        // OSRM reports routing failures as 400s with a JSON code; decode the
        // body either way and let the code decide.
        let body: OsrmResponse = response
            .json()
            .await
            .map_err(|err| PlanError::Network(err.to_string()))?;
        route_from_response(body)
    }
}
