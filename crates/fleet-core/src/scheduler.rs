//! Tick-driven motion state machine.
//!
//! The scheduler recomputes its position from elapsed wall-clock time on
//! every tick instead of accumulating per-tick deltas, so position is a pure
//! function of elapsed time and configuration and cannot drift with tick
//! cadence. Pause/resume is a deadline comparison evaluated on subsequent
//! ticks; there is no timer thread to race with cancellation.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::geo::{self, lerp};
use crate::models::{
    GeoPoint, MotionState, MotionStatus, Route, RouteMatchError, Waypoint, WaypointKind, Zone,
    ZoneEffect,
};
use crate::zones::zones_within;

/// Tolerance for matching waypoints against the routed polyline.
pub const ROUTE_MATCH_EPSILON_M: f64 = 30.0;

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("route needs at least 2 points, got {0}")]
    RouteTooShort(usize),
    #[error("speed must be positive, got {0}")]
    InvalidSpeed(f64),
    #[error(transparent)]
    RouteMatch(#[from] RouteMatchError),
    #[error("no reroute is pending")]
    NoPendingReroute,
}

/// Event emitted by the scheduler during a tick, in generation order.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionEvent {
    /// An intermediate stop's polyline position was crossed.
    CheckpointReached { waypoint_index: usize },
    PauseStarted {
        zone_id: String,
        resume_at: DateTime<Utc>,
    },
    Resumed,
    /// The vehicle is buffered at `from`; ticks are ignored until a new
    /// route is supplied.
    RerouteRequested { zone_id: String, from: GeoPoint },
    Completed,
}

/// Polyline boundary at which an intermediate waypoint counts as reached.
#[derive(Debug, Clone, Copy)]
struct CheckpointMark {
    boundary: usize,
    waypoint_index: usize,
}

/// Advances a simulated position along a routed polyline.
///
/// `tick` takes `&mut self`, so overlapping ticks are unrepresentable; the
/// single tick source required by the concurrency model is enforced by the
/// borrow checker rather than a lock.
pub struct MotionScheduler {
    route: Route,
    speed_mps: f64,
    zones: Vec<Zone>,
    checkpoint_marks: Vec<CheckpointMark>,
    next_mark: usize,
    state: MotionState,
    segment_started_at: DateTime<Utc>,
    paused_until: Option<DateTime<Utc>>,
    awaiting_route: bool,
    fired_zones: HashSet<String>,
}

impl MotionScheduler {
    pub fn new(zones: Vec<Zone>) -> Self {
        Self {
            route: Route::new(Vec::new()),
            speed_mps: 0.0,
            zones,
            checkpoint_marks: Vec::new(),
            next_mark: 0,
            state: MotionState {
                position: GeoPoint::new(0.0, 0.0),
                segment_index: 0,
                segment_progress: 0.0,
                status: MotionStatus::Idle,
            },
            segment_started_at: DateTime::<Utc>::MIN_UTC,
            paused_until: None,
            awaiting_route: false,
            fired_zones: HashSet::new(),
        }
    }

    /// Arm the scheduler with a route and begin running at `now`.
    pub fn start(
        &mut self,
        route: Route,
        waypoints: &[Waypoint],
        speed_mps: f64,
        now: DateTime<Utc>,
    ) -> Result<(), MotionError> {
        if matches!(
            self.state.status,
            MotionStatus::Running | MotionStatus::Paused
        ) {
            return Err(MotionError::AlreadyRunning);
        }
        if speed_mps <= 0.0 {
            return Err(MotionError::InvalidSpeed(speed_mps));
        }
        let marks = checkpoint_marks(&route, waypoints)?;

        self.state = MotionState {
            position: route.points[0],
            segment_index: 0,
            segment_progress: 0.0,
            status: MotionStatus::Running,
        };
        self.route = route;
        self.speed_mps = speed_mps;
        self.checkpoint_marks = marks;
        self.next_mark = 0;
        self.segment_started_at = now;
        self.paused_until = None;
        self.awaiting_route = false;
        self.fired_zones.clear();
        Ok(())
    }

    /// Advance the simulation to `now` and return any events it produced.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<MotionEvent> {
        match self.state.status {
            MotionStatus::Paused => self.tick_paused(now),
            MotionStatus::Running if self.awaiting_route => Vec::new(),
            MotionStatus::Running => self.advance(now),
            _ => Vec::new(),
        }
    }

    /// Re-arm with a fresh route after a reroute request.
    ///
    /// `waypoints` is the remaining itinerary: an origin at the buffered
    /// position plus every stop not yet visited.
    pub fn supply_route(
        &mut self,
        route: Route,
        waypoints: &[Waypoint],
        now: DateTime<Utc>,
    ) -> Result<(), MotionError> {
        if self.state.status != MotionStatus::Running || !self.awaiting_route {
            return Err(MotionError::NoPendingReroute);
        }
        let marks = checkpoint_marks(&route, waypoints)?;

        self.state.position = route.points[0];
        self.state.segment_index = 0;
        self.state.segment_progress = 0.0;
        self.route = route;
        self.checkpoint_marks = marks;
        self.next_mark = 0;
        self.segment_started_at = now;
        self.awaiting_route = false;
        Ok(())
    }

    /// Stop immediately. Position freezes at its last value and any pending
    /// resume deadline is dropped. No-op unless Running or Paused.
    pub fn cancel(&mut self) {
        if matches!(
            self.state.status,
            MotionStatus::Running | MotionStatus::Paused
        ) {
            self.state.status = MotionStatus::Cancelled;
            self.paused_until = None;
            self.awaiting_route = false;
        }
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn status(&self) -> MotionStatus {
        self.state.status
    }

    pub fn position(&self) -> GeoPoint {
        self.state.position
    }

    pub fn awaiting_route(&self) -> bool {
        self.awaiting_route
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    fn tick_paused(&mut self, now: DateTime<Utc>) -> Vec<MotionEvent> {
        match self.paused_until {
            Some(deadline) if now >= deadline => {
                self.paused_until = None;
                self.state.status = MotionStatus::Running;
                // travel time for the interrupted segment restarts cleanly
                self.segment_started_at = now;
                vec![MotionEvent::Resumed]
            }
            _ => Vec::new(),
        }
    }

    fn advance(&mut self, now: DateTime<Utc>) -> Vec<MotionEvent> {
        let i = self.state.segment_index;
        debug_assert!(
            i + 1 < self.route.points.len(),
            "segment index {i} out of range for {} route points",
            self.route.points.len()
        );
        let seg_start = self.route.points[i];
        let seg_end = self.route.points[i + 1];

        let step_factor = self.step_factor(seg_start, seg_end, now);
        self.state.position = lerp(seg_start, seg_end, step_factor);
        self.state.segment_progress = step_factor;
        if step_factor < 1.0 {
            return Vec::new();
        }

        // land exactly on the vertex; lerp can be off in the last ulp
        self.state.position = seg_end;
        self.state.segment_index += 1;
        self.state.segment_progress = 0.0;
        self.segment_started_at = now;

        let mut events = Vec::new();
        let boundary = self.state.segment_index;
        while let Some(mark) = self.checkpoint_marks.get(self.next_mark) {
            if mark.boundary > boundary {
                break;
            }
            events.push(MotionEvent::CheckpointReached {
                waypoint_index: mark.waypoint_index,
            });
            self.next_mark += 1;
        }

        if boundary + 1 >= self.route.points.len() {
            self.state.status = MotionStatus::Completed;
            events.push(MotionEvent::Completed);
            return events;
        }

        self.apply_zone_effect(now, &mut events);
        events
    }

    /// Fraction of the current segment covered at `now`, clamped to [0, 1].
    ///
    /// Clamping means a late tick (host process stalled, long pause) lands
    /// exactly on the segment end instead of overshooting past it.
    fn step_factor(&self, seg_start: GeoPoint, seg_end: GeoPoint, now: DateTime<Utc>) -> f64 {
        let distance_m = geo::distance_m(seg_start, seg_end);
        if distance_m <= f64::EPSILON {
            return 1.0;
        }
        let travel_ms = distance_m / self.speed_mps * 1000.0;
        let elapsed_ms = (now - self.segment_started_at).num_milliseconds().max(0) as f64;
        (elapsed_ms / travel_ms).clamp(0.0, 1.0)
    }

    fn apply_zone_effect(&mut self, now: DateTime<Utc>, events: &mut Vec<MotionEvent>) {
        // Each zone fires at most once per route run; a dwell pause inside a
        // wide zone must not re-trigger on the next boundary.
        let hit = zones_within(self.state.position, &self.zones)
            .into_iter()
            .find(|zone| !self.fired_zones.contains(&zone.id))
            .cloned();

        let Some(zone) = hit else {
            return;
        };
        self.fired_zones.insert(zone.id.clone());
        match zone.effect {
            ZoneEffect::Pause { dwell_ms } => {
                let resume_at = now + Duration::milliseconds(dwell_ms as i64);
                self.state.status = MotionStatus::Paused;
                self.paused_until = Some(resume_at);
                events.push(MotionEvent::PauseStarted {
                    zone_id: zone.id,
                    resume_at,
                });
            }
            ZoneEffect::Reroute => {
                self.awaiting_route = true;
                events.push(MotionEvent::RerouteRequested {
                    zone_id: zone.id,
                    from: self.state.position,
                });
            }
        }
    }
}

fn checkpoint_marks(
    route: &Route,
    waypoints: &[Waypoint],
) -> Result<Vec<CheckpointMark>, MotionError> {
    if route.points.len() < 2 {
        return Err(MotionError::RouteTooShort(route.points.len()));
    }
    let indices = route.waypoint_indices(waypoints, ROUTE_MATCH_EPSILON_M)?;
    Ok(waypoints
        .iter()
        .zip(indices)
        .enumerate()
        .filter(|(_, (waypoint, _))| waypoint.kind == WaypointKind::Checkpoint)
        .map(|(waypoint_index, (_, segment))| CheckpointMark {
            // reached when the boundary after its segment is crossed
            boundary: segment + 1,
            waypoint_index,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // One degree of latitude at the equator is ~111.19km, so 0.001 degrees
    // is ~111.19m: at 80 m/s a segment takes ~1390ms.
    const SEGMENT_MS: i64 = 1390;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap()
    }

    fn at(offset_ms: i64) -> DateTime<Utc> {
        t0() + Duration::milliseconds(offset_ms)
    }

    fn p(lat: f64) -> GeoPoint {
        GeoPoint::new(lat, 0.0)
    }

    fn two_point_route() -> Route {
        Route::new(vec![p(0.0), p(0.001)])
    }

    fn three_point_route() -> Route {
        Route::new(vec![p(0.0), p(0.001), p(0.002)])
    }

    fn terminals(route: &Route) -> Vec<Waypoint> {
        let first = route.points[0];
        let last = *route.points.last().unwrap();
        vec![
            Waypoint {
                point: first,
                kind: WaypointKind::Origin,
            },
            Waypoint {
                point: last,
                kind: WaypointKind::Destination,
            },
        ]
    }

    fn pause_zone(center: GeoPoint, dwell_ms: u64) -> Zone {
        Zone {
            id: "hazard-0".to_string(),
            center,
            radius_m: 50.0,
            effect: ZoneEffect::Pause { dwell_ms },
        }
    }

    fn reroute_zone(center: GeoPoint) -> Zone {
        Zone {
            id: "hazard-0".to_string(),
            center,
            radius_m: 50.0,
            effect: ZoneEffect::Reroute,
        }
    }

    fn started(zones: Vec<Zone>, route: Route) -> MotionScheduler {
        let waypoints = terminals(&route);
        let mut scheduler = MotionScheduler::new(zones);
        scheduler.start(route, &waypoints, 80.0, t0()).unwrap();
        scheduler
    }

    #[test]
    fn start_rejects_short_route() {
        let route = Route::new(vec![p(0.0)]);
        let mut scheduler = MotionScheduler::new(Vec::new());
        assert!(matches!(
            scheduler.start(route, &[], 80.0, t0()),
            Err(MotionError::RouteTooShort(1))
        ));
    }

    #[test]
    fn start_rejects_non_positive_speed() {
        let route = two_point_route();
        let waypoints = terminals(&route);
        let mut scheduler = MotionScheduler::new(Vec::new());
        assert!(matches!(
            scheduler.start(route, &waypoints, 0.0, t0()),
            Err(MotionError::InvalidSpeed(_))
        ));
    }

    #[test]
    fn start_rejects_reentrant_call() {
        let mut scheduler = started(Vec::new(), two_point_route());
        let route = two_point_route();
        let waypoints = terminals(&route);
        assert!(matches!(
            scheduler.start(route, &waypoints, 80.0, at(10)),
            Err(MotionError::AlreadyRunning)
        ));
    }

    #[test]
    fn tick_interpolates_along_segment() {
        let mut scheduler = started(Vec::new(), two_point_route());

        let events = scheduler.tick(at(500));
        assert!(events.is_empty());
        let state = scheduler.state();
        assert_eq!(state.status, MotionStatus::Running);
        assert!(state.segment_progress > 0.3 && state.segment_progress < 0.4);
        assert!(state.position.lat > 0.0 && state.position.lat < 0.001);
    }

    #[test]
    fn position_is_recomputed_not_accumulated() {
        // Two schedulers ticked at different cadences land on the same
        // position for the same absolute timestamp.
        let mut coarse = started(Vec::new(), two_point_route());
        let mut fine = started(Vec::new(), two_point_route());

        for offset in (100..=1000).step_by(100) {
            fine.tick(at(offset));
        }
        coarse.tick(at(1000));

        let a = coarse.position();
        let b = fine.position();
        assert!((a.lat - b.lat).abs() < 1e-12);
        assert!((a.lon - b.lon).abs() < 1e-12);
    }

    #[test]
    fn arrival_timing_matches_speed() {
        // 111m at 80 m/s is ~1.39s of travel.
        let mut scheduler = started(Vec::new(), two_point_route());

        assert!(scheduler.tick(at(1300)).is_empty());
        assert_eq!(scheduler.status(), MotionStatus::Running);

        let events = scheduler.tick(at(1400));
        assert_eq!(events, vec![MotionEvent::Completed]);
        assert_eq!(scheduler.status(), MotionStatus::Completed);
        assert_eq!(scheduler.position(), p(0.001));
    }

    #[test]
    fn late_tick_clamps_to_segment_end() {
        // A tick long after the segment's travel time lands exactly on the
        // boundary, never beyond it.
        let mut scheduler = started(Vec::new(), three_point_route());

        let events = scheduler.tick(at(600_000));
        assert!(events.is_empty());
        let state = scheduler.state();
        assert_eq!(state.segment_index, 1);
        assert_eq!(state.position, p(0.001));
        assert_eq!(state.status, MotionStatus::Running);
    }

    #[test]
    fn segment_index_never_decreases() {
        let mut scheduler = started(Vec::new(), three_point_route());
        let mut last_index = 0;
        let mut offset = 0;
        while scheduler.status() == MotionStatus::Running {
            offset += 200;
            scheduler.tick(at(offset));
            let state = scheduler.state();
            assert!(state.segment_index >= last_index);
            assert!((0.0..=1.0).contains(&state.segment_progress));
            last_index = state.segment_index;
            assert!(offset < 60_000, "route never completed");
        }
        assert_eq!(scheduler.status(), MotionStatus::Completed);
    }

    #[test]
    fn zero_length_segment_completes_immediately() {
        let route = Route::new(vec![p(0.0), p(0.0), p(0.001)]);
        let waypoints = vec![Waypoint::origin(0.0, 0.0), Waypoint::destination(0.001, 0.0)];
        let mut scheduler = MotionScheduler::new(Vec::new());
        scheduler.start(route, &waypoints, 80.0, t0()).unwrap();

        scheduler.tick(at(1));
        assert_eq!(scheduler.state().segment_index, 1);
    }

    #[test]
    fn pause_zone_freezes_position_for_dwell() {
        let zone = pause_zone(p(0.001), 5000);
        let mut scheduler = started(vec![zone], three_point_route());

        let events = scheduler.tick(at(SEGMENT_MS + 10));
        assert!(matches!(
            events.as_slice(),
            [MotionEvent::PauseStarted { zone_id, .. }] if zone_id == "hazard-0"
        ));
        assert_eq!(scheduler.status(), MotionStatus::Paused);
        let paused_at = scheduler.position();

        // Inside the dwell window nothing moves and nothing fires.
        for offset in [2000, 3500, SEGMENT_MS + 10 + 4999] {
            assert!(scheduler.tick(at(offset)).is_empty());
            assert_eq!(scheduler.status(), MotionStatus::Paused);
            assert_eq!(scheduler.position(), paused_at);
        }

        // First tick at or past the deadline resumes.
        let events = scheduler.tick(at(SEGMENT_MS + 10 + 5000));
        assert_eq!(events, vec![MotionEvent::Resumed]);
        assert_eq!(scheduler.status(), MotionStatus::Running);

        // The interrupted segment's clock restarted at resume time.
        let events = scheduler.tick(at(SEGMENT_MS + 10 + 5000 + SEGMENT_MS + 10));
        assert_eq!(events, vec![MotionEvent::Completed]);
        assert_eq!(scheduler.position(), p(0.002));
    }

    #[test]
    fn pause_zone_fires_once() {
        // Wide zone covering both interior boundaries: after the dwell the
        // vehicle moves on instead of pausing again.
        let route = Route::new(vec![p(0.0), p(0.001), p(0.0012), p(0.002)]);
        let waypoints = vec![Waypoint::origin(0.0, 0.0), Waypoint::destination(0.002, 0.0)];
        let zone = Zone {
            id: "wide".to_string(),
            center: p(0.0011),
            radius_m: 200.0,
            effect: ZoneEffect::Pause { dwell_ms: 1000 },
        };
        let mut scheduler = MotionScheduler::new(vec![zone]);
        scheduler.start(route, &waypoints, 80.0, t0()).unwrap();

        let events = scheduler.tick(at(SEGMENT_MS + 10));
        assert!(matches!(
            events.as_slice(),
            [MotionEvent::PauseStarted { .. }]
        ));
        scheduler.tick(at(SEGMENT_MS + 10 + 1000)); // Resumed
        // Crossing the next boundary (0.0012) stays inside the zone but does
        // not pause again.
        let events = scheduler.tick(at(SEGMENT_MS + 10 + 1000 + 300));
        assert!(events.is_empty());
        assert_eq!(scheduler.state().segment_index, 2);
        assert_eq!(scheduler.status(), MotionStatus::Running);
    }

    #[test]
    fn checkpoint_mark_reports_itinerary_index() {
        let route = three_point_route();
        let waypoints = vec![
            Waypoint::origin(0.0, 0.0),
            Waypoint::checkpoint(0.001, 0.0),
            Waypoint::destination(0.002, 0.0),
        ];
        let mut scheduler = MotionScheduler::new(Vec::new());
        scheduler.start(route, &waypoints, 80.0, t0()).unwrap();

        let events = scheduler.tick(at(SEGMENT_MS + 10));
        assert_eq!(
            events,
            vec![MotionEvent::CheckpointReached { waypoint_index: 1 }]
        );
    }

    #[test]
    fn reroute_zone_buffers_until_new_route() {
        let zone = reroute_zone(p(0.001));
        let mut scheduler = started(vec![zone], three_point_route());

        let events = scheduler.tick(at(SEGMENT_MS + 10));
        assert!(matches!(
            events.as_slice(),
            [MotionEvent::RerouteRequested { from, .. }] if *from == p(0.001)
        ));
        assert!(scheduler.awaiting_route());
        assert_eq!(scheduler.status(), MotionStatus::Running);

        // Ticks while awaiting a route are ignored.
        assert!(scheduler.tick(at(10_000)).is_empty());
        assert_eq!(scheduler.position(), p(0.001));

        // New route re-arms at segment 0 from the buffered position.
        let new_route = Route::new(vec![p(0.001), p(0.0015), p(0.002)]);
        let remaining = vec![
            Waypoint::origin(0.001, 0.0),
            Waypoint::destination(0.002, 0.0),
        ];
        scheduler
            .supply_route(new_route, &remaining, at(10_000))
            .unwrap();
        assert!(!scheduler.awaiting_route());
        assert_eq!(scheduler.state().segment_index, 0);

        scheduler.tick(at(10_000 + 700)); // ~55m segment takes ~695ms
        assert_eq!(scheduler.state().segment_index, 1);
        let events = scheduler.tick(at(10_000 + 700 + 700));
        assert_eq!(events, vec![MotionEvent::Completed]);
    }

    #[test]
    fn supply_route_requires_pending_reroute() {
        let mut scheduler = started(Vec::new(), two_point_route());
        let route = two_point_route();
        let waypoints = terminals(&route);
        assert!(matches!(
            scheduler.supply_route(route, &waypoints, at(10)),
            Err(MotionError::NoPendingReroute)
        ));
    }

    #[test]
    fn cancel_is_immediate_and_final() {
        let mut scheduler = started(Vec::new(), two_point_route());
        scheduler.tick(at(500));
        let frozen = scheduler.position();

        scheduler.cancel();
        assert_eq!(scheduler.status(), MotionStatus::Cancelled);

        assert!(scheduler.tick(at(5000)).is_empty());
        assert_eq!(scheduler.position(), frozen);
    }

    #[test]
    fn cancel_while_paused_drops_resume_deadline() {
        let zone = pause_zone(p(0.001), 5000);
        let mut scheduler = started(vec![zone], three_point_route());
        scheduler.tick(at(SEGMENT_MS + 10));
        assert_eq!(scheduler.status(), MotionStatus::Paused);

        scheduler.cancel();
        assert_eq!(scheduler.status(), MotionStatus::Cancelled);

        // Well past the dwell deadline nothing resumes.
        assert!(scheduler.tick(at(60_000)).is_empty());
        assert_eq!(scheduler.status(), MotionStatus::Cancelled);
    }

    #[test]
    fn cancel_on_idle_is_noop() {
        let mut scheduler = MotionScheduler::new(Vec::new());
        scheduler.cancel();
        assert_eq!(scheduler.status(), MotionStatus::Idle);
    }
}
