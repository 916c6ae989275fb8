//! Journey orchestration.
//!
//! A `JourneyController` owns one simulation end-to-end: it requests the
//! route, derives checkpoint zones, drives the scheduler's ticks, replans on
//! reroute requests, and publishes lifecycle events to subscribers. One
//! controller per journey; nothing is shared between journeys.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{interval, sleep};
use uuid::Uuid;

use fleet_core::models::{
    GeoPoint, ItineraryError, JourneyEvent, JourneyEventKind, JourneyStatus, MotionState,
    MotionStatus, Route, RouteChangeReason, Waypoint, WaypointKind, Zone, validate_itinerary,
};
use fleet_core::scheduler::{MotionError, MotionEvent, MotionScheduler};
use fleet_core::zones::checkpoint_zones;

use crate::backoff::Backoff;
use crate::config::JourneyConfig;
use crate::planner::{PlanError, RoutePlanner};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum JourneyError {
    #[error("invalid itinerary: {0}")]
    InvalidItinerary(#[from] ItineraryError),
    #[error("speed must be positive, got {0}")]
    InvalidSpeed(f64),
    #[error("journey has already been started")]
    AlreadyStarted,
    #[error("route planning failed: {0}")]
    Planning(#[from] PlanError),
    #[error(transparent)]
    Motion(#[from] MotionError),
}

pub struct JourneyController {
    journey_id: String,
    planner: Arc<dyn RoutePlanner>,
    config: JourneyConfig,
    itinerary: Vec<Waypoint>,
    speed_mps: f64,
    scheduler: MotionScheduler,
    status: JourneyStatus,
    /// Index of the last visited waypoint (0 = origin).
    visited: usize,
    /// Value of `visited` when the active route was supplied; scheduler
    /// checkpoint indices are relative to the itinerary slice planned then.
    waypoint_base: usize,
    events_tx: broadcast::Sender<JourneyEvent>,
}

impl JourneyController {
    /// Create a journey over `itinerary` with caller-supplied hazard zones.
    ///
    /// Checkpoint zones are derived here, one per intermediate stop; hazard
    /// zones keep whatever per-zone effect the caller configured.
    pub fn new(
        planner: Arc<dyn RoutePlanner>,
        itinerary: Vec<Waypoint>,
        hazards: Vec<Zone>,
        speed_mps: f64,
        config: JourneyConfig,
    ) -> Result<Self, JourneyError> {
        validate_itinerary(&itinerary)?;
        if speed_mps <= 0.0 {
            return Err(JourneyError::InvalidSpeed(speed_mps));
        }

        let mut zones =
            checkpoint_zones(&itinerary, config.checkpoint_radius_m, config.checkpoint_dwell_ms);
        zones.extend(hazards);

        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            journey_id: Uuid::new_v4().to_string(),
            planner,
            config,
            itinerary,
            speed_mps,
            scheduler: MotionScheduler::new(zones),
            status: JourneyStatus::Idle,
            visited: 0,
            waypoint_base: 0,
            events_tx,
        })
    }

    pub fn journey_id(&self) -> &str {
        &self.journey_id
    }

    pub fn status(&self) -> JourneyStatus {
        self.status
    }

    /// Scheduler snapshot for rendering or persistence.
    pub fn motion_state(&self) -> MotionState {
        self.scheduler.state()
    }

    pub fn position(&self) -> GeoPoint {
        match self.scheduler.status() {
            MotionStatus::Idle => self.itinerary[0].point,
            _ => self.scheduler.position(),
        }
    }

    /// Subscribe to lifecycle events. Events arrive in generation order.
    pub fn subscribe(&self) -> broadcast::Receiver<JourneyEvent> {
        self.events_tx.subscribe()
    }

    /// Plan the route and begin running at `now`.
    pub async fn start(&mut self, now: DateTime<Utc>) -> Result<(), JourneyError> {
        if self.status != JourneyStatus::Idle {
            return Err(JourneyError::AlreadyStarted);
        }
        self.status = JourneyStatus::Planning;
        tracing::info!(journey_id = %self.journey_id, stops = self.itinerary.len(), "planning route");

        let route = match self.plan_with_retry(&self.itinerary).await {
            Ok(route) => route,
            Err(err) => {
                self.status = JourneyStatus::Failed;
                self.publish(
                    now,
                    JourneyEventKind::Failed {
                        reason: err.to_string(),
                    },
                );
                return Err(err.into());
            }
        };

        let points = route.points.len();
        if let Err(err) = self
            .scheduler
            .start(route, &self.itinerary, self.speed_mps, now)
        {
            self.status = JourneyStatus::Failed;
            self.publish(
                now,
                JourneyEventKind::Failed {
                    reason: err.to_string(),
                },
            );
            return Err(err.into());
        }

        self.status = JourneyStatus::Running;
        self.waypoint_base = 0;
        tracing::info!(journey_id = %self.journey_id, points, "journey running");
        self.publish(
            now,
            JourneyEventKind::RouteChanged {
                reason: RouteChangeReason::Initial,
                points,
            },
        );
        Ok(())
    }

    /// Advance the journey to `now`.
    ///
    /// Safe to call at any cadence; correctness does not depend on the tick
    /// interval. A reroute request is serviced inline, so this awaits the
    /// planner (with backoff) when one fires.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> JourneyStatus {
        if !matches!(self.status, JourneyStatus::Running | JourneyStatus::Paused) {
            return self.status;
        }

        let events = self.scheduler.tick(now);
        let state = self.scheduler.state();
        tracing::debug!(
            journey_id = %self.journey_id,
            lat = state.position.lat,
            lon = state.position.lon,
            segment = state.segment_index,
            progress = state.segment_progress,
            "tick"
        );

        for event in events {
            match event {
                MotionEvent::CheckpointReached { waypoint_index } => {
                    let index = self.waypoint_base + waypoint_index;
                    self.visited = self.visited.max(index);
                    tracing::info!(journey_id = %self.journey_id, index, "checkpoint reached");
                    self.publish(
                        now,
                        JourneyEventKind::CheckpointArrived {
                            waypoint_index: index,
                        },
                    );
                }
                MotionEvent::PauseStarted { zone_id, resume_at } => {
                    self.status = JourneyStatus::Paused;
                    tracing::info!(journey_id = %self.journey_id, %zone_id, %resume_at, "paused");
                    self.publish(now, JourneyEventKind::Paused { zone_id, resume_at });
                }
                MotionEvent::Resumed => {
                    self.status = JourneyStatus::Running;
                    tracing::info!(journey_id = %self.journey_id, "resumed");
                    self.publish(now, JourneyEventKind::Resumed);
                }
                MotionEvent::RerouteRequested { zone_id, from } => {
                    tracing::info!(journey_id = %self.journey_id, %zone_id, "reroute requested");
                    self.replan(from, now).await;
                }
                MotionEvent::Completed => {
                    self.status = JourneyStatus::Completed;
                    tracing::info!(journey_id = %self.journey_id, "destination reached");
                    self.publish(now, JourneyEventKind::Completed);
                }
            }
        }
        self.status
    }

    /// Drive the journey with a fixed-interval ticker until it reaches a
    /// terminal state or `shutdown` fires. Call after `start`.
    pub async fn run(
        mut self,
        tick_every: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JourneyStatus {
        if !matches!(self.status, JourneyStatus::Running | JourneyStatus::Paused) {
            return self.status;
        }
        let mut ticker = interval(tick_every);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(journey_id = %self.journey_id, "shutdown requested");
                    self.cancel(Utc::now());
                    break;
                }
                _ = ticker.tick() => {
                    let status = self.tick(Utc::now()).await;
                    if status.is_terminal() {
                        break;
                    }
                }
            }
        }
        self.status
    }

    /// Stop the journey. Idempotent once terminal.
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.scheduler.cancel();
        self.status = JourneyStatus::Cancelled;
        tracing::info!(journey_id = %self.journey_id, "journey cancelled");
        self.publish(now, JourneyEventKind::Cancelled);
    }

    async fn replan(&mut self, from: GeoPoint, now: DateTime<Utc>) {
        // New origin is the buffered position; keep every stop not yet
        // visited, destination included.
        let mut remaining = Vec::with_capacity(self.itinerary.len() - self.visited);
        remaining.push(Waypoint {
            point: from,
            kind: WaypointKind::Origin,
        });
        remaining.extend_from_slice(&self.itinerary[self.visited + 1..]);

        let route = match self.plan_with_retry(&remaining).await {
            Ok(route) => route,
            Err(err) => {
                self.fail(now, err.to_string());
                return;
            }
        };

        let points = route.points.len();
        match self.scheduler.supply_route(route, &remaining, now) {
            Ok(()) => {
                self.waypoint_base = self.visited;
                tracing::info!(journey_id = %self.journey_id, points, "rerouted");
                self.publish(
                    now,
                    JourneyEventKind::RouteChanged {
                        reason: RouteChangeReason::Reroute,
                        points,
                    },
                );
            }
            Err(err) => self.fail(now, err.to_string()),
        }
    }

    async fn plan_with_retry(&self, waypoints: &[Waypoint]) -> Result<Route, PlanError> {
        let mut backoff = Backoff::new(self.config.plan_backoff_base, self.config.plan_backoff_max);
        let mut attempt = 1u32;
        loop {
            match self.planner.plan(waypoints).await {
                Ok(route) => return Ok(route),
                Err(PlanError::RouteNotFound) => return Err(PlanError::RouteNotFound),
                Err(err @ PlanError::Network(_)) => {
                    if attempt >= self.config.plan_attempts {
                        return Err(err);
                    }
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        journey_id = %self.journey_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "route planning failed, retrying: {err}"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn fail(&mut self, now: DateTime<Utc>, reason: String) {
        self.scheduler.cancel();
        self.status = JourneyStatus::Failed;
        tracing::error!(journey_id = %self.journey_id, %reason, "journey failed");
        self.publish(now, JourneyEventKind::Failed { reason });
    }

    fn publish(&self, now: DateTime<Utc>, kind: JourneyEventKind) {
        let event = JourneyEvent {
            journey_id: self.journey_id.clone(),
            position: self.position(),
            timestamp: now,
            kind,
        };
        // a send error only means nobody is subscribed right now
        let _ = self.events_tx.send(event);
    }
}
