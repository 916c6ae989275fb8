//! Journey configuration from environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct JourneyConfig {
    /// Radius of the auto-derived zone around each checkpoint.
    pub checkpoint_radius_m: f64,
    /// How long the vehicle dwells at a checkpoint.
    pub checkpoint_dwell_ms: u64,
    /// Total planning attempts before a network failure becomes fatal.
    pub plan_attempts: u32,
    pub plan_backoff_base: Duration,
    pub plan_backoff_max: Duration,
}

impl Default for JourneyConfig {
    fn default() -> Self {
        Self {
            checkpoint_radius_m: 50.0,
            checkpoint_dwell_ms: 10_000,
            plan_attempts: 3,
            plan_backoff_base: Duration::from_millis(500),
            plan_backoff_max: Duration::from_secs(8),
        }
    }
}

impl JourneyConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            checkpoint_radius_m: env_parse(
                "FLEET_CHECKPOINT_RADIUS_M",
                defaults.checkpoint_radius_m,
            ),
            checkpoint_dwell_ms: env_parse("FLEET_CHECKPOINT_DWELL_MS", defaults.checkpoint_dwell_ms),
            plan_attempts: env_parse("FLEET_PLAN_ATTEMPTS", defaults.plan_attempts).max(1),
            plan_backoff_base: Duration::from_millis(env_parse(
                "FLEET_PLAN_BACKOFF_BASE_MS",
                defaults.plan_backoff_base.as_millis() as u64,
            )),
            plan_backoff_max: Duration::from_millis(env_parse(
                "FLEET_PLAN_BACKOFF_MAX_MS",
                defaults.plan_backoff_max.as_millis() as u64,
            )),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
