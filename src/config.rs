use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::keys::{FORGETTING_CURVE_TTL, MASTERY_TTL};
use crate::services::mastery::{DEFAULT_EVENT_CAP, DEFAULT_SMOOTHING_ALPHA, DEFAULT_WINDOW_DAYS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub log_level: String,
    pub db_path: Option<PathBuf>,
    pub mastery_window_days: i64,
    pub mastery_event_cap: usize,
    pub retention_window_days: i64,
    pub mastery_cache_ttl: Duration,
    pub curve_cache_ttl: Duration,
    pub smoothing_alpha: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: None,
            mastery_window_days: DEFAULT_WINDOW_DAYS,
            mastery_event_cap: DEFAULT_EVENT_CAP,
            retention_window_days: DEFAULT_WINDOW_DAYS,
            mastery_cache_ttl: MASTERY_TTL,
            curve_cache_ttl: FORGETTING_CURVE_TTL,
            smoothing_alpha: DEFAULT_SMOOTHING_ALPHA,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.trim().parse::<T>().ok())
}

impl Config {
    /// Load `.env` (if present) and then read the environment.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();

        let log_level = std::env::var("RUST_LOG").unwrap_or(defaults.log_level);

        let db_path = std::env::var("SCHEDULER_DB_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        let mastery_window_days = env_parse::<i64>("MASTERY_WINDOW_DAYS")
            .filter(|days| *days > 0)
            .unwrap_or(defaults.mastery_window_days);

        let mastery_event_cap = env_parse::<usize>("MASTERY_EVENT_CAP")
            .filter(|cap| *cap > 0)
            .unwrap_or(defaults.mastery_event_cap);

        let retention_window_days = env_parse::<i64>("RETENTION_WINDOW_DAYS")
            .filter(|days| *days > 0)
            .unwrap_or(defaults.retention_window_days);

        let mastery_cache_ttl = env_parse::<u64>("MASTERY_CACHE_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.mastery_cache_ttl);

        let curve_cache_ttl = env_parse::<u64>("CURVE_CACHE_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.curve_cache_ttl);

        let smoothing_alpha = env_parse::<f64>("MASTERY_SMOOTHING_ALPHA")
            .filter(|alpha| alpha.is_finite() && *alpha > 0.0)
            .map(|alpha| alpha.min(1.0))
            .unwrap_or(defaults.smoothing_alpha);

        Self {
            log_level,
            db_path,
            mastery_window_days,
            mastery_event_cap,
            retention_window_days,
            mastery_cache_ttl,
            curve_cache_ttl,
            smoothing_alpha,
        }
    }
}
