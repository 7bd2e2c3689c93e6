use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::track_store::MAX_LOOKBACK_DAYS;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub tracks: TrackConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub geocoder: GeocoderConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory where log files will be stored
    pub directory: String,
    /// Log file name prefix (date will be appended)
    pub file_prefix: String,
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: "./logs".to_string(),
            file_prefix: "dredge_tracker".to_string(),
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub connection: DatabaseConnectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database_name: String,
    pub connect_timeout_seconds: u64,
    pub read_timeout_seconds: u64,
    pub write_timeout_seconds: u64,
}

impl Default for DatabaseConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            username: "dredge".to_string(),
            password: "dredge".to_string(),
            database_name: "dredge_tracker".to_string(),
            connect_timeout_seconds: 10,
            read_timeout_seconds: 30,
            write_timeout_seconds: 30,
        }
    }
}

impl DatabaseConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_seconds)
    }
}

/// Retention profiles for the per-vessel track history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionProfile {
    /// 100 points, enough to cover about a day at a five minute poll
    #[default]
    Short,
    /// 5000 points
    Long,
}

impl RetentionProfile {
    pub fn max_points(&self) -> usize {
        match self {
            RetentionProfile::Short => 100,
            RetentionProfile::Long => 5000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    pub retention: RetentionProfile,
    /// Overrides the profile when set
    pub max_points_per_vessel: Option<usize>,
}

impl TrackConfig {
    pub fn max_points_per_vessel(&self) -> usize {
        self.max_points_per_vessel.unwrap_or_else(|| self.retention.max_points())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Fleet position endpoint. Empty falls back to the FLEET_API_URL environment variable.
    pub url: String,
    pub timeout_seconds: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_seconds: 30,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn resolved_url(&self) -> Option<String> {
        if !self.url.trim().is_empty() {
            return Some(self.url.trim().to_string());
        }
        std::env::var("FLEET_API_URL").ok().filter(|u| !u.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    /// CSV of known places (lat, lon, name, admin1, cc, country, continent)
    pub places_file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierMode {
    /// Derived speeds over the fine time series
    #[default]
    Fine,
    /// Averaged reported speeds over the most recent samples
    Coarse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub mode: ClassifierMode,
    pub offline_hours: u32,
    pub stationary_window_hours: u32,
    pub drift_meters: f64,
    pub fallback_min_gap_hours: u32,
    pub max_plausible_speed_ms: f64,
    pub median_sample_count: usize,
    pub moored_below_ms: f64,
    pub working_up_to_ms: f64,
    pub coarse_sample_count: usize,
    pub coarse_moored_below_ms: f64,
    pub coarse_working_up_to_ms: f64,
    pub lookback_days: u32,
    pub max_points: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            mode: ClassifierMode::Fine,
            offline_hours: 2,
            stationary_window_hours: 2,
            drift_meters: 80.0,
            fallback_min_gap_hours: 2,
            max_plausible_speed_ms: 15.0,
            median_sample_count: 24,
            moored_below_ms: 0.3,
            working_up_to_ms: 3.0,
            coarse_sample_count: 24,
            coarse_moored_below_ms: 0.5,
            coarse_working_up_to_ms: 4.0,
            lookback_days: 3,
            max_points: 2000,
        }
    }
}

impl ClassifierConfig {
    pub fn offline_threshold(&self) -> chrono::Duration {
        chrono::Duration::hours(self.offline_hours as i64)
    }

    pub fn stationary_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.stationary_window_hours as i64)
    }

    pub fn fallback_min_gap(&self) -> chrono::Duration {
        chrono::Duration::hours(self.fallback_min_gap_hours as i64)
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::days(self.lookback_days as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub ingestion_interval_seconds: u64,
    pub classification_interval_seconds: u64,
    pub metrics_interval_seconds: u64,
    pub db_health_check_seconds: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            ingestion_interval_seconds: 300,
            classification_interval_seconds: 300,
            metrics_interval_seconds: 3600,
            db_health_check_seconds: 60,
        }
    }
}

impl ScheduleConfig {
    pub fn ingestion_interval(&self) -> Duration {
        Duration::from_secs(self.ingestion_interval_seconds)
    }

    pub fn classification_interval(&self) -> Duration {
        Duration::from_secs(self.classification_interval_seconds)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_seconds)
    }

    pub fn db_health_check_interval(&self) -> Duration {
        Duration::from_secs(self.db_health_check_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub port: u16,
    pub active_threshold_hours: u32,
    pub static_dir: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
            active_threshold_hours: 24,
            static_dir: "static".to_string(),
        }
    }
}

impl WebConfig {
    pub fn active_threshold(&self) -> chrono::Duration {
        chrono::Duration::hours(self.active_threshold_hours as i64)
    }
}

impl Config {
    /// Load configuration from a JSON file and validate it
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject threshold combinations that can never classify correctly
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.classifier;
        if self.tracks.max_points_per_vessel() == 0 {
            return Err(invalid("tracks.max_points_per_vessel must be at least 1"));
        }
        if c.offline_hours == 0 || c.stationary_window_hours == 0 {
            return Err(invalid("classifier offline and stationary windows must be positive"));
        }
        if !(c.drift_meters > 0.0) {
            return Err(invalid("classifier.drift_meters must be positive"));
        }
        if !(c.moored_below_ms > 0.0 && c.moored_below_ms < c.working_up_to_ms) {
            return Err(invalid("classifier speed bands must satisfy 0 < moored_below_ms < working_up_to_ms"));
        }
        if !(c.coarse_moored_below_ms > 0.0 && c.coarse_moored_below_ms < c.coarse_working_up_to_ms) {
            return Err(invalid(
                "classifier coarse bands must satisfy 0 < coarse_moored_below_ms < coarse_working_up_to_ms",
            ));
        }
        if !(c.max_plausible_speed_ms > c.working_up_to_ms) {
            return Err(invalid("classifier.max_plausible_speed_ms must exceed working_up_to_ms"));
        }
        if c.median_sample_count == 0 || c.coarse_sample_count == 0 || c.max_points < 2 {
            return Err(invalid("classifier sample counts must be positive and max_points at least 2"));
        }
        if c.lookback_days == 0 || c.lookback_days > MAX_LOOKBACK_DAYS {
            return Err(ConfigError::Invalid(format!(
                "classifier.lookback_days must be between 1 and {}",
                MAX_LOOKBACK_DAYS
            )));
        }
        let max_hours = MAX_LOOKBACK_DAYS * 24;
        if [c.offline_hours, c.stationary_window_hours, c.fallback_min_gap_hours]
            .iter()
            .any(|h| *h > max_hours)
        {
            return Err(ConfigError::Invalid(format!(
                "classifier hour windows must not exceed {} hours",
                max_hours
            )));
        }
        let s = &self.schedule;
        if s.ingestion_interval_seconds == 0 || s.classification_interval_seconds == 0 || s.metrics_interval_seconds == 0 {
            return Err(invalid("schedule intervals must be positive"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}
