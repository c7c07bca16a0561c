//! Process configuration from `HBOOKING_*` environment variables.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use serde::Deserialize;

use crate::model::{WorkshopId, WorkshopSchedule};
use crate::time;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {name}={value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("reading schedules from {path}: {source}")]
    SchedulesIo {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing schedules from {path}: {source}")]
    SchedulesJson {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("schedule of workshop {workshop_id}: {reason}")]
    Schedule {
        workshop_id: WorkshopId,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub handler_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub metrics_port: Option<u16>,
    pub schedules_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            handler_timeout: Duration::from_millis(6000),
            shutdown_timeout: Duration::from_millis(10_000),
            metrics_port: None,
            schedules_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; unset names keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if let Some(v) = lookup("HBOOKING_BIND") {
            config.bind = v;
        }
        if let Some(v) = lookup("HBOOKING_PORT") {
            config.port = parse("HBOOKING_PORT", v)?;
        }
        if let Some(v) = lookup("HBOOKING_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("HBOOKING_HANDLER_TIMEOUT_MS") {
            config.handler_timeout = Duration::from_millis(parse("HBOOKING_HANDLER_TIMEOUT_MS", v)?);
        }
        if let Some(v) = lookup("HBOOKING_SHUTDOWN_TIMEOUT_MS") {
            config.shutdown_timeout = Duration::from_millis(parse("HBOOKING_SHUTDOWN_TIMEOUT_MS", v)?);
        }
        if let Some(v) = lookup("HBOOKING_METRICS_PORT") {
            config.metrics_port = Some(parse("HBOOKING_METRICS_PORT", v)?);
        }
        if let Some(v) = lookup("HBOOKING_SCHEDULES_FILE") {
            config.schedules_file = Some(PathBuf::from(v));
        }

        let addr = config.listen_addr();
        addr.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
            name: "HBOOKING_BIND",
            value: config.bind.clone(),
            reason: e.to_string(),
        })?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("hbooking.wal")
    }
}

fn parse<T>(name: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
        value,
    })
}

/// One entry of the schedules seed file.
#[derive(Debug, Deserialize)]
struct ScheduleSeed {
    workshop_id: WorkshopId,
    timezone: String,
    /// `HH:MM`
    begin_at: String,
    /// `HH:MM`
    end_at: String,
}

/// Load a JSON array of schedules, e.g.
/// `[{"workshop_id": 1, "timezone": "UTC", "begin_at": "09:00", "end_at": "17:00"}]`.
pub fn load_schedules(path: &Path) -> Result<Vec<WorkshopSchedule>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::SchedulesIo {
        path: path.to_path_buf(),
        source,
    })?;
    parse_schedules(&text).map_err(|e| match e {
        SeedError::Json(source) => ConfigError::SchedulesJson {
            path: path.to_path_buf(),
            source,
        },
        SeedError::Config(e) => e,
    })
}

#[derive(Debug)]
enum SeedError {
    Json(serde_json::Error),
    Config(ConfigError),
}

fn parse_schedules(text: &str) -> Result<Vec<WorkshopSchedule>, SeedError> {
    let seeds: Vec<ScheduleSeed> = serde_json::from_str(text).map_err(SeedError::Json)?;
    seeds
        .into_iter()
        .map(|seed| {
            let invalid = |reason: String| {
                SeedError::Config(ConfigError::Schedule {
                    workshop_id: seed.workshop_id,
                    reason,
                })
            };
            time::parse_timezone(&seed.timezone).map_err(|e| invalid(e.to_string()))?;
            let begin = NaiveTime::parse_from_str(&seed.begin_at, "%H:%M")
                .map_err(|e| invalid(format!("begin_at {:?}: {e}", seed.begin_at)))?;
            let end = NaiveTime::parse_from_str(&seed.end_at, "%H:%M")
                .map_err(|e| invalid(format!("end_at {:?}: {e}", seed.end_at)))?;
            Ok(WorkshopSchedule {
                workshop_id: seed.workshop_id,
                timezone: seed.timezone,
                begin,
                end,
            })
        })
        .collect()
}
