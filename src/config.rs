use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::vehicle::Waypoint;

pub trait LoadConfig {
    fn load_config(service_name: &str) -> Result<Self, ConfigError>
    where
        Self: Sized + serde::de::DeserializeOwned,
    {
        // Try development path first
        let dev_path = PathBuf::from("config");
        let prod_path = PathBuf::from("/etc/roadmesh");

        let config_dir = if dev_path.join(format!("{}.toml", service_name)).exists() {
            dev_path
        } else {
            prod_path
        };

        let config = Config::builder()
            .add_source(File::from(config_dir.join("base.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", service_name))).required(false))
            // Environment variables override, e.g. ROADMESH_MISSION__TICK_INTERVAL_MS
            .add_source(
                Environment::with_prefix("ROADMESH")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoadmeshConfig {
    pub log_level: String,
    /// Directory for daily-rolling process logs; stdout only when unset.
    pub log_dir: Option<PathBuf>,
    pub paths: PathsConfig,
    pub mission: MissionConfig,
    pub recon: ReconConfig,
    pub power: PowerConfig,
    pub safety: SafetyConfig,
    pub decision: DecisionConfig,
    pub logs: LogsConfig,
    pub web: WebConfig,
}

impl Default for RoadmeshConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            paths: PathsConfig::default(),
            mission: MissionConfig::default(),
            recon: ReconConfig::default(),
            power: PowerConfig::default(),
            safety: SafetyConfig::default(),
            decision: DecisionConfig::default(),
            logs: LogsConfig::default(),
            web: WebConfig::default(),
        }
    }
}

impl LoadConfig for RoadmeshConfig {}

impl RoadmeshConfig {
    pub fn load() -> Result<Self> {
        let config = Self::load_config("vehicle")?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration rooted at `data_dir`; used by tests and tools.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.paths.data_dir = data_dir.into();
        config
    }

    pub fn validate(&self) -> Result<()> {
        let mission = &self.mission;
        if !(mission.speed_per_tick > 0.0 && mission.speed_per_tick.is_finite()) {
            bail!("mission.speed_per_tick must be positive, got {}", mission.speed_per_tick);
        }
        if mission.tick_interval_ms == 0 {
            bail!("mission.tick_interval_ms must be positive");
        }
        if mission.battery_drain_per_tick < 0.0 {
            bail!("mission.battery_drain_per_tick must not be negative");
        }
        if mission.default_route.is_empty() {
            bail!("mission.default_route must contain at least one waypoint");
        }
        if !(0.0 <= mission.detour_offset_min && mission.detour_offset_min <= mission.detour_offset_max)
        {
            bail!(
                "mission detour offsets must satisfy 0 <= min <= max, got {}..{}",
                mission.detour_offset_min,
                mission.detour_offset_max
            );
        }
        for (name, p) in [
            ("recon.transit_scan_probability", self.recon.transit_scan_probability),
            ("recon.hazard_probability", self.recon.hazard_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                bail!("{} must be within [0, 1], got {}", name, p);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub status_file: String,
    pub log_file: String,
    pub command_file: String,
    pub recon_file: String,
    pub recon_log: String,
    /// Optional JSON sensor feed; nominal readings when unset.
    pub sensors_file: Option<String>,
    /// Latest camera frame served by the dashboard, written by the camera.
    pub snapshot_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            status_file: "vehicle_status.json".to_string(),
            log_file: "vehicle_logs.txt".to_string(),
            command_file: "vehicle_commands.json".to_string(),
            recon_file: "recon_data.json".to_string(),
            recon_log: "recon_log.txt".to_string(),
            sensors_file: None,
            snapshot_file: "latest_image.jpg".to_string(),
        }
    }
}

impl PathsConfig {
    fn resolve(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    pub fn status_path(&self) -> PathBuf {
        self.resolve(&self.status_file)
    }

    pub fn log_path(&self) -> PathBuf {
        self.resolve(&self.log_file)
    }

    pub fn command_path(&self) -> PathBuf {
        self.resolve(&self.command_file)
    }

    pub fn recon_path(&self) -> PathBuf {
        self.resolve(&self.recon_file)
    }

    pub fn recon_log_path(&self) -> PathBuf {
        self.resolve(&self.recon_log)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.resolve(&self.snapshot_file)
    }

    pub fn sensors_path(&self) -> Option<PathBuf> {
        self.sensors_file.as_deref().map(|name| self.resolve(name))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    pub tick_interval_ms: u64,
    /// Step size in coordinate degrees.
    pub speed_per_tick: f64,
    pub battery_drain_per_tick: f64,
    pub default_route: Vec<Waypoint>,
    pub hazard_window: usize,
    pub detour_offset_min: f64,
    pub detour_offset_max: f64,
    pub seed: Option<u64>,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 2000,
            speed_per_tick: 0.001,
            battery_drain_per_tick: 0.01,
            default_route: vec![
                Waypoint::new(37.7749, -122.4194), // San Francisco
                Waypoint::new(37.8044, -122.2711), // Oakland
                Waypoint::new(37.6879, -122.4702), // Daly City
                Waypoint::new(37.4419, -122.1430), // Palo Alto
            ],
            hazard_window: 10,
            detour_offset_min: 0.01,
            detour_offset_max: 0.05,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    pub transit_scan_probability: f64,
    pub hazard_probability: f64,
    pub retained_records: usize,
    pub seed: Option<u64>,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            transit_scan_probability: 0.1,
            hazard_probability: 0.4,
            retained_records: 500,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub low_power_threshold: f64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            low_power_threshold: 20.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub max_temperature: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_temperature: 60.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
    pub history_limit: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 600,
            history_limit: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Size bound for the event and recon text logs; 0 disables rotation.
    pub max_bytes: u64,
    /// Lines served by the log tail endpoint.
    pub tail_lines: usize,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024,
            tail_lines: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Shared secret expected in `X-API-Key` on write routes.
    pub api_key: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 3000,
            api_key: None,
        }
    }
}
