//! Reconnaissance scans.
//!
//! A scan samples synthetic environment readings at a location and may
//! detect a hazard. Scans are guaranteed when a waypoint is reached in
//! recon mode and intermittent while in transit. Every scan is appended to
//! the recon log and the recon data store before it is handed back, and a
//! `severe` hazard is surfaced through [`ReconRecord::severe_hazard`] so the
//! mission loop can pause in the same tick.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};
use tracing::{error, info};

use crate::config::ReconConfig;
use crate::storage::{EventLog, RecordStore};
use crate::vehicle::Waypoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HazardKind {
    Snow,
    Wind,
    Hurricane,
    Tornado,
    Tree,
    #[strum(serialize = "car crash")]
    CarCrash,
    Flood,
    Fire,
    Ice,
    Fog,
    Rockslide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Minor,
    Moderate,
    Severe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hazard {
    #[serde(rename = "type")]
    pub kind: HazardKind,
    pub location: Waypoint,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentReadings {
    pub temperature: f64,
    pub wind_speed: f64,
    pub humidity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconRecord {
    pub location: Waypoint,
    pub timestamp: DateTime<Utc>,
    pub detected: Vec<Hazard>,
    pub image: String,
    pub sensors: EnvironmentReadings,
}

impl ReconRecord {
    /// The first severe hazard of the scan, which must pause the vehicle.
    pub fn severe_hazard(&self) -> Option<&Hazard> {
        self.detected
            .iter()
            .find(|hazard| hazard.severity == Severity::Severe)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTrigger {
    WaypointReached,
    Transit,
}

/// Source of randomness behind scanning.
pub trait HazardModel: Send {
    /// Whether an in-transit scan happens this tick.
    fn transit_scan(&mut self) -> bool;

    /// Hazard kind and severity, if the scan detects one.
    fn detect(&mut self) -> Option<(HazardKind, Severity)>;

    fn readings(&mut self) -> EnvironmentReadings;
}

/// Uniform random classifier over the closed hazard enumerations.
pub struct RandomHazardModel<R: Rng = StdRng> {
    rng: R,
    transit_probability: f64,
    hazard_probability: f64,
}

impl RandomHazardModel<StdRng> {
    pub fn from_config(config: &ReconConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(rng, config.transit_scan_probability, config.hazard_probability)
    }
}

impl<R: Rng> RandomHazardModel<R> {
    pub fn new(rng: R, transit_probability: f64, hazard_probability: f64) -> Self {
        Self {
            rng,
            transit_probability: transit_probability.clamp(0.0, 1.0),
            hazard_probability: hazard_probability.clamp(0.0, 1.0),
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

impl<R: Rng + Send> HazardModel for RandomHazardModel<R> {
    fn transit_scan(&mut self) -> bool {
        self.rng.gen_bool(self.transit_probability)
    }

    fn detect(&mut self) -> Option<(HazardKind, Severity)> {
        if !self.rng.gen_bool(self.hazard_probability) {
            return None;
        }
        let kind = HazardKind::iter().choose(&mut self.rng)?;
        let severity = Severity::iter().choose(&mut self.rng)?;
        Some((kind, severity))
    }

    fn readings(&mut self) -> EnvironmentReadings {
        EnvironmentReadings {
            temperature: round1(self.rng.gen_range(-10.0..=40.0)),
            wind_speed: round1(self.rng.gen_range(0.0..=100.0)),
            humidity: round1(self.rng.gen_range(10.0..=90.0)),
        }
    }
}

pub struct ReconEngine {
    model: Box<dyn HazardModel>,
    store: RecordStore<ReconRecord>,
    log: EventLog,
}

impl ReconEngine {
    pub fn new(model: Box<dyn HazardModel>, store: RecordStore<ReconRecord>, log: EventLog) -> Self {
        Self { model, store, log }
    }

    pub fn records(&self) -> impl Iterator<Item = &ReconRecord> {
        self.store.records()
    }

    pub fn maybe_scan(
        &mut self,
        position: Waypoint,
        recon_mode: bool,
        trigger: ScanTrigger,
    ) -> Option<ReconRecord> {
        if !recon_mode {
            return None;
        }
        if trigger == ScanTrigger::Transit && !self.model.transit_scan() {
            return None;
        }
        Some(self.scan(position))
    }

    fn scan(&mut self, location: Waypoint) -> ReconRecord {
        let now = Utc::now();
        let mut detected = Vec::new();

        if let Some((kind, severity)) = self.model.detect() {
            info!("Recon detected {} ({}) at {}", kind, severity, location);
            self.append_log(&format!("Hazard detected: {} at {}", kind, location));
            detected.push(Hazard {
                kind,
                location,
                timestamp: now,
                severity,
            });
        }

        let record = ReconRecord {
            location,
            timestamp: now,
            detected,
            image: format!("recon_image_{}.jpg", now.timestamp()),
            sensors: self.model.readings(),
        };

        match serde_json::to_string(&record) {
            Ok(encoded) => self.append_log(&format!("Recon scan at {}: {}", location, encoded)),
            Err(e) => error!("Failed to encode recon record: {}", e),
        }
        if let Err(e) = self.store.push(record.clone()) {
            error!("Failed to persist recon data: {:#}", e);
        }
        record
    }

    fn append_log(&self, message: &str) {
        if let Err(e) = self.log.append(message) {
            error!("Failed to write recon log: {:#}", e);
        }
    }
}
