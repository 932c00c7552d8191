use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::storage::read_json_lenient;

/// Latest sensor indicators consulted by the safety gate and the decision
/// engine. Absent fields read as "all clear".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSnapshot {
    pub collision_risk: bool,
    pub system_fault: bool,
    pub temperature: Option<f64>,
    pub obstacle_detected: bool,
    pub target_reached: bool,
}

pub trait SensorSource: Send {
    fn snapshot(&mut self) -> SensorSnapshot;
}

#[derive(Debug, Default)]
pub struct NominalSensors;

impl SensorSource for NominalSensors {
    fn snapshot(&mut self) -> SensorSnapshot {
        SensorSnapshot::default()
    }
}

/// Polls a JSON sensor document written by an external feed.
#[derive(Debug)]
pub struct FileSensorSource {
    path: PathBuf,
}

impl FileSensorSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SensorSource for FileSensorSource {
    fn snapshot(&mut self) -> SensorSnapshot {
        read_json_lenient(&self.path).unwrap_or_default()
    }
}
