use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::recon::{Hazard, HazardKind};
use crate::safety::SafetyState;

/// A target coordinate pair on a route.
///
/// Serialized as `{"lat": .., "lon": ..}`. Producers may also send the
/// `[lat, lon]` pair form.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "WaypointRepr")]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WaypointRepr {
    Pair(f64, f64),
    Object { lat: f64, lon: f64 },
}

impl From<WaypointRepr> for Waypoint {
    fn from(repr: WaypointRepr) -> Self {
        match repr {
            WaypointRepr::Pair(lat, lon) | WaypointRepr::Object { lat, lon } => Self { lat, lon },
        }
    }
}

impl Waypoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Flat-plane distance in coordinate degrees.
    pub fn distance_to(&self, other: &Waypoint) -> f64 {
        (other.lat - self.lat).hypot(other.lon - self.lon)
    }
}

impl fmt::Display for Waypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VehicleStatus {
    Idle,
    Enroute,
    Stopped,
    Manual { direction: String, speed: f64 },
    Rerouted,
    Paused { hazard: HazardKind },
    Arrived,
}

impl VehicleStatus {
    /// Statuses in which the loop advances along the route.
    pub fn is_moving(&self) -> bool {
        matches!(self, Self::Enroute | Self::Rerouted)
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Enroute => write!(f, "enroute"),
            Self::Stopped => write!(f, "stopped"),
            Self::Manual { direction, speed } => write!(f, "manual: {} at {}", direction, speed),
            Self::Rerouted => write!(f, "rerouted"),
            Self::Paused { hazard } => write!(f, "paused (hazard: {})", hazard),
            Self::Arrived => write!(f, "arrived"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleState {
    pub position: Waypoint,
    pub route: Vec<Waypoint>,
    pub current_index: usize,
    pub speed_per_tick: f64,
    pub battery: f64,
    pub status: VehicleStatus,
    pub reroute_reason: Option<String>,
    pub recon_mode: bool,
    pub hazards: VecDeque<Hazard>,
    pub last_command_id: Option<String>,

    #[serde(skip)]
    hazard_window: usize,
}

impl VehicleState {
    pub fn new(route: Vec<Waypoint>, speed_per_tick: f64, hazard_window: usize) -> Self {
        Self {
            position: route.first().copied().unwrap_or_default(),
            route,
            current_index: 0,
            speed_per_tick,
            battery: 100.0,
            status: VehicleStatus::Idle,
            reroute_reason: None,
            recon_mode: false,
            hazards: VecDeque::with_capacity(hazard_window),
            last_command_id: None,
            hazard_window,
        }
    }

    /// Replaces the route and puts the vehicle on its first waypoint.
    pub fn load_route(&mut self, route: Vec<Waypoint>) {
        self.position = route.first().copied().unwrap_or(self.position);
        self.route = route;
        self.current_index = 0;
    }

    pub fn clear_route(&mut self) {
        self.route.clear();
        self.current_index = 0;
    }

    pub fn drain_battery(&mut self, amount: f64) {
        self.battery = (self.battery - amount).clamp(0.0, 100.0);
    }

    /// Keeps only the most recent `hazard_window` hazards.
    pub fn record_hazard(&mut self, hazard: Hazard) {
        if self.hazard_window == 0 {
            return;
        }
        while self.hazards.len() >= self.hazard_window {
            self.hazards.pop_front();
        }
        self.hazards.push_back(hazard);
    }

    pub fn snapshot(&self, safety: SafetyState, power_critical: bool) -> StatusSnapshot {
        StatusSnapshot {
            position: self.position,
            battery: self.battery,
            status: self.status.clone(),
            route: self.route.clone(),
            current_waypoint: self.current_index,
            reroute_reason: self.reroute_reason.clone(),
            hazards: self.hazards.iter().cloned().collect(),
            recon_mode: self.recon_mode,
            safety,
            power_critical,
            timestamp: Utc::now(),
        }
    }
}

/// The status document written for consumers each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub position: Waypoint,
    pub battery: f64,
    pub status: VehicleStatus,
    pub route: Vec<Waypoint>,
    pub current_waypoint: usize,
    pub reroute_reason: Option<String>,
    pub hazards: Vec<Hazard>,
    pub recon_mode: bool,
    pub safety: SafetyState,
    pub power_critical: bool,
    pub timestamp: DateTime<Utc>,
}
