use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::{info, warn};

use crate::sensors::SensorSnapshot;

const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyState {
    pub override_active: bool,
    pub abort_active: bool,
}

impl SafetyState {
    pub fn is_safe(&self) -> bool {
        !self.override_active && !self.abort_active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SafetyEvent {
    EmergencyOverride,
    MissionAbort,
    Reset,
}

/// Sticky safety flags driven by sensor snapshots.
///
/// Once set, a flag survives clean snapshots until [`SafetyGate::reset`].
#[derive(Debug)]
pub struct SafetyGate {
    max_temperature: f64,
    state: SafetyState,
    history: VecDeque<(DateTime<Utc>, SafetyEvent)>,
}

impl SafetyGate {
    pub fn new(max_temperature: f64) -> Self {
        Self {
            max_temperature,
            state: SafetyState::default(),
            history: VecDeque::new(),
        }
    }

    pub fn evaluate(&mut self, snapshot: &SensorSnapshot) -> SafetyState {
        let over_temperature = snapshot
            .temperature
            .is_some_and(|t| t > self.max_temperature);

        if (snapshot.collision_risk || over_temperature) && !self.state.override_active {
            warn!(
                "Emergency override activated (collision_risk={}, temperature={:?})",
                snapshot.collision_risk, snapshot.temperature
            );
            self.state.override_active = true;
            self.record(SafetyEvent::EmergencyOverride);
        }
        if snapshot.system_fault && !self.state.abort_active {
            warn!("Mission abort triggered by system fault");
            self.state.abort_active = true;
            self.record(SafetyEvent::MissionAbort);
        }
        self.state
    }

    pub fn reset(&mut self) {
        info!("Safety state reset");
        self.state = SafetyState::default();
        self.record(SafetyEvent::Reset);
    }

    pub fn state(&self) -> SafetyState {
        self.state
    }

    pub fn is_safe_to_proceed(&self) -> bool {
        self.state.is_safe()
    }

    pub fn history(&self) -> impl Iterator<Item = &(DateTime<Utc>, SafetyEvent)> {
        self.history.iter()
    }

    fn record(&mut self, event: SafetyEvent) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back((Utc::now(), event));
    }
}
