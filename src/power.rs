use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::{info, warn};

const HISTORY_LIMIT: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PowerSource {
    #[default]
    Battery,
    Solar,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Runtime {
    Ticks(f64),
    Unbounded,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerReading {
    pub timestamp: DateTime<Utc>,
    pub level: f64,
    pub source: PowerSource,
}

/// Battery bookkeeping. It never halts anything by itself: callers decide
/// what to do when [`PowerMonitor::is_critical`] holds.
#[derive(Debug)]
pub struct PowerMonitor {
    threshold: f64,
    level: f64,
    source: PowerSource,
    low_power_mode: bool,
    history: VecDeque<PowerReading>,
}

impl PowerMonitor {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            level: 100.0,
            source: PowerSource::Battery,
            low_power_mode: false,
            history: VecDeque::new(),
        }
    }

    pub fn update(&mut self, level: f64, source: PowerSource) {
        self.level = level.clamp(0.0, 100.0);
        self.source = source;
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(PowerReading {
            timestamp: Utc::now(),
            level: self.level,
            source,
        });

        let critical = self.is_critical();
        if critical && !self.low_power_mode {
            warn!(
                "Low power mode triggered: {:.2}% on {} (threshold {:.2}%)",
                self.level, source, self.threshold
            );
        } else if !critical && self.low_power_mode {
            info!("Power recovered: {:.2}% on {}", self.level, source);
        }
        self.low_power_mode = critical;
    }

    pub fn is_critical(&self) -> bool {
        self.level <= self.threshold
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn source(&self) -> PowerSource {
        self.source
    }

    pub fn history(&self) -> impl Iterator<Item = &PowerReading> {
        self.history.iter()
    }

    /// Remaining ticks at the given drain rate.
    pub fn estimate_runtime(&self, drain_per_tick: f64) -> Runtime {
        if drain_per_tick <= 0.0 {
            return Runtime::Unbounded;
        }
        Runtime::Ticks(self.level / drain_per_tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_drain_is_unbounded() {
        let monitor = PowerMonitor::new(20.0);
        assert_eq!(monitor.estimate_runtime(0.0), Runtime::Unbounded);
        assert_eq!(monitor.estimate_runtime(0.5), Runtime::Ticks(200.0));
    }

    #[test]
    fn critical_at_threshold() {
        let mut monitor = PowerMonitor::new(20.0);
        monitor.update(20.01, PowerSource::Battery);
        assert!(!monitor.is_critical());
        monitor.update(20.0, PowerSource::Battery);
        assert!(monitor.is_critical());
        monitor.update(35.0, PowerSource::Solar);
        assert!(!monitor.is_critical());
        assert_eq!(monitor.source(), PowerSource::Solar);
        assert_eq!(monitor.history().count(), 3);
    }

    #[test]
    fn level_is_clamped() {
        let mut monitor = PowerMonitor::new(20.0);
        monitor.update(-3.0, PowerSource::Battery);
        assert_eq!(monitor.level(), 0.0);
        monitor.update(140.0, PowerSource::Battery);
        assert_eq!(monitor.level(), 100.0);
    }
}
