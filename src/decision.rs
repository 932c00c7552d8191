use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::debug;

use crate::sensors::SensorSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DecisionKind {
    Continue,
    AvoidObstacle,
    CompleteMission,
    MissionTimeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub kind: DecisionKind,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// Advisory mission decisions. `MissionTimeout` is terminal advice only;
/// the caller decides whether to stop.
#[derive(Debug)]
pub struct DecisionEngine {
    timeout: Duration,
    history_limit: usize,
    history: VecDeque<Decision>,
}

impl DecisionEngine {
    pub fn new(timeout: Duration, history_limit: usize) -> Self {
        Self {
            timeout,
            history_limit,
            history: VecDeque::new(),
        }
    }

    pub fn evaluate(&mut self, snapshot: &SensorSnapshot, elapsed: Duration) -> Decision {
        let (kind, confidence) = if elapsed > self.timeout {
            (DecisionKind::MissionTimeout, 1.0)
        } else if snapshot.obstacle_detected {
            (DecisionKind::AvoidObstacle, 0.95)
        } else if snapshot.target_reached {
            (DecisionKind::CompleteMission, 1.0)
        } else {
            (DecisionKind::Continue, 0.9)
        };

        let decision = Decision {
            kind,
            confidence,
            timestamp: Utc::now(),
        };
        debug!("Decision made: {} (confidence: {})", kind, confidence);

        if self.history_limit > 0 {
            if self.history.len() == self.history_limit {
                self.history.pop_front();
            }
            self.history.push_back(decision.clone());
        }
        decision
    }

    pub fn history(&self) -> impl Iterator<Item = &Decision> {
        self.history.iter()
    }
}
