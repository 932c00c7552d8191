//! Commands issued to the vehicle by external producers.
//!
//! The wire shape is a JSON object keyed by `action`, e.g.
//! `{"action": "manual", "direction": "north", "speed": 5}`. A producer may
//! add an `id`; the command's identity is the canonical JSON text of the
//! whole object, so two identical objects without `id` are
//! indistinguishable.

pub mod channel;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::CommandError;
use crate::vehicle::Waypoint;

pub use channel::{CommandChannel, QueuedCommand};

pub const ACTIONS: [&str; 10] = [
    "start",
    "stop",
    "manual",
    "add_route",
    "delete_route",
    "update_route",
    "reroute",
    "recon",
    "stop_recon",
    "reset_safety",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    Start,
    Stop,
    Manual {
        direction: String,
        #[serde(deserialize_with = "lenient_f64")]
        speed: f64,
    },
    AddRoute {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        route: Option<Vec<Waypoint>>,
    },
    DeleteRoute,
    UpdateRoute {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        route: Option<Vec<Waypoint>>,
    },
    Reroute {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Recon,
    StopRecon,
    ResetSafety,
}

impl Command {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Manual { .. } => "manual",
            Self::AddRoute { .. } => "add_route",
            Self::DeleteRoute => "delete_route",
            Self::UpdateRoute { .. } => "update_route",
            Self::Reroute { .. } => "reroute",
            Self::Recon => "recon",
            Self::StopRecon => "stop_recon",
            Self::ResetSafety => "reset_safety",
        }
    }

    /// Parses one queued JSON object, naming what is wrong with it.
    pub fn from_value(value: &Value) -> Result<Self, CommandError> {
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .ok_or(CommandError::MissingAction)?;
        if !ACTIONS.contains(&action) {
            return Err(CommandError::UnknownAction(action.to_string()));
        }
        serde_json::from_value(value.clone()).map_err(|source| CommandError::Invalid {
            action: action.to_string(),
            source,
        })
    }

    /// JSON object for the queue, stamped with a producer id.
    pub fn to_envelope(&self, id: &str) -> Result<Value, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert("id".to_string(), Value::String(id.to_string()));
        }
        Ok(value)
    }
}

/// Canonical identity of a queued command object: its JSON text with
/// object keys sorted at every level.
pub fn identity(value: &Value) -> String {
    canonical(value).to_string()
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonical(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// Producers historically sent `speed` as a form string. Non-finite values
/// are rejected since they cannot be written back out as JSON.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        Text(String),
    }

    let value = match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => n,
        NumberOrString::Text(s) => s.trim().parse().map_err(serde::de::Error::custom)?,
    };
    if !value.is_finite() {
        return Err(serde::de::Error::custom(format!(
            "expected a finite number, got {}",
            value
        )));
    }
    Ok(value)
}
