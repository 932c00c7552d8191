use std::path::PathBuf;

use thiserror::Error;

/// Reasons a queued command cannot be applied.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command has no action field")]
    MissingAction,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid {action} command: {source}")]
    Invalid {
        action: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{action} with an empty route")]
    EmptyRoute { action: &'static str },
}

/// Failures of the command queue's producer side.
///
/// The drain side never returns these: a drain that cannot read or lock
/// the queue yields an empty batch.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("command queue {path:?} is locked by another writer")]
    Locked { path: PathBuf },

    #[error("command queue io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode command queue: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_display() {
        let err = CommandError::UnknownAction("fly".to_string());
        assert_eq!(err.to_string(), "unknown action: fly");
        assert_eq!(
            CommandError::MissingAction.to_string(),
            "command has no action field"
        );
    }

    #[test]
    fn channel_error_names_the_path() {
        let err = ChannelError::Locked {
            path: PathBuf::from("/tmp/vehicle_commands.json"),
        };
        assert!(err.to_string().contains("vehicle_commands.json"));
    }
}
