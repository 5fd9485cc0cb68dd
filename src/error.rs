//! Error types shared by the story loader, globals store, runner and snapshots

use crate::types::value::ValueKind;
use thiserror::Error;

/// Boxed source of an isolated host callback failure.
pub type CallbackSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every failure the runtime reports at its boundary.
#[derive(Debug, Error)]
pub enum InkError {
    #[error("Variable '{name}' is not declared by the story")]
    UnknownVariable { name: String },

    #[error("Type mismatch for variable '{name}': expected {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("Invalid choice index {index}, {available} choice(s) available")]
    InvalidChoiceIndex { index: usize, available: usize },

    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },

    #[error("External function '{name}' is not bound")]
    UnboundExternal { name: String },

    #[error("External function '{name}' returned no value")]
    ExternalReturnMissing { name: String },

    #[error("External function '{name}' expects {expected} argument(s), called with {actual}")]
    ExternalArity {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown list flag '{flag}'")]
    UnknownListFlag { flag: String },

    #[error("Invalid story format: {reason}")]
    InvalidStoryFormat { reason: String },

    #[error("Unsupported story format version {found}, newest supported is {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Snapshot is corrupt: {reason}")]
    SnapshotCorrupt { reason: String },

    #[error("Unsupported snapshot version {found}, expected {supported}")]
    SnapshotVersionMismatch { found: u32, supported: u32 },

    #[error("Snapshot does not match story: {reason}")]
    SnapshotMismatch { reason: String },

    #[error("Runtime error at instruction {ip}: {reason}")]
    Runtime { ip: usize, reason: String },

    #[error("Callback '{name}' failed: {source}")]
    Callback {
        name: String,
        #[source]
        source: CallbackSource,
    },
}

impl InkError {
    pub fn unknown_variable(name: impl Into<String>) -> Self {
        Self::UnknownVariable { name: name.into() }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    pub fn invalid_format(reason: impl Into<String>) -> Self {
        Self::InvalidStoryFormat {
            reason: reason.into(),
        }
    }

    pub fn snapshot_corrupt(reason: impl Into<String>) -> Self {
        Self::SnapshotCorrupt {
            reason: reason.into(),
        }
    }

    pub fn snapshot_mismatch(reason: impl Into<String>) -> Self {
        Self::SnapshotMismatch {
            reason: reason.into(),
        }
    }

    pub fn runtime(ip: usize, reason: impl Into<String>) -> Self {
        Self::Runtime {
            ip,
            reason: reason.into(),
        }
    }

    pub fn callback(name: impl Into<String>, error: anyhow::Error) -> Self {
        Self::Callback {
            name: name.into(),
            source: error.into(),
        }
    }

    /// Isolated host failures do not poison the runner.
    pub fn is_callback(&self) -> bool {
        matches!(self, Self::Callback { .. })
    }
}

pub type Result<T> = std::result::Result<T, InkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_subject() {
        let err = InkError::unknown_variable("age");
        assert_eq!(err.to_string(), "Variable 'age' is not declared by the story");

        let err = InkError::TypeMismatch {
            name: "age".to_string(),
            expected: ValueKind::Int,
            actual: ValueKind::String,
        };
        assert_eq!(
            err.to_string(),
            "Type mismatch for variable 'age': expected int, got string"
        );
    }

    #[test]
    fn callback_errors_keep_their_source() {
        let err = InkError::callback("observer", anyhow::anyhow!("boom"));
        assert!(err.is_callback());
        assert_eq!(err.to_string(), "Callback 'observer' failed: boom");
        assert!(std::error::Error::source(&err).is_some());
    }
}
