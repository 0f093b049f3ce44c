//! Error types, one enum per tier of the taxonomy.
//!
//! Read errors abort only the read; run errors terminate a single run;
//! session errors are returned to the caller and leave the session
//! inspectable but unusable. Recoverable conditions never surface here;
//! they become `error` events on the log.

use thiserror::Error;
use uuid::Uuid;

/// Load-time errors: ill-formed JSON, unknown type tags, violated
/// definition invariants.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("unknown type: '{0}'")]
    UnknownType(String),
    #[error("field 'type' is required")]
    MissingType,
    #[error("unable to read {kind}: {message}")]
    Invalid { kind: &'static str, message: String },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ReadError {
    pub fn invalid(kind: &'static str, message: impl Into<String>) -> Self {
        ReadError::Invalid {
            kind,
            message: message.into(),
        }
    }
}

/// The sentinel returned when a modifier's asset references are all missing
/// and the modifier should be dropped by the caller.
#[derive(Debug, Error)]
pub enum ModifierReadError {
    #[error("no modifier to return because of missing assets")]
    NoModifier,
    #[error(transparent)]
    Read(#[from] ReadError),
}

/// Fatal action failures. Anything recoverable is logged as an `error`
/// event by the action itself and does not surface here.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{0}")]
    Fatal(String),
}

/// Fatal session errors: the session is left inspectable but can no longer
/// be resumed.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("only waiting sessions can be resumed")]
    NotWaiting,
    #[error("session doesn't contain any runs which can be resumed")]
    NoResumableRun,
    #[error("run {0} is not part of this session")]
    OrphanRun(Uuid),
    #[error("unable to find flow with UUID: {0}")]
    MissingFlow(Uuid),
    #[error("unable to resume session: {0}")]
    Resume(String),
    #[error(transparent)]
    Read(#[from] ReadError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_display() {
        assert_eq!(
            ReadError::UnknownType("spaceship".into()).to_string(),
            "unknown type: 'spaceship'"
        );
        assert_eq!(
            ReadError::MissingType.to_string(),
            "field 'type' is required"
        );
        assert_eq!(
            ReadError::invalid("flow", "no nodes").to_string(),
            "unable to read flow: no nodes"
        );
    }

    #[test]
    fn test_session_error_display() {
        assert_eq!(
            SessionError::NotWaiting.to_string(),
            "only waiting sessions can be resumed"
        );
        let uuid: Uuid = "61602f3e-f603-4df0-bdbf-9a95f3568f87".parse().unwrap();
        assert_eq!(
            SessionError::MissingFlow(uuid).to_string(),
            "unable to find flow with UUID: 61602f3e-f603-4df0-bdbf-9a95f3568f87"
        );
    }
}
