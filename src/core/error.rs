//! Error taxonomy for the Calypso Workflow Kernel.
//!
//! One canonical error type is used throughout: every subsystem returns
//! `Result<T, CalypsoError>`. Variants map one-to-one onto the error kinds
//! named in the kernel specification (manifest load, path resolution,
//! precondition/staleness/skip-warning blocks, confirmation, handler and
//! oracle failures, cancellation).

use thiserror::Error;

/// Canonical error type for all Calypso Workflow Kernel operations.
#[derive(Error, Debug)]
pub enum CalypsoError {
    /// Manifest failed to parse or validate at workflow load. Fatal.
    #[error("manifest error: {0}")]
    ManifestError(String),

    /// A VFS path could not be resolved.
    #[error("path error: {0}")]
    PathError(String),

    /// A non-optional parent stage has no materialized artifact.
    #[error("precondition not met: {stage_id} requires {parent_id}")]
    PreconditionError { stage_id: String, parent_id: String },

    /// A listed parent's fingerprint has drifted since this stage was built.
    #[error("stale prerequisite: {stage_id} was built against a stale {parent_id}")]
    StalenessError { stage_id: String, parent_id: String },

    /// Soft block: the user is skipping a stage with an unexhausted skip
    /// warning. Tier 1 shows just `short`; tier 2 and up append `reason`.
    #[error(
        "skip warning ({tier}/{max_warnings}): {short}{}",
        if *tier >= 2 && !reason.is_empty() {
            format!(" — {reason}")
        } else {
            String::new()
        }
    )]
    SkipWarning {
        short: String,
        reason: String,
        tier: u32,
        max_warnings: u32,
    },

    /// A phase jump requires explicit confirmation before it executes.
    #[error("confirmation required to jump to {target_stage_id}")]
    ConfirmationRequired { target_stage_id: String },

    /// A stage handler failed internally. No artifact is written.
    #[error("handler error in stage {stage_id}: {source}")]
    HandlerError {
        stage_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// A cooperative suspension point was cancelled before completion.
    #[error("cancelled")]
    CancellationError,

    /// The intent classifier (LLM oracle) was unreachable or errored.
    #[error("oracle error: {0}")]
    OracleError(#[source] anyhow::Error),

    /// Resource not found (stage, session, artifact, command).
    #[error("not found: {0}")]
    NotFound(String),

    /// I/O error (auto-converts from `std::io::Error`).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML manifest/config parse error.
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl CalypsoError {
    /// The suggestion text the kernel attaches to a hard/stale block, per §7.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            CalypsoError::PreconditionError { parent_id, .. } => Some(format!("run {parent_id}")),
            CalypsoError::StalenessError { parent_id, .. } => Some(format!("re-run {parent_id}")),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_error_has_run_suggestion() {
        let err = CalypsoError::PreconditionError {
            stage_id: "harmonize".into(),
            parent_id: "search".into(),
        };
        assert_eq!(err.suggestion(), Some("run search".to_string()));
    }

    #[test]
    fn staleness_error_has_rerun_suggestion() {
        let err = CalypsoError::StalenessError {
            stage_id: "train".into(),
            parent_id: "search".into(),
        };
        assert_eq!(err.suggestion(), Some("re-run search".to_string()));
    }

    #[test]
    fn manifest_error_display() {
        let err = CalypsoError::ManifestError("duplicate stage id: gather".to_string());
        assert_eq!(
            format!("{err}"),
            "manifest error: duplicate stage id: gather"
        );
    }
}
