//! Unified error type for reelkeeper.
//!
//! All crates funnel their failures into [`Error`]. Pipeline code records
//! these per step, so every variant carries enough context to be read in a
//! run summary without the surrounding log lines.

use std::fmt;

/// Unified error type covering all failure modes in reelkeeper.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "step", "pipeline").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The caller has no authenticated session.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Input or configuration failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A conflicting entity already exists (e.g. a duplicate step name).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg, exiftool, etc.) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// A metadata extractor produced unusable output.
    #[error("Extract error [{source_name}]: {message}")]
    Extract {
        /// The extractor that failed.
        source_name: String,
        /// Human-readable error description.
        message: String,
    },

    /// A pipeline step failed.
    #[error("Pipeline error [{step}]: {message}")]
    Pipeline {
        /// The pipeline step that failed.
        step: String,
        /// Human-readable error description.
        message: String,
    },

    /// A step exceeded its time budget.
    #[error("Step {step} timed out after {secs}s")]
    Timeout {
        /// The step that was abandoned.
        step: String,
        /// The budget that elapsed.
        secs: u64,
    },

    /// The run was cancelled before it finished.
    #[error("Cancelled")]
    Cancelled,

    /// The record store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A remote service (AI analysis, embeddings, upload) failed.
    #[error("Remote error [{service}]: {message}")]
    Remote {
        /// The service that failed.
        service: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same operation later could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. } | Error::Tool { .. } | Error::Remote { .. } | Error::Io { .. }
        )
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Extract`].
    pub fn extract(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Extract {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Pipeline`].
    pub fn pipeline(step: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Pipeline {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Remote`].
    pub fn remote(service: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Remote {
            service: service.into(),
            message: message.to_string(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = Error::not_found("step", "thumbnails");
        assert_eq!(err.to_string(), "step not found: thumbnails");
    }

    #[test]
    fn conflict_display() {
        let err = Error::Conflict("step checksum already registered".into());
        assert_eq!(err.to_string(), "Conflict: step checksum already registered");
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("ffprobe", "exit code 1");
        assert_eq!(err.to_string(), "Tool error [ffprobe]: exit code 1");
    }

    #[test]
    fn extract_display() {
        let err = Error::extract("exiftool", "no JSON array");
        assert_eq!(err.to_string(), "Extract error [exiftool]: no JSON array");
    }

    #[test]
    fn pipeline_display() {
        let err = Error::pipeline("persist", "store unavailable");
        assert_eq!(err.to_string(), "Pipeline error [persist]: store unavailable");
    }

    #[test]
    fn timeout_display_and_retryable() {
        let err = Error::Timeout {
            step: "compression".into(),
            secs: 30,
        };
        assert_eq!(err.to_string(), "Step compression timed out after 30s");
        assert!(err.is_retryable());
    }

    #[test]
    fn validation_is_not_retryable() {
        assert!(!Error::Validation("bad".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn remote_display() {
        let err = Error::remote("embeddings", "HTTP 503");
        assert_eq!(err.to_string(), "Remote error [embeddings]: HTTP 503");
    }

    #[test]
    fn result_alias() {
        fn ok_fn() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(ok_fn().unwrap(), 42);

        fn err_fn() -> Result<i32> {
            Err(Error::Internal("boom".into()))
        }
        assert!(err_fn().is_err());
    }
}
