//! Error types for Merkmal.
//!
//! All fallible operations return [`Result`] with [`MerkmalError`]. The
//! dispatcher localises anything that pertains to a single probe action:
//! such failures are recorded in `IndexResult.errors` under the action name
//! and never surface as an `Err`. Only failures of the pipeline itself
//! propagate:
//!
//! - `UnknownAction` - a requested action is not registered or cannot
//!   consume a stream; raised before any byte is read
//! - `SourceRead` - the source reader failed before delivering a single byte
//! - `Internal` - task supervision or buffer plumbing broke
//!
//! System errors (`Io`) bubble up unchanged so real file-system problems
//! stay visible in bug reports.
use thiserror::Error;

/// Result type alias using `MerkmalError`.
pub type Result<T> = std::result::Result<T, MerkmalError>;

/// Main error type for all Merkmal operations.
#[derive(Debug, Error)]
pub enum MerkmalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A requested action name is not registered with the dispatcher, or the
    /// registered action is not stream-capable.
    #[error("action '{0}' not configured")]
    UnknownAction(String),

    /// The source stream failed before any consumer saw a byte.
    #[error("source read error: {message}")]
    SourceRead {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Pipeline plumbing failure (task join, buffer flush).
    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("http error: {message}")]
    Http {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A subprocess or remote call exceeded its configured timeout. Recorded
    /// as an action failure, not surfaced from the dispatcher.
    #[error("timeout after {seconds}s running '{command}'")]
    Timeout { command: String, seconds: u64 },

    /// Internal sentinel: the action does not apply to this content. The
    /// caller converts it into a silent skip.
    #[error("mime type not applicable for action")]
    NotApplicable,

    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for MerkmalError {
    fn from(err: serde_json::Error) -> Self {
        MerkmalError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<reqwest::Error> for MerkmalError {
    fn from(err: reqwest::Error) -> Self {
        MerkmalError::Http {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

macro_rules! error_constructor {
    ($name:ident, $variant:ident) => {
        paste::paste! {
            #[doc = "Create a " $variant " error"]
            pub fn $name<S: Into<String>>(message: S) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: None,
                }
            }

            #[doc = "Create a " $variant " error with source"]
            pub fn [<$name _with_source>]<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
                message: S,
                source: E,
            ) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: Some(Box::new(source)),
                }
            }
        }
    };
}

impl MerkmalError {
    error_constructor!(source_read, SourceRead);
    error_constructor!(internal, Internal);
    error_constructor!(validation, Validation);
    error_constructor!(serialization, Serialization);
    error_constructor!(http, Http);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MerkmalError = io_err.into();
        assert!(matches!(err, MerkmalError::Io(_)));
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_unknown_action_message() {
        let err = MerkmalError::UnknownAction("ghost".to_string());
        assert_eq!(err.to_string(), "action 'ghost' not configured");
    }

    #[test]
    fn test_source_read_constructor() {
        let err = MerkmalError::source_read("reader broke");
        assert_eq!(err.to_string(), "source read error: reader broke");
    }

    #[test]
    fn test_internal_with_source() {
        let source = std::io::Error::other("flush failed");
        let err = MerkmalError::internal_with_source("cannot flush buffer", source);
        assert_eq!(err.to_string(), "internal error: cannot flush buffer");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_timeout_message() {
        let err = MerkmalError::Timeout {
            command: "ffprobe -i -".to_string(),
            seconds: 30,
        };
        assert_eq!(err.to_string(), "timeout after 30s running 'ffprobe -i -'");
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: MerkmalError = json_err.into();
        assert!(matches!(err, MerkmalError::Serialization { .. }));
    }

    #[test]
    fn test_validation_constructor() {
        let err = MerkmalError::validation("bad header size");
        assert_eq!(err.to_string(), "validation error: bad header size");
    }

    #[test]
    fn test_not_applicable_is_distinct() {
        let err = MerkmalError::NotApplicable;
        assert!(matches!(err, MerkmalError::NotApplicable));
    }
}
