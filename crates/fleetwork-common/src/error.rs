//! Error types for the fleetwork agent
//!
//! Errors are structured with fields to aid debugging in production.
//! Variants carry the work, manifest ordinal, or resource kind they concern
//! so a failed reconcile can be traced back to its input.

use thiserror::Error;

/// Main error type for fleetwork operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A manifest could not be decoded into an object
    #[error("failed to decode manifest {ordinal}: {message}")]
    Decode {
        /// Position of the manifest in its Work
        ordinal: u32,
        /// Description of what's malformed
        message: String,
    },

    /// No resource mapping exists for a kind on the member cluster
    #[error("no resource mapping for {kind} in {api_version}")]
    Unmappable {
        /// apiVersion of the manifest
        api_version: String,
        /// Kind of the manifest
        kind: String,
    },

    /// Work and AppliedWork disagree about their lifecycle
    #[error("consistency error for {work}: {message}")]
    Consistency {
        /// Name of the Work (and its AppliedWork record)
        work: String,
        /// Which side is missing or out of step
        message: String,
    },

    /// One or more stale resources could not be deleted
    #[error("failed to delete {} stale resource(s): {}", .failures.len(), .failures.join("; "))]
    Deletion {
        /// One entry per failed deletion, naming the resource and cause
        failures: Vec<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// A reconcile exceeded its deadline
    #[error("timed out after {seconds}s [{context}]")]
    Timeout {
        /// Operation that timed out (e.g., "apply-work")
        context: String,
        /// The deadline that was exceeded
        seconds: u64,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "discovery", "config")
        context: String,
    },
}

impl Error {
    /// Create a decode error for the manifest at `ordinal`
    pub fn decode(ordinal: u32, msg: impl Into<String>) -> Self {
        Self::Decode {
            ordinal,
            message: msg.into(),
        }
    }

    /// Create an unmappable-kind error
    pub fn unmappable(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::Unmappable {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    /// Create a consistency error for the named work
    pub fn consistency(work: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Consistency {
            work: work.into(),
            message: msg.into(),
        }
    }

    /// Aggregate several deletion failures into one error
    pub fn deletion(failures: Vec<String>) -> Self {
        Self::Deletion { failures }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(context: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            context: context.into(),
            seconds,
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Decode and serialization errors need a new Work spec to resolve.
    /// An unmappable kind may become mappable once its CRD is installed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // 409 conflicts resolve on the next read; other 4xx won't
                match source {
                    kube::Error::Api(ae) if ae.code == 409 => true,
                    kube::Error::Api(ae) => !(400..500).contains(&ae.code),
                    _ => true,
                }
            }
            Error::Decode { .. } => false,
            Error::Unmappable { .. } => true,
            Error::Consistency { .. } => true,
            Error::Deletion { .. } => true,
            Error::Serialization { .. } => false,
            Error::Timeout { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Machine-readable reason used when this error is reported as a condition
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Decode { .. } => "ManifestDecodeFailed",
            Error::Unmappable { .. } => "UnmappableKind",
            _ => "AppliedManifestFailed",
        }
    }

    /// True if this is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// True if this is a Kubernetes 409 with reason AlreadyExists
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409 && ae.reason == "AlreadyExists"
        )
    }

    /// True if this is a Kubernetes 409 conflict (stale resourceVersion or failed precondition)
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409) && !self.is_already_exists()
    }

    fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(err.to_string())
    }
}

/// Build a kube API error response, mainly for exercising error handling in tests
pub fn api_error(code: u16, reason: impl Into<String>, msg: impl Into<String>) -> Error {
    Error::Kube {
        source: kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: msg.into(),
            reason: reason.into(),
            code,
        }),
    }
}
