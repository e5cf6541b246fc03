use lorekeep_core::{ErrorCode, LoreError};

/// Failure of a call to the text-generation service, or of waiting for one.
#[derive(Debug, thiserror::Error)]
pub enum ExternalError {
    /// Connection, DNS or timeout failure before a status line arrived.
    #[error("request failed: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The reply arrived but did not have the expected shape.
    #[error("malformed reply: {0}")]
    Malformed(String),

    #[error("cancelled")]
    Cancelled,

    /// The run's wall-clock budget ran out.
    #[error("run budget exhausted")]
    DeadlineExceeded,
}

impl ExternalError {
    /// Worth another attempt within the same call.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Malformed(_) | Self::Cancelled | Self::DeadlineExceeded => false,
        }
    }

    /// The run should stop rather than move on to the next item.
    #[must_use]
    pub const fn is_interrupt(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Transport(_) | Self::Status { .. } => ErrorCode::ExternalCallFailed,
            Self::Malformed(_) => ErrorCode::MalformedReply,
            Self::Cancelled | Self::DeadlineExceeded => ErrorCode::Cancelled,
        }
    }
}

/// Errors from a pipeline stage.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Lore(#[from] LoreError),

    #[error(transparent)]
    External(#[from] ExternalError),

    /// No source file says enough about the entity to write from.
    #[error("no usable sources for '{0}'")]
    NoSources(String),

    /// The revision dropped citation markers the original carried.
    #[error("revision of {path} dropped citations: {}", .missing.join(", "))]
    DroppedCitations { path: String, missing: Vec<String> },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl AgentError {
    /// Failures that skip one item and let the run continue.
    #[must_use]
    pub const fn is_item_failure(&self) -> bool {
        match self {
            Self::External(err) => !err.is_interrupt(),
            Self::NoSources(_) | Self::DroppedCitations { .. } => true,
            // the target moved on since the run was planned
            Self::Lore(err) => matches!(
                err,
                LoreError::NotFound { .. } | LoreError::InvalidTransition { .. }
            ),
            Self::Io { .. } => false,
        }
    }

    #[must_use]
    pub const fn is_interrupt(&self) -> bool {
        matches!(self, Self::External(err) if err.is_interrupt())
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Lore(err) => err.code(),
            Self::External(err) => err.code(),
            Self::NoSources(_) => ErrorCode::NotFound,
            Self::DroppedCitations { .. } => ErrorCode::MalformedReply,
            Self::Io { .. } => ErrorCode::InternalUnexpected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy() {
        assert!(ExternalError::Transport("reset".into()).is_retryable());
        assert!(
            ExternalError::Status {
                status: 529,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !ExternalError::Status {
                status: 400,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(!ExternalError::Malformed("x".into()).is_retryable());
    }

    #[test]
    fn item_failures_versus_interrupts() {
        let malformed = AgentError::from(ExternalError::Malformed("not json".into()));
        assert!(malformed.is_item_failure());
        assert!(!malformed.is_interrupt());
        assert_eq!(malformed.code(), ErrorCode::MalformedReply);

        let cancelled = AgentError::from(ExternalError::Cancelled);
        assert!(!cancelled.is_item_failure());
        assert!(cancelled.is_interrupt());

        let storage = AgentError::from(LoreError::StorageWrite("changelog".into()));
        assert!(!storage.is_item_failure());
        assert!(AgentError::from(LoreError::not_found("entity", "entity-1")).is_item_failure());
        assert_eq!(storage.code(), ErrorCode::StorageWriteFailed);
    }

    #[test]
    fn dropped_citations_message_lists_markers() {
        let err = AgentError::DroppedCitations {
            path: "monsters/gorm.md".into(),
            missing: vec!["[400-404]".into(), "[410-414]".into()],
        };
        assert_eq!(
            err.to_string(),
            "revision of monsters/gorm.md dropped citations: [400-404], [410-414]"
        );
    }
}
