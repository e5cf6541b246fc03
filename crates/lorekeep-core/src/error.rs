use std::fmt;
use std::path::PathBuf;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    MissingCredential,
    Unauthorized,
    NotFound,
    InvalidStateTransition,
    InvalidValue,
    StorageWriteFailed,
    LockContention,
    LoreWriteFailed,
    ExternalCallFailed,
    MalformedReply,
    Cancelled,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::MissingCredential => "E1002",
            Self::Unauthorized => "E1003",
            Self::NotFound => "E2001",
            Self::InvalidStateTransition => "E2002",
            Self::InvalidValue => "E2003",
            Self::StorageWriteFailed => "E3001",
            Self::LockContention => "E3002",
            Self::LoreWriteFailed => "E3003",
            Self::ExternalCallFailed => "E4001",
            Self::MalformedReply => "E4002",
            Self::Cancelled => "E4003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::MissingCredential => "Generation service credential not configured",
            Self::Unauthorized => "Unauthorized trigger",
            Self::NotFound => "Not found",
            Self::InvalidStateTransition => "Invalid state transition",
            Self::InvalidValue => "Invalid value",
            Self::StorageWriteFailed => "Storage write failed",
            Self::LockContention => "Lock contention",
            Self::LoreWriteFailed => "Lore file write failed",
            Self::ExternalCallFailed => "External call failed",
            Self::MalformedReply => "Malformed reply from external service",
            Self::Cancelled => "Run cancelled",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .lorekeep/config.toml and retry."),
            Self::MissingCredential => {
                Some("Set ANTHROPIC_API_KEY in the environment before starting a run.")
            }
            Self::Unauthorized => Some("Pass --authorization \"Bearer <CRON_SECRET>\"."),
            Self::NotFound => None,
            Self::InvalidStateTransition => {
                Some("Follow valid transitions: queued -> processing -> done.")
            }
            Self::InvalidValue => Some("Check the accepted values with --help."),
            Self::StorageWriteFailed => {
                Some("Check disk space and permissions, or the KV service status.")
            }
            Self::LockContention => Some("Retry after the other `lk` process releases its lock."),
            Self::LoreWriteFailed => Some("Check write permissions on the lore directory."),
            Self::ExternalCallFailed => Some("The item stays queued and is retried next run."),
            Self::MalformedReply => Some("The item stays queued and is retried next run."),
            Self::Cancelled => Some("Queues are consistent; the next run resumes the batch."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ---------------------------------------------------------------------------
// Domain error
// ---------------------------------------------------------------------------

/// Errors surfaced by pipeline operations that callers must distinguish.
#[derive(Debug, thiserror::Error)]
pub enum LoreError {
    /// Unknown id for a lookup, approve or reject.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A status change that the lifecycle does not allow.
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    /// A required credential is absent from the environment.
    #[error("{0} is not set")]
    MissingCredential(&'static str),

    /// Storage reported a failed whole-document write.
    #[error("failed to persist '{0}'")]
    StorageWrite(String),

    /// Writing into the published lore tree failed.
    #[error("failed to write {path}: {source}")]
    LoreWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A value outside the accepted set.
    #[error("invalid {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

impl LoreError {
    /// Shorthand for the not-found variant.
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::InvalidTransition { .. } => ErrorCode::InvalidStateTransition,
            Self::MissingCredential(_) => ErrorCode::MissingCredential,
            Self::StorageWrite(_) => ErrorCode::StorageWriteFailed,
            Self::LoreWrite { .. } => ErrorCode::LoreWriteFailed,
            Self::InvalidValue { .. } => ErrorCode::InvalidValue,
        }
    }

    /// True for the not-found variant.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorCode, LoreError};
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::ConfigParseError,
            ErrorCode::MissingCredential,
            ErrorCode::Unauthorized,
            ErrorCode::NotFound,
            ErrorCode::InvalidStateTransition,
            ErrorCode::InvalidValue,
            ErrorCode::StorageWriteFailed,
            ErrorCode::LockContention,
            ErrorCode::LoreWriteFailed,
            ErrorCode::ExternalCallFailed,
            ErrorCode::MalformedReply,
            ErrorCode::Cancelled,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::MalformedReply.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn not_found_is_distinguishable() {
        let err = LoreError::not_found("pending entry", "pending-1");
        assert!(err.is_not_found());
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.to_string(), "pending entry not found: pending-1");

        let other = LoreError::MissingCredential("ANTHROPIC_API_KEY");
        assert!(!other.is_not_found());
        assert_eq!(other.code(), ErrorCode::MissingCredential);
    }
}
