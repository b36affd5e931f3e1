use std::fmt;

/// Machine-readable error codes for callers that branch on failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ValidationFailed,
    NetworkFailure,
    PermissionDenied,
    StaleTarget,
    FeedDisconnected,
    ConfigParseError,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ValidationFailed => "E1001",
            Self::ConfigParseError => "E1002",
            Self::StaleTarget => "E2001",
            Self::NetworkFailure => "E3001",
            Self::PermissionDenied => "E3002",
            Self::FeedDisconnected => "E3003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and feedback toasts.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ValidationFailed => "Task fields are invalid",
            Self::NetworkFailure => "Remote store unreachable",
            Self::PermissionDenied => "Not allowed to change this task",
            Self::StaleTarget => "Task no longer exists",
            Self::FeedDisconnected => "Live updates disconnected",
            Self::ConfigParseError => "Config file parse error",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ValidationFailed => Some("Give the task a non-empty title."),
            Self::NetworkFailure => Some("Check connectivity and retry the change."),
            Self::PermissionDenied => Some("Ask the task owner or a space admin for access."),
            Self::StaleTarget => None,
            Self::FeedDisconnected => Some("Reconnection is automatic; no action needed."),
            Self::ConfigParseError => Some("Fix syntax in huddle.toml and retry."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failure reported by the remote store for a read or write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Transient transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// The remote refused the write for the current user.
    #[error("permission denied: {0}")]
    Permission(String),

    /// The target record does not exist on the remote.
    #[error("record not found: {0}")]
    NotFound(String),
}

/// A mutation the caller asked for did not take effect.
///
/// By the time a caller sees this, any optimistic change has already been
/// rolled back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    #[error("{}: {0}", ErrorCode::ValidationFailed.code())]
    Validation(String),

    #[error("{}: {0}", ErrorCode::NetworkFailure.code())]
    Network(String),

    #[error("{}: {0}", ErrorCode::PermissionDenied.code())]
    Permission(String),

    /// The remote answered with an acknowledgement of the wrong kind.
    #[error("{}: {0}", ErrorCode::InternalUnexpected.code())]
    Internal(String),
}

impl MutationError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::ValidationFailed,
            Self::Network(_) => ErrorCode::NetworkFailure,
            Self::Permission(_) => ErrorCode::PermissionDenied,
            Self::Internal(_) => ErrorCode::InternalUnexpected,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    /// Map a remote write failure onto the caller-facing taxonomy.
    ///
    /// `NotFound` is not a failure at this level; callers resolve it as a
    /// stale target before reaching here, so it degrades to a network error.
    #[must_use]
    pub fn from_remote(err: RemoteError) -> Self {
        match err {
            RemoteError::Network(msg) | RemoteError::NotFound(msg) => Self::Network(msg),
            RemoteError::Permission(msg) => Self::Permission(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::ValidationFailed,
            ErrorCode::NetworkFailure,
            ErrorCode::PermissionDenied,
            ErrorCode::StaleTarget,
            ErrorCode::FeedDisconnected,
            ErrorCode::ConfigParseError,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::StaleTarget.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn remote_failures_map_to_mutation_errors() {
        let err = MutationError::from_remote(RemoteError::Permission("not owner".into()));
        assert_eq!(err.code(), ErrorCode::PermissionDenied);
        assert_eq!(err.to_string(), "E3002: not owner");

        let err = MutationError::from_remote(RemoteError::Network("timeout".into()));
        assert_eq!(err.code(), ErrorCode::NetworkFailure);
        assert!(err.hint().is_some());
    }
}
