use std::fmt;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    RecordNotFound,
    InvalidPayload,
    InvalidQuery,
    NotSignedIn,
    InvalidFeed,
    CorruptStore,
    StoreWriteFailed,
    SubscriptionFailed,
    RenderFailed,
    MutationFailed,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::RecordNotFound => "E2001",
            Self::InvalidPayload => "E2002",
            Self::InvalidQuery => "E2003",
            Self::NotSignedIn => "E2004",
            Self::InvalidFeed => "E2005",
            Self::CorruptStore => "E3001",
            Self::StoreWriteFailed => "E5001",
            Self::SubscriptionFailed => "E5002",
            Self::RenderFailed => "E6001",
            Self::MutationFailed => "E6002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Project not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::RecordNotFound => "Record not found",
            Self::InvalidPayload => "Record payload does not match its schema",
            Self::InvalidQuery => "Invalid live query",
            Self::NotSignedIn => "No signed-in actor",
            Self::InvalidFeed => "Malformed change feed",
            Self::CorruptStore => "Corrupt local store",
            Self::StoreWriteFailed => "Store write failed",
            Self::SubscriptionFailed => "Subscription failed",
            Self::RenderFailed => "Render sink failure",
            Self::MutationFailed => "Mutation failed",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `rp init` to initialize this directory."),
            Self::ConfigParseError => Some("Fix syntax in .roadpulse/config.toml and retry."),
            Self::RecordNotFound | Self::RenderFailed => None,
            Self::InvalidPayload => {
                Some("Check required fields (coordinates) and ranges (congestionLevel 0-100).")
            }
            Self::InvalidQuery => Some("Use field names made of letters, digits, '_' and '.'."),
            Self::NotSignedIn => Some("Pass --actor <uid> or set [actor] in the user config."),
            Self::InvalidFeed => {
                Some("Each line must be {\"kind\":..,\"id\":..,\"payload\":..} or `---`.")
            }
            Self::CorruptStore => Some("Delete .roadpulse/store.db and run `rp init --force`."),
            Self::StoreWriteFailed => Some("Check disk space and write permissions."),
            Self::SubscriptionFailed => Some("Reopen the view to resubscribe."),
            Self::MutationFailed => Some("The triggering action already completed; retry later."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    const ALL: [ErrorCode; 13] = [
        ErrorCode::NotInitialized,
        ErrorCode::ConfigParseError,
        ErrorCode::RecordNotFound,
        ErrorCode::InvalidPayload,
        ErrorCode::InvalidQuery,
        ErrorCode::NotSignedIn,
        ErrorCode::InvalidFeed,
        ErrorCode::CorruptStore,
        ErrorCode::StoreWriteFailed,
        ErrorCode::SubscriptionFailed,
        ErrorCode::RenderFailed,
        ErrorCode::MutationFailed,
        ErrorCode::InternalUnexpected,
    ];

    #[test]
    fn all_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ALL {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        for code in ALL {
            let raw = code.code();
            assert_eq!(raw.len(), 5);
            assert!(raw.starts_with('E'));
            assert!(raw.chars().skip(1).all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn display_matches_code() {
        assert_eq!(ErrorCode::InvalidFeed.to_string(), "E2005");
    }
}
