use thiserror::Error;

use crate::transport::TransportError;

/// Stable numeric identifiers callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    DuplicateInstall,
    AppNotFound,
    UnknownApplication,
    InvalidField,
    InvalidArgument,
    MissingCredentials,
    InvalidState,
    TransportError,
    RemoteRejected,
    Persistence,
}

impl ErrorCode {
    pub const APP_WAS_NOT_FOUND: u32 = 3001;

    pub const fn as_u32(self) -> u32 {
        match self {
            Self::AppNotFound => Self::APP_WAS_NOT_FOUND,
            Self::DuplicateInstall => 3002,
            Self::UnknownApplication => 3003,
            Self::InvalidField => 3004,
            Self::InvalidArgument => 3005,
            Self::MissingCredentials => 3006,
            Self::InvalidState => 3007,
            Self::TransportError => 3008,
            Self::RemoteRejected => 3009,
            Self::Persistence => 3010,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateInstall => "duplicate_install",
            Self::AppNotFound => "app_not_found",
            Self::UnknownApplication => "unknown_application",
            Self::InvalidField => "invalid_field",
            Self::InvalidArgument => "invalid_argument",
            Self::MissingCredentials => "missing_credentials",
            Self::InvalidState => "invalid_state",
            Self::TransportError => "transport_error",
            Self::RemoteRejected => "remote_rejected",
            Self::Persistence => "persistence",
        }
    }

    /// Validation and lookup failures the caller can fix by changing the request.
    pub const fn is_caller_correctable(self) -> bool {
        matches!(
            self,
            Self::DuplicateInstall
                | Self::AppNotFound
                | Self::UnknownApplication
                | Self::InvalidField
                | Self::InvalidArgument
                | Self::MissingCredentials
                | Self::InvalidState
        )
    }
}

#[derive(Debug, Error)]
pub enum AppStoreError {
    #[error("application '{key}' is already installed for user '{user}'")]
    DuplicateInstall { key: String, user: String },
    #[error("application '{key}' was not found for user '{user}'")]
    AppNotFound { key: String, user: String },
    #[error("application '{key}' is not registered")]
    UnknownApplication { key: String },
    #[error("field '{form}.{field}' is not declared by application '{key}'")]
    InvalidField {
        key: String,
        form: String,
        field: String,
    },
    #[error("{message}")]
    InvalidArgument { message: String },
    #[error("application '{key}' is missing credentials: {}", fields.join(", "))]
    MissingCredentials { key: String, fields: Vec<String> },
    #[error("{message}")]
    InvalidState { message: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("remote rejected request ({status}): {body}")]
    RemoteRejected { status: u16, body: String },
    #[error("{message}")]
    Persistence { message: String },
}

impl AppStoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::DuplicateInstall { .. } => ErrorCode::DuplicateInstall,
            Self::AppNotFound { .. } => ErrorCode::AppNotFound,
            Self::UnknownApplication { .. } => ErrorCode::UnknownApplication,
            Self::InvalidField { .. } => ErrorCode::InvalidField,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::MissingCredentials { .. } => ErrorCode::MissingCredentials,
            Self::InvalidState { .. } => ErrorCode::InvalidState,
            Self::Transport(_) => ErrorCode::TransportError,
            Self::RemoteRejected { .. } => ErrorCode::RemoteRejected,
            Self::Persistence { .. } => ErrorCode::Persistence,
        }
    }

    pub(crate) fn not_found(key: &str, user: &str) -> Self {
        Self::AppNotFound {
            key: key.to_string(),
            user: user.to_string(),
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub(crate) fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }
}

pub type Result<T, E = AppStoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    const ALL: [ErrorCode; 10] = [
        ErrorCode::DuplicateInstall,
        ErrorCode::AppNotFound,
        ErrorCode::UnknownApplication,
        ErrorCode::InvalidField,
        ErrorCode::InvalidArgument,
        ErrorCode::MissingCredentials,
        ErrorCode::InvalidState,
        ErrorCode::TransportError,
        ErrorCode::RemoteRejected,
        ErrorCode::Persistence,
    ];

    #[test]
    fn error_codes_are_unique() {
        let mut numbers = HashSet::new();
        let mut names = HashSet::new();
        for code in ALL {
            assert!(numbers.insert(code.as_u32()), "duplicate numeric code {code:?}");
            assert!(names.insert(code.as_str()), "duplicate string code {code:?}");
        }
    }

    #[test]
    fn app_not_found_carries_stable_code() {
        let error = AppStoreError::not_found("null", "user");
        assert_eq!(error.code(), ErrorCode::AppNotFound);
        assert_eq!(error.code().as_u32(), ErrorCode::APP_WAS_NOT_FOUND);
        assert!(error.code().is_caller_correctable());
        assert!(!ErrorCode::TransportError.is_caller_correctable());
    }
}
