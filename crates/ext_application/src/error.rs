//! Caller-visible failures of the application module.

/// Error codes for application operations (9100-9119)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationErrorCode {
    /// Missing or malformed argument (9100)
    InvalidArgument = 9100,
    /// Application, context or listener does not exist (9101)
    NotFound = 9101,
    /// Operation denied by policy or platform (9102)
    Security = 9102,
    /// Platform service failed (9103)
    Platform = 9103,
    /// Anything else (9104)
    Unknown = 9104,
}

impl std::fmt::Display for ApplicationErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as i32)
    }
}

/// The error kind scripts observe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Security,
    Platform,
    Unknown,
}

/// Errors that can occur during application operations
#[derive(Debug, Clone, thiserror::Error, deno_error::JsError)]
pub enum ApplicationError {
    #[error("[{code}] InvalidValuesError: {message}")]
    #[class(generic)]
    InvalidArgument {
        code: ApplicationErrorCode,
        message: String,
    },

    #[error("[{code}] NotFoundError: {message}")]
    #[class(generic)]
    NotFound {
        code: ApplicationErrorCode,
        message: String,
    },

    #[error("[{code}] SecurityError: {message}")]
    #[class(generic)]
    Security {
        code: ApplicationErrorCode,
        message: String,
    },

    #[error("[{code}] ServiceNotAvailableError: {message}")]
    #[class(generic)]
    Platform {
        code: ApplicationErrorCode,
        message: String,
    },

    #[error("[{code}] UnknownError: {message}")]
    #[class(generic)]
    Unknown {
        code: ApplicationErrorCode,
        message: String,
    },
}

impl ApplicationError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            code: ApplicationErrorCode::InvalidArgument,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            code: ApplicationErrorCode::NotFound,
            message: message.into(),
        }
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::Security {
            code: ApplicationErrorCode::Security,
            message: message.into(),
        }
    }

    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            code: ApplicationErrorCode::Platform,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            code: ApplicationErrorCode::Unknown,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Security { .. } => ErrorKind::Security,
            Self::Platform { .. } => ErrorKind::Platform,
            Self::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    pub fn code(&self) -> ApplicationErrorCode {
        match self {
            Self::InvalidArgument { code, .. }
            | Self::NotFound { code, .. }
            | Self::Security { code, .. }
            | Self::Platform { code, .. }
            | Self::Unknown { code, .. } => *code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_carries_code_and_name() {
        let err = ApplicationError::platform("aul_open_app() failed");
        assert_eq!(
            err.to_string(),
            "[9103] ServiceNotAvailableError: aul_open_app() failed"
        );
        assert_eq!(err.kind(), ErrorKind::Platform);
        assert_eq!(err.code(), ApplicationErrorCode::Platform);
    }
}
