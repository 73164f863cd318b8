/// Error codes for time utility operations (9200-9219)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUtilErrorCode {
    /// A value (timezone id, calendar field) was rejected (9200)
    InvalidValues = 9200,
    /// Arithmetic limit reached or calendar failure (9201)
    Unknown = 9201,
    /// Listener or subscription does not exist (9202)
    NotFound = 9202,
}

impl std::fmt::Display for TimeUtilErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as i32)
    }
}

/// Errors surfaced by `TimeDuration`, `TzDate` and `TimeUtil`
#[derive(Debug, thiserror::Error, deno_error::JsError)]
pub enum TimeUtilError {
    #[error("[{code}] InvalidValuesError: {message}")]
    #[class(generic)]
    InvalidValues {
        code: TimeUtilErrorCode,
        message: String,
    },

    #[error("[{code}] UnknownError: {message}")]
    #[class(generic)]
    Unknown {
        code: TimeUtilErrorCode,
        message: String,
    },

    #[error("[{code}] NotFoundError: {message}")]
    #[class(generic)]
    NotFound {
        code: TimeUtilErrorCode,
        message: String,
    },
}

impl TimeUtilError {
    pub fn invalid_values(message: impl Into<String>) -> Self {
        Self::InvalidValues {
            code: TimeUtilErrorCode::InvalidValues,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            code: TimeUtilErrorCode::Unknown,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            code: TimeUtilErrorCode::NotFound,
            message: message.into(),
        }
    }

    pub fn code(&self) -> TimeUtilErrorCode {
        match self {
            Self::InvalidValues { code, .. }
            | Self::Unknown { code, .. }
            | Self::NotFound { code, .. } => *code,
        }
    }
}
