use thiserror::Error;

/// Sum type for every failure mode in §7. No library-specific transport or
/// protocol types leak into this enum — unwrapping exception-group-style
/// aggregates into one of these variants happens at the task boundary (see
/// `core::session_runner`).
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("config error: {0}")]
    ConfigError(String),

    #[error("policy compile error: {0}")]
    PolicyCompileError(String),

    #[error("connection to upstream server timed out")]
    ConnectionTimeout,

    #[error("upstream session id is stale or invalid")]
    InvalidSessionId,

    #[error("upstream http error: {status} {body}")]
    HttpError { status: u16, body: String },

    #[error("upstream server requires authentication: {auth_url}")]
    AuthenticationRequired { auth_url: String },

    #[error("operation was cancelled")]
    OperationCancelled,

    #[error("operation timed out")]
    OperationTimedOut,

    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("sandbox failure: {0}")]
    SandboxFailure(String),

    #[error("security error: blocked pattern `{0}` in sandboxed script")]
    SecurityError(String),

    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<anyhow::Error> for CoreError {
    fn from(e: anyhow::Error) -> Self {
        CoreError::UpstreamFailure(e.to_string())
    }
}

impl CoreError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::PolicyCompileError(_) => "POLICY_COMPILE_ERROR",
            Self::ConnectionTimeout => "CONNECTION_TIMEOUT",
            Self::InvalidSessionId => "INVALID_SESSION_ID",
            Self::HttpError { .. } => "HTTP_ERROR",
            Self::AuthenticationRequired { .. } => "AUTHENTICATION_REQUIRED",
            Self::OperationCancelled => "OPERATION_CANCELLED",
            Self::OperationTimedOut => "OPERATION_TIMED_OUT",
            Self::UpstreamFailure(_) => "UPSTREAM_FAILURE",
            Self::SandboxFailure(_) => "SANDBOX_FAILURE",
            Self::SecurityError(_) => "SECURITY_ERROR",
            Self::ServerNotFound(_) => "SERVER_NOT_FOUND",
            Self::TransportError(_) => "TRANSPORT_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
