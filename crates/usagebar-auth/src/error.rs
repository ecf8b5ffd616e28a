//! Error types for the auth crate.
//!
//! All auth operations surface errors through [`AuthError`]. The consumer
//! interface on [`TokenStore`](crate::TokenStore) converts them to `bool` or
//! `Option` results; [`AuthError::kind`] and [`AuthError::user_message`]
//! exist for hosts that want to log or display the reason.

/// Coarse classification of an [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The attempt could not be set up (port bind, config, concurrency).
    Setup,
    /// The token endpoint could not be reached.
    Transport,
    /// The token endpoint answered with something unusable.
    Protocol,
    /// The authorization redirect was rejected or never arrived.
    Validation,
    /// Secure storage failed.
    Storage,
}

/// Unified error type for the usagebar auth crate.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    // -- Setup --------------------------------------------------------------
    /// The redirect listener could not bind its fixed loopback port.
    #[error("failed to bind redirect listener on port {port}: {source}")]
    Bind {
        /// The port we tried to bind.
        port: u16,
        /// The underlying socket error.
        source: std::io::Error,
    },

    /// Another authentication attempt is already running in this process.
    #[error("an authentication attempt is already in progress")]
    InProgress,

    /// Configuration is missing or malformed.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// URL parsing error.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// The system CSPRNG failed.
    #[error("secure random generation failed")]
    Random,

    // -- Transport ----------------------------------------------------------
    /// An HTTP request to the token endpoint failed in transit.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    // -- Protocol -----------------------------------------------------------
    /// The token endpoint answered with a non-200 status.
    #[error("token endpoint returned HTTP {status}: {reason}")]
    Protocol {
        /// HTTP status code.
        status: u16,
        /// OAuth error description or raw body.
        reason: String,
    },

    /// The token endpoint answered 200 with a body we could not parse.
    #[error("malformed token response: {reason}")]
    MalformedResponse {
        /// Parser message.
        reason: String,
    },

    // -- Validation ---------------------------------------------------------
    /// The authorization server reported an error on the redirect.
    #[error("authorization denied: {reason}")]
    Denied {
        /// The `error` parameter of the redirect.
        reason: String,
    },

    /// The redirect carried a state that does not match this attempt.
    #[error("state parameter mismatch")]
    StateMismatch,

    /// The redirect carried neither a code nor an error.
    #[error("authorization code missing from redirect")]
    MissingCode,

    /// No redirect arrived before the deadline.
    #[error("no authorization response within {timeout_secs} seconds")]
    Timeout {
        /// How many seconds we waited.
        timeout_secs: u64,
    },

    /// The redirect listener stopped without delivering a result.
    #[error("redirect listener closed before a result was delivered")]
    ListenerClosed,

    // -- Storage ------------------------------------------------------------
    /// Secure storage failed.
    #[error("credential storage error: {0}")]
    Storage(#[from] usagebar_vault::VaultError),

    /// The persisted credential could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuthError {
    /// Classify this error into the five failure families.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Bind { .. }
            | Self::InProgress
            | Self::InvalidConfig { .. }
            | Self::UrlParse(_)
            | Self::Random => ErrorKind::Setup,
            Self::Network(_) => ErrorKind::Transport,
            Self::Protocol { .. } | Self::MalformedResponse { .. } => ErrorKind::Protocol,
            Self::Denied { .. }
            | Self::StateMismatch
            | Self::MissingCode
            | Self::Timeout { .. }
            | Self::ListenerClosed => ErrorKind::Validation,
            Self::Storage(_) | Self::Serialization(_) => ErrorKind::Storage,
        }
    }

    /// A short, user-facing reason for a failed login.
    pub fn user_message(&self) -> String {
        match self {
            Self::Bind { port, .. } => {
                format!("Port {port} is busy. Close other login windows and try again.")
            }
            Self::InProgress => "A login is already in progress.".to_string(),
            Self::InvalidConfig { reason } => format!("Login is misconfigured: {reason}."),
            Self::UrlParse(_) | Self::Random => "Login could not be started.".to_string(),
            Self::Network(_) => "Could not reach the sign-in server.".to_string(),
            Self::Protocol { .. } | Self::MalformedResponse { .. } => {
                "The sign-in server rejected the request.".to_string()
            }
            Self::Denied { reason } => format!("Authorization was denied ({reason})."),
            Self::StateMismatch => "Login response did not match this attempt.".to_string(),
            Self::MissingCode => "Login response was incomplete.".to_string(),
            Self::Timeout { .. } => "Login timed out.".to_string(),
            Self::ListenerClosed => "Login was interrupted.".to_string(),
            Self::Storage(_) | Self::Serialization(_) => {
                "Could not save the login credential.".to_string()
            }
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AuthError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
