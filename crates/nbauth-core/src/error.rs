use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Settings not provided: missing `{field}`")]
    ConfigurationMissing { field: &'static str },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Token nonce does not match the pending flow")]
    NonceMismatch,

    #[error("Reused token is expired or carries no expiry")]
    StaleToken,

    #[error("Identity provider reported an error: {error}{}", detail(description.as_deref()))]
    ProviderError {
        error: String,
        description: Option<String>,
    },

    #[error("Timed out after {}s awaiting access token", waited.as_secs_f32())]
    Timeout { waited: Duration },

    #[error("API request failed with status {status}: {body}")]
    UpstreamApi { status: u16, body: String },

    #[error("Invalid token payload: {0}")]
    InvalidPayload(String),

    #[error("Token listener error: {0}")]
    Listener(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

fn detail(description: Option<&str>) -> String {
    description.map(|d| format!(" ({d})")).unwrap_or_default()
}

impl AuthError {
    /// Failures the caller can recover from by checking the flow again later.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AuthError::Timeout { .. })
    }
}
