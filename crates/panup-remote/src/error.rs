use panup_core::error::PanupError;

/// Errors from the drive API and the object store.
///
/// `Http` and `Api` are transport-level: the request never produced a usable
/// answer. `Business` means the service answered and said no.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("request rejected: code={code}, status={status}: {message}")]
    Business {
        code: i64,
        status: i64,
        message: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed response: {0}")]
    Protocol(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("all access tokens have failed")]
    AllCredentialsExhausted,

    #[error(transparent)]
    Core(#[from] PanupError),
}

impl RemoteError {
    /// The request did not get a well-formed answer from the service.
    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Http(_) | RemoteError::Api { .. })
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;
