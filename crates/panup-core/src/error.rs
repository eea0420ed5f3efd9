use thiserror::Error;

#[derive(Debug, Error)]
pub enum PanupError {
    // IO
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Config
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found at {0}; run `panup init` first")]
    ConfigNotFound(String),

    #[error("TOML deserialization error: {0}")]
    TomlDe(String),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),

    // Credentials
    #[error("No access tokens configured")]
    NoCredentials,

    #[error("All access tokens have failed")]
    AllCredentialsExhausted,

    // Hash context
    #[error("Invalid hash state: {0}")]
    InvalidHashState(String),

    // Resume store
    #[error("Session store error: {0}")]
    SessionStore(String),

    // Serialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PanupError>;
