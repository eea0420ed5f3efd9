//! What an upload call hands back.
//!
//! Callers never see a raw error: every failure is folded into a
//! [`UploadResult::Fail`] carrying a stable machine-readable code.

use panup_remote::RemoteError;
use serde::Serialize;
use serde_json::{Map, Value};

pub const OK: &str = "OK";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UploadResult {
    Ok { data: Map<String, Value> },
    Fail { code: String, message: String },
}

impl UploadResult {
    pub fn ok(mut data: Map<String, Value>) -> Self {
        data.remove("preview_url");
        UploadResult::Ok { data }
    }

    pub fn success(&self) -> bool {
        matches!(self, UploadResult::Ok { .. })
    }

    pub fn code(&self) -> &str {
        match self {
            UploadResult::Ok { .. } => OK,
            UploadResult::Fail { code, .. } => code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            UploadResult::Ok { .. } => "upload complete",
            UploadResult::Fail { message, .. } => message,
        }
    }

    pub fn data(&self) -> Option<&Map<String, Value>> {
        match self {
            UploadResult::Ok { data } => Some(data),
            UploadResult::Fail { .. } => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("cannot open local file: {0}")]
    FileOpen(std::io::Error),

    #[error("cannot stat local file: {0}")]
    FileInfo(std::io::Error),

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("failed to prepare directory {path}: {source}")]
    CreateDirectory { path: String, source: RemoteError },

    #[error("pre-upload failed: {0}")]
    PreUpload(RemoteError),

    #[error("failed to hash local file: {0}")]
    CalculateHash(std::io::Error),

    #[error("hash verification failed: {0}")]
    HashVerification(RemoteError),

    #[error("failed to read local file: {0}")]
    ReadFile(std::io::Error),

    #[error("part {part} failed: {source}")]
    UploadPart { part: u32, source: RemoteError },

    #[error("commit failed: {0}")]
    CommitUpload(RemoteError),

    #[error("finish failed: {0}")]
    FinishUpload(RemoteError),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("all access tokens have been rejected")]
    AllCredentialsExhausted,

    #[error("session state error: {0}")]
    State(String),
}

impl UploadError {
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::FileOpen(_) => "FILE_OPEN_ERROR",
            UploadError::FileInfo(_) => "FILE_INFO_ERROR",
            UploadError::PathNotFound(_) => "PATH_NOT_FOUND",
            UploadError::NotADirectory(_) => "NOT_A_DIRECTORY",
            UploadError::CreateDirectory { .. } => "CREATE_DIRECTORY_ERROR",
            UploadError::PreUpload(_) => "PRE_UPLOAD_ERROR",
            UploadError::CalculateHash(_) => "CALCULATE_HASH_ERROR",
            UploadError::HashVerification(_) => "HASH_VERIFICATION_ERROR",
            UploadError::ReadFile(_) => "READ_FILE_ERROR",
            UploadError::UploadPart { .. } => "UPLOAD_PART_ERROR",
            UploadError::CommitUpload(_) => "COMMIT_UPLOAD_ERROR",
            UploadError::FinishUpload(_) => "FINISH_UPLOAD_ERROR",
            UploadError::AuthFailed(_) => "AUTH_FAILED",
            UploadError::AllCredentialsExhausted => "ALL_CREDENTIALS_EXHAUSTED",
            UploadError::State(_) => "STATE_ERROR",
        }
    }

    /// Failures of the transfer loop. Progress was persisted, so re-running
    /// the same upload continues from the failed part.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, UploadError::ReadFile(_) | UploadError::UploadPart { .. })
    }

    /// Classify a drive error raised during `step`. Credential failures keep
    /// their own codes whichever step hit them.
    pub(crate) fn remote(step: impl FnOnce(RemoteError) -> UploadError, e: RemoteError) -> Self {
        match e {
            RemoteError::AuthFailed(message) => UploadError::AuthFailed(message),
            RemoteError::AllCredentialsExhausted => UploadError::AllCredentialsExhausted,
            other => step(other),
        }
    }
}

impl From<UploadError> for UploadResult {
    fn from(e: UploadError) -> Self {
        UploadResult::Fail {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}
