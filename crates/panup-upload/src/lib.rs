//! Resumable, hash-chained uploads to the cloud drive.
//!
//! [`Uploader`] drives one file from negotiation to the finished remote
//! entry, persisting a resume record after every accepted part.

pub mod orchestrator;
pub mod progress;
pub mod resolver;
pub mod result;

pub use orchestrator::{FileDigests, Uploader, destination, file_digests};
pub use progress::{ProgressMeter, UploadProgress, format_duration, format_speed};
pub use resolver::{PAGE_SIZE, PathResolver, ResolveError};
pub use result::{UploadError, UploadResult};
