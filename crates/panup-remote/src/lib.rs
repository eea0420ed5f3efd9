//! Remote side of an upload: the drive's metadata API and the object store
//! that receives the bytes.
//!
//! [`DriveApi`] is the seam the upload engine talks to. [`HttpDrive`] speaks
//! the real protocol over `reqwest`. With the `testing` feature,
//! `MemoryDrive` keeps a whole drive in memory for tests.

pub mod error;
pub mod headers;
pub mod http;
pub mod liveness;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod provider;
pub mod types;

pub use error::{RemoteError, Result};
pub use headers::{ObjectRequest, assemble_headers, canonical_string, oss_date};
pub use http::HttpDrive;
pub use liveness::Liveness;
#[cfg(any(test, feature = "testing"))]
pub use memory::{DriveStats, MemoryDrive, PartFault};
pub use provider::DriveApi;
pub use types::{ListPage, ObjectTarget, PreUpload, PreUploadRequest};
