pub mod config;
pub mod credentials;
pub mod error;
pub mod hash_ctx;
pub mod path;
pub mod session;
pub mod types;
