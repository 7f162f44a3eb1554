// Path: crates/api/src/error/mod.rs
// Re-export all core error types from the central types crate.
pub use ndid_types::error::{
    ConfigError, CryptoError, ErrorClass, ErrorCode, IntegrityError, RequestError,
};
pub use ndid_types::Result;
