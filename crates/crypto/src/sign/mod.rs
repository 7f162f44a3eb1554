// Path: crates/crypto/src/sign/mod.rs
//! Node and accessor signatures.

pub mod external;
pub mod local;
pub mod pkcs1;

pub use self::external::HttpExternalSigner;
pub use self::local::LocalSigner;
pub use self::pkcs1::{verify_sha256, RsaPublic};
