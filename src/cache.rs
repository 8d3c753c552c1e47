//! In-memory JWKS cache backing the token verifier.

pub mod entry;
pub mod manager;

pub use manager::{CacheSnapshot, JwksCache};
