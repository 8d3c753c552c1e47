//! HTTP helpers for JWKS retrieval: the fetch itself, retry budgeting, and cache semantics.

pub mod client;
pub mod retry;
pub mod semantics;
