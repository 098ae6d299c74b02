//! HTTP middleware components.
//!
//! Middleware are functions that run before route handlers.
//! They can:
//! - Authenticate requests
//! - Short-circuit requests (reject unsigned interactions)

/// Ed25519 interaction signature verification
pub mod signature;
