//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, shared state)
//! 2. Calls into the key lifecycle service
//! 3. Returns an HTTP response (JSON, status code)

/// Liveness and database connectivity
pub mod health;
/// Discord interactions endpoint
pub mod interactions;
