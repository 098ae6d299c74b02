//! Business logic services.
//!
//! Services contain the key lifecycle separated from HTTP handlers, the
//! store they persist through, and the platform collaborators they call.

pub mod discord;
pub mod expiry;
pub mod key_store;
pub mod lifecycle;
pub mod platform;
