//! Core types shared across the b2c-signin crates.
//!
//! Holds the strongly-typed local user identifier and the rootcause-based
//! `Result` alias used by every layer.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ParseIdError, UserId};
