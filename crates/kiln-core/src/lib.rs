//! Kiln Core - Foundational types for the Kiln asset gateway
//!
//! This crate provides the pieces every other Kiln crate depends on:
//! - `KilnError` - the error taxonomy shared by the resolver, dispatcher and job runner
//! - Timestamp helpers for status records and log lines
//! - SHA-256 content digests for generated artifacts

mod digest;
mod error;
pub mod time;

pub use digest::{sha256_file, sha256_prefixed};
pub use error::{KilnError, Result};
