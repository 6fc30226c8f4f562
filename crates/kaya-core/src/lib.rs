//! Foundational low-level utilities shared across Kaya crates.
//!
//! Provides the atomic file-write helper behind credential and secrets
//! persistence, and the timestamp it stamps temp files with.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use time_utils::current_unix_timestamp;
