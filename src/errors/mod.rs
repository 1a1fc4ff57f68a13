//! # Error Handling
//!
//! Error types for keyward. Every fallible operation returns [`Result`], whose
//! error side is the [`KeywardError`] taxonomy.

pub mod types;

pub use types::{BackendErrorCode, KeywardError, Result};
