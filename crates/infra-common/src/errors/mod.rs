//! Error handling for infrastructure helpers

pub mod types;

pub use types::{Error, Result};
