//! Core utilities and common types for the council engines.

pub mod constants;
pub mod error;
pub mod telemetry;
pub mod types;

pub use constants::*;
pub use error::{Error, Result};
pub use types::*;
