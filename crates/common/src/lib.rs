//! Shared types for the ViCare authentication workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
