//! The `utils` module provides shared building blocks used across `meshsub`:
//! the crate-wide error type and logging initialisation.

pub mod error;
pub mod logging;

pub use error::{BrokerError, Result};
