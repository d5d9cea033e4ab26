//! `cadence-core` — configuration and error types shared by the scheduler
//! engine and the `cadence` host binary.

pub mod config;
pub mod error;

pub use config::{CadenceConfig, LoggingConfig, SchedulerConfig};
pub use error::{CadenceError, Result};
