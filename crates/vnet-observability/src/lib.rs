//! Logging setup for the virtual network controller
//!
//! Wraps `tracing-subscriber` so the controller and its embedding process
//! share one configuration shape:
//! - pretty, JSON or compact console output
//! - optional rotated JSON file output through `tracing-appender`
//! - `RUST_LOG` overrides the configured level
//!
//! # Quick Start
//!
//! ```no_run
//! use vnet_observability::{init_logging, LoggingConfig};
//!
//! let _guard = init_logging(&LoggingConfig::default()).expect("logging");
//! tracing::info!("controller starting");
//! ```

pub mod config;
pub mod error;
pub mod logging;

pub use config::{FileLoggingConfig, LogFormat, LogLevel, LoggingConfig, RotationStrategy};
pub use error::{ObservabilityError, Result};
pub use logging::{init_logging, LogGuard};
