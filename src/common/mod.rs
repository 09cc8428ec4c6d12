//! Common Infrastructure Module
//!
//! Shared utilities and configuration for depositd.
//!
//! This module contains:
//! - Configuration loading from environment variables
//! - Structured logging setup
//! - The root error type

pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::{ConfigError, DepositdConfig, NetworkConfig, ScheduleConfig, UpstreamConfig};
pub use error::{DepositdError, Result};
pub use logging::{
    generate_correlation_id, init_from_config, init_logging, log_deposit_event, log_scan_event,
    log_security_event, log_sweep_event, ErrorDetails, EventCategory, LogEvent, LogLevel,
    LoggingError,
};
