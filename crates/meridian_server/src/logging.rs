//! Logging system setup and configuration
//!
//! This module handles the initialization of the tracing-based logging
//! system used throughout the server for debugging, monitoring, and
//! diagnostic output.

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Args, LoggingSettings};

/// Initialize the logging system
///
/// Sets up structured logging using the tracing crate with configurable
/// output format and filtering levels. The logging level can be controlled
/// through command-line arguments or environment variables.
///
/// # Arguments
/// * `args` - Command line arguments containing debug flag
///
/// # Environment Variables
/// * `RUST_LOG` - Override the default logging filter (e.g., "debug", "my_crate=trace")
pub fn setup_logging(args: &Args) -> Result<()> {
    setup_logging_with_format(args, None)
}

/// Initialize logging honoring the configuration file's logging section
///
/// Level precedence: `RUST_LOG` environment variable, then the `--debug`
/// flag, then the configured level, then "info". When `json_format` is
/// set, logs are emitted as structured JSON for log aggregation systems.
///
/// # Arguments
/// * `args` - Command line arguments containing debug flag
/// * `logging` - Optional logging section from the configuration file
pub fn setup_logging_with_format(args: &Args, logging: Option<&LoggingSettings>) -> Result<()> {
    let level = if args.debug {
        "debug"
    } else {
        logging.map(|settings| settings.level.as_str()).unwrap_or("info")
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let json_format = logging.map(|settings| settings.json_format).unwrap_or(false);

    // A second initialization (e.g. across tests) is a no-op.
    if json_format {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(false))
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init();
    }

    Ok(())
}
