//! Logging setup on top of the `log` facade with an `env_logger` backend.
//!
//! `RUST_LOG` wins when set. Otherwise `--quiet` selects errors only and
//! each `-v` raises the level one step above info.

use env_logger::Builder;
use log::LevelFilter;
use std::env;

/// Initialize logging once at process start. Later calls are ignored.
pub fn init_logging(verbose: u8, quiet: bool) {
    let mut builder = Builder::new();

    if env::var("RUST_LOG").is_ok() {
        builder.parse_default_env();
    } else {
        builder.filter_level(determine_level(verbose, quiet));
    }

    builder.format_timestamp_secs().format_target(verbose > 0);

    if builder.try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}

fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}
