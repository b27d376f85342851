//! Logging setup for the `dedup` binary.
//!
//! Library code only uses the `log` facade; the binary installs `env_logger`.
//! The level is chosen in this order:
//!
//! 1. `RUST_LOG`, when set
//! 2. `--quiet` (errors only), or `-v` (debug) / `-vv` (trace)
//! 3. info
//!
//! Debug builds prefix each line with a timestamp, and with the module path
//! once `-v` is given. Release builds print level and message only.
//!
//! ```rust,no_run
//! use dedup::logging::init_logging;
//!
//! init_logging(1, false);
//! log::debug!("Scanning 3 roots");
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Environment variable that overrides the CLI flags.
pub const LOG_ENV: &str = "RUST_LOG";

/// Install the global logger.
///
/// Calling it again after a logger is installed has no effect, so tests and
/// embedders can call it freely.
pub fn init_logging(verbose: u8, quiet: bool) {
    let from_env = env::var(LOG_ENV).ok();
    let mut builder = Builder::new();

    match &from_env {
        Some(_) => {
            builder.parse_env(LOG_ENV);
        }
        None => {
            builder.filter_level(determine_level(verbose, quiet));
        }
    }
    configure_format(&mut builder, verbose);

    if builder.try_init().is_err() {
        return;
    }
    match from_env {
        Some(spec) => log::debug!("Logging configured from {LOG_ENV}={spec}"),
        None => log::debug!("Logging initialized at level: {:?}", log::max_level()),
    }
}

/// Level implied by the CLI flags. `quiet` wins over `verbose`.
fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn configure_format(builder: &mut Builder, verbose: u8) {
    #[cfg(debug_assertions)]
    builder.format(move |buf, record| {
        let timestamp = buf.timestamp_seconds();
        let level = record.level();
        let style = buf.default_level_style(level);
        if verbose >= 1 {
            writeln!(
                buf,
                "{timestamp} {style}{level:<5}{style:#} [{}] {}",
                record.module_path().unwrap_or("unknown"),
                record.args()
            )
        } else {
            writeln!(buf, "{timestamp} {style}{level:<5}{style:#} {}", record.args())
        }
    });

    #[cfg(not(debug_assertions))]
    {
        let _ = verbose;
        builder.format(|buf, record| {
            let level = record.level();
            let style = buf.default_level_style(level);
            writeln!(buf, "{style}{level:<5}{style:#} {}", record.args())
        });
    }
}

/// Name of the active maximum level, for `dedup config` output.
#[must_use]
pub fn current_level_name() -> &'static str {
    match log::max_level() {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}
