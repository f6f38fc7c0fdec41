//! Diagnostic logging to stderr.
//!
//! `SHARECALL_LOG` takes `tracing-subscriber` filter directives and wins over
//! `--log-level`.

use std::io::IsTerminal;

use clap::ValueEnum;
use once_cell::sync::OnceCell;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter directive variable
pub const LOG_ENV: &str = "SHARECALL_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

pub fn init_logging(level: LogLevel) {
    static INITIALISED: OnceCell<()> = OnceCell::new();

    let _ = INITIALISED.get_or_init(|| {
        let use_ansi = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level.directive()));

        let subscriber = fmt::fmt()
            .with_env_filter(filter)
            .with_max_level(level.as_tracing_level())
            .with_ansi(use_ansi)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .compact()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice() {
        init_logging(LogLevel::Warn);
        init_logging(LogLevel::Trace);
        assert_eq!(LogLevel::Debug.directive(), "debug");
        assert_eq!(LogLevel::Error.as_tracing_level(), Level::ERROR);
    }
}
