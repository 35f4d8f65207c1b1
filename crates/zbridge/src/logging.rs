// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Logging initialization.
//!
//! The bridge logs through the `log` facade. These helpers install an
//! `env_logger` backend for applications that do not bring their own.

use crate::error::{Error, Result};

/// Log level for bridge logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn already_initialized<E>(_: E) -> Error {
    Error::InvalidConfig("a global logger is already installed".into())
}

/// Initialize console logging at `level`.
///
/// Fails with [`Error::InvalidConfig`] if a logger is already installed.
pub fn init(level: LogLevel) -> Result<()> {
    env_logger::Builder::new()
        .filter_level(level.into())
        .format_timestamp_millis()
        .try_init()
        .map_err(already_initialized)
}

/// Initialize logging from `RUST_LOG`, falling back to `default_level`.
pub fn init_env(default_level: LogLevel) -> Result<()> {
    let filter: log::LevelFilter = default_level.into();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter.to_string()))
        .format_timestamp_millis()
        .try_init()
        .map_err(already_initialized)
}

/// Initialize logging with a filter string (e.g. `"zbridge=debug,info"`).
pub fn init_with_filter(filter: &str) -> Result<()> {
    if filter.trim().is_empty() {
        return Err(Error::InvalidArgument("empty log filter".into()));
    }
    env_logger::Builder::new()
        .parse_filters(filter)
        .format_timestamp_millis()
        .try_init()
        .map_err(already_initialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_mapping() {
        assert_eq!(log::LevelFilter::from(LogLevel::Off), log::LevelFilter::Off);
        assert_eq!(
            log::LevelFilter::from(LogLevel::Trace),
            log::LevelFilter::Trace
        );
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn empty_filter_is_rejected() {
        assert!(matches!(
            init_with_filter("  "),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn second_init_fails() {
        // First call may or may not win depending on test order.
        let _ = init(LogLevel::Warn);
        assert!(init(LogLevel::Debug).is_err());
    }
}
