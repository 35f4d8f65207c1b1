// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session configuration and bridge-wide timing constants.

use std::env;
use std::ffi::CString;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::buffer::c_string;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Default reply window of a query.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound of the grace margin added to a query timeout.
pub const MAX_QUERY_GRACE: Duration = Duration::from_millis(250);

/// Default time allowed for the native session open.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default scouting window.
pub const DEFAULT_SCOUT_TIMEOUT: Duration = Duration::from_secs(1);

/// Environment variables read by [`SessionConfig::from_env`].
pub const ENV_MODE: &str = "ZBRIDGE_MODE";
pub const ENV_ENDPOINTS: &str = "ZBRIDGE_ENDPOINTS";
pub const ENV_CONFIG: &str = "ZBRIDGE_CONFIG";
pub const ENV_OPEN_TIMEOUT_MS: &str = "ZBRIDGE_OPEN_TIMEOUT_MS";

/// Deadline after which a query stream is closed: `timeout + min(timeout / 10, 250 ms)`.
pub fn query_deadline(timeout: Duration) -> Duration {
    let grace = (timeout / 10).min(MAX_QUERY_GRACE);
    timeout.saturating_add(grace)
}

/// Session role in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    #[default]
    Peer,
    Client,
    Router,
}

impl Mode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Mode::Peer => "peer",
            Mode::Client => "client",
            Mode::Router => "router",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "peer" => Ok(Mode::Peer),
            "client" => Ok(Mode::Client),
            "router" => Ok(Mode::Router),
            other => Err(Error::InvalidConfig(format!("unknown mode '{}'", other))),
        }
    }
}

/// Arguments for the native open call.
pub(crate) enum OpenArgs {
    /// JSON5 mode value plus JSON endpoint list (may be empty).
    Mode { mode: CString, endpoints: CString },
    /// Complete engine configuration document.
    Config(CString),
}

/// Configuration used by [`Bridge::open`](crate::Bridge::open).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use zbridge::{Mode, SessionConfig};
///
/// let config = SessionConfig::new(Mode::Client)
///     .endpoint("tcp/127.0.0.1:7447")
///     .open_timeout(Duration::from_secs(5));
/// assert_eq!(config.endpoints().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    mode: Mode,
    endpoints: Vec<String>,
    raw_config: Option<String>,
    open_timeout: Duration,
    retry: Option<RetryPolicy>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(Mode::default())
    }
}

impl SessionConfig {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            endpoints: Vec::new(),
            raw_config: None,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            retry: None,
        }
    }

    /// Add an endpoint. Peers listen on it, clients and routers connect to it.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    pub fn endpoints_from<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints.extend(endpoints.into_iter().map(Into::into));
        self
    }

    /// Use a full engine configuration document instead of mode/endpoints.
    pub fn raw_config(mut self, config: impl Into<String>) -> Self {
        self.raw_config = Some(config.into());
        self
    }

    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Retry the native open with this policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn get_raw_config(&self) -> Option<&str> {
        self.raw_config.as_deref()
    }

    pub fn get_open_timeout(&self) -> Duration {
        self.open_timeout
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    /// Build a configuration from `ZBRIDGE_*` environment variables.
    ///
    /// Unset variables keep their defaults; malformed ones are rejected.
    pub fn from_env() -> Result<Self> {
        let mut config = match env::var(ENV_MODE) {
            Ok(mode) => Self::new(mode.parse()?),
            Err(_) => Self::default(),
        };

        if let Ok(endpoints) = env::var(ENV_ENDPOINTS) {
            config = config.endpoints_from(
                endpoints
                    .split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string),
            );
        }

        if let Ok(raw) = env::var(ENV_CONFIG) {
            if !raw.trim().is_empty() {
                config = config.raw_config(raw);
            }
        }

        if let Ok(ms) = env::var(ENV_OPEN_TIMEOUT_MS) {
            let ms: u64 = ms.trim().parse().map_err(|_| {
                Error::InvalidConfig(format!("{} must be milliseconds, got '{}'", ENV_OPEN_TIMEOUT_MS, ms))
            })?;
            config = config.open_timeout(Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.open_timeout.is_zero() {
            return Err(Error::InvalidConfig("open timeout must be non-zero".into()));
        }
        if self.endpoints.iter().any(|e| e.trim().is_empty()) {
            return Err(Error::InvalidConfig("empty endpoint".into()));
        }
        Ok(())
    }

    pub(crate) fn open_args(&self) -> Result<OpenArgs> {
        if let Some(raw) = &self.raw_config {
            return Ok(OpenArgs::Config(c_string(raw, "engine config")?));
        }
        let mode = serde_json::to_string(self.mode.as_str())
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let endpoints = if self.endpoints.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&self.endpoints).map_err(|e| Error::InvalidConfig(e.to_string()))?
        };
        Ok(OpenArgs::Mode {
            mode: c_string(&mode, "mode")?,
            endpoints: c_string(&endpoints, "endpoints")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_deadline_grace_is_capped() {
        assert_eq!(
            query_deadline(Duration::from_millis(50)),
            Duration::from_millis(55)
        );
        assert_eq!(
            query_deadline(Duration::from_secs(10)),
            Duration::from_millis(10_250)
        );
        assert_eq!(query_deadline(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("Client".parse::<Mode>().unwrap(), Mode::Client);
        assert_eq!(" router ".parse::<Mode>().unwrap(), Mode::Router);
        assert!(matches!(
            "mesh".parse::<Mode>(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn open_args_encode_mode_and_endpoints_as_json() {
        let config = SessionConfig::new(Mode::Client)
            .endpoint("tcp/10.0.0.1:7447")
            .endpoint("udp/10.0.0.2:7447");
        match config.open_args().unwrap() {
            OpenArgs::Mode { mode, endpoints } => {
                assert_eq!(mode.to_str().unwrap(), "\"client\"");
                assert_eq!(
                    endpoints.to_str().unwrap(),
                    r#"["tcp/10.0.0.1:7447","udp/10.0.0.2:7447"]"#
                );
            }
            OpenArgs::Config(_) => panic!("expected mode arguments"),
        }
    }

    #[test]
    fn raw_config_takes_precedence() {
        let config = SessionConfig::new(Mode::Peer)
            .endpoint("tcp/0.0.0.0:0")
            .raw_config("{mode: 'router'}");
        assert!(matches!(config.open_args().unwrap(), OpenArgs::Config(_)));
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let config = SessionConfig::default().open_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn from_env_reads_variables() {
        // Only this test touches ZBRIDGE_* variables.
        env::set_var(ENV_MODE, "client");
        env::set_var(ENV_ENDPOINTS, "tcp/a:1, tcp/b:2,");
        env::set_var(ENV_OPEN_TIMEOUT_MS, "1500");
        env::remove_var(ENV_CONFIG);

        let config = SessionConfig::from_env().unwrap();
        assert_eq!(config.mode(), Mode::Client);
        assert_eq!(config.endpoints(), &["tcp/a:1".to_string(), "tcp/b:2".to_string()]);
        assert_eq!(config.get_open_timeout(), Duration::from_millis(1500));

        env::set_var(ENV_OPEN_TIMEOUT_MS, "soon");
        assert!(matches!(
            SessionConfig::from_env(),
            Err(Error::InvalidConfig(_))
        ));

        for var in [ENV_MODE, ENV_ENDPOINTS, ENV_OPEN_TIMEOUT_MS] {
            env::remove_var(var);
        }
    }
}
