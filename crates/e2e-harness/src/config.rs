// Harness configuration
//
// Timeouts, poll cadence and browser launch settings. A config value is
// threaded from Harness into every Session and Locator it creates; nothing
// here is global.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default bound for actionability waits and single-element reads (30s)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cadence for actionability and assertion polling (100ms)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default bound for `goto`, `go_back` and `go_forward` (30s)
pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound for `expect(..)` assertions (5s)
pub const DEFAULT_ASSERTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Browser engine driven by the remote backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrowserKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(BrowserKind::Chromium),
            "firefox" => Ok(BrowserKind::Firefox),
            "webkit" | "safari" => Ok(BrowserKind::Webkit),
            other => Err(Error::InvalidInput(format!("unknown browser '{}'", other))),
        }
    }
}

/// Timeout policy and launch settings for a [`Harness`](crate::Harness)
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    /// Bound for actionability waits and element reads
    pub default_timeout: Duration,
    /// Delay between polls of actionability and assertions
    pub poll_interval: Duration,
    /// Bound for navigation until the load event settles
    pub navigation_timeout: Duration,
    /// Bound for fluent `expect` assertions
    pub assertion_timeout: Duration,
    pub browser: BrowserKind,
    pub headless: bool,
    /// Extra command-line arguments for the browser process
    pub launch_args: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
            assertion_timeout: DEFAULT_ASSERTION_TIMEOUT,
            browser: BrowserKind::default(),
            headless: true,
            launch_args: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Creates a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads overrides from `E2E_*` environment variables.
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `E2E_TIMEOUT_MS` | `default_timeout` |
    /// | `E2E_POLL_INTERVAL_MS` | `poll_interval` |
    /// | `E2E_NAVIGATION_TIMEOUT_MS` | `navigation_timeout` |
    /// | `E2E_ASSERTION_TIMEOUT_MS` | `assertion_timeout` |
    /// | `E2E_BROWSER` | `chromium`, `firefox` or `webkit` |
    /// | `E2E_HEADLESS` | `true`/`false`/`1`/`0` |
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` naming the variable if a value does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a caller-supplied lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(d) = duration_var(&lookup, "E2E_TIMEOUT_MS")? {
            config.default_timeout = d;
        }
        if let Some(d) = duration_var(&lookup, "E2E_POLL_INTERVAL_MS")? {
            config.poll_interval = d;
        }
        if let Some(d) = duration_var(&lookup, "E2E_NAVIGATION_TIMEOUT_MS")? {
            config.navigation_timeout = d;
        }
        if let Some(d) = duration_var(&lookup, "E2E_ASSERTION_TIMEOUT_MS")? {
            config.assertion_timeout = d;
        }
        if let Some(browser) = lookup("E2E_BROWSER") {
            config.browser = browser
                .parse()
                .map_err(|e: Error| e.context("E2E_BROWSER"))?;
        }
        if let Some(headless) = lookup("E2E_HEADLESS") {
            config.headless = parse_bool(&headless).ok_or_else(|| {
                Error::InvalidInput(format!("E2E_HEADLESS: expected a boolean, got '{}'", headless))
            })?;
        }

        if config.poll_interval.is_zero() {
            return Err(Error::InvalidInput(
                "E2E_POLL_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    pub fn assertion_timeout(mut self, timeout: Duration) -> Self {
        self.assertion_timeout = timeout;
        self
    }

    pub fn browser(mut self, browser: BrowserKind) -> Self {
        self.browser = browser;
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn launch_args(mut self, args: Vec<String>) -> Self {
        self.launch_args = args;
        self
    }

    /// Params for the driver's `BrowserType.launch` call
    pub(crate) fn launch_params(&self) -> Value {
        let mut params = json!({
            "headless": self.headless,
            "timeout": self.navigation_timeout.as_millis() as f64,
        });
        if !self.launch_args.is_empty() {
            params["args"] = json!(self.launch_args);
        }
        params
    }
}

fn duration_var<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| {
                Error::InvalidInput(format!("{}: expected milliseconds, got '{}'", key, raw))
            }),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.navigation_timeout, Duration::from_secs(30));
        assert_eq!(config.assertion_timeout, Duration::from_secs(5));
        assert_eq!(config.browser, BrowserKind::Chromium);
        assert!(config.headless);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = HarnessConfig::from_lookup(lookup(&[
            ("E2E_TIMEOUT_MS", "1500"),
            ("E2E_POLL_INTERVAL_MS", "20"),
            ("E2E_BROWSER", "Firefox"),
            ("E2E_HEADLESS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.default_timeout, Duration::from_millis(1500));
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert_eq!(config.navigation_timeout, DEFAULT_NAVIGATION_TIMEOUT);
        assert_eq!(config.browser, BrowserKind::Firefox);
        assert!(!config.headless);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = HarnessConfig::from_lookup(lookup(&[("E2E_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(ref m) if m.contains("E2E_TIMEOUT_MS")));

        let err = HarnessConfig::from_lookup(lookup(&[("E2E_BROWSER", "lynx")])).unwrap_err();
        assert!(err.to_string().contains("lynx"));

        let err = HarnessConfig::from_lookup(lookup(&[("E2E_POLL_INTERVAL_MS", "0")])).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_launch_params() {
        let config = HarnessConfig::new()
            .headless(false)
            .launch_args(vec!["--no-sandbox".to_string()]);
        let params = config.launch_params();
        assert_eq!(params["headless"], false);
        assert_eq!(params["args"][0], "--no-sandbox");
        assert_eq!(params["timeout"], 30000.0);

        let params = HarnessConfig::new().launch_params();
        assert!(params.get("args").is_none());
    }
}
