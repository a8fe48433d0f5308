use crate::core::{Result, VigilError};
use crate::storage::DurabilityMode;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Service configuration.
///
/// Built with `VigilConfig::new()` and the setters below, or loaded from
/// `VIGIL_*` environment variables (and a `.env` file) with `from_env`.
#[derive(Debug, Clone)]
pub struct VigilConfig {
    /// Listen host
    pub host: String,

    /// Listen port
    pub port: u16,

    /// Directory for the journal and snapshot; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,

    /// Journal fsync policy
    pub durability: DurabilityMode,

    /// How often the coordinator evaluates every owner
    pub tick_interval: Duration,

    /// Inactivity threshold given to newly registered owners
    pub default_threshold_days: u32,

    pub min_threshold_days: u32,

    pub max_threshold_days: u32,

    /// Quorum given to newly registered owners
    pub required_confirmations: u32,

    /// Journal entries between snapshots
    pub checkpoint_entries: usize,

    /// POST notifications here instead of logging them
    pub notify_webhook: Option<String>,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: None,
            durability: DurabilityMode::Async,
            tick_interval: Duration::from_secs(60),
            default_threshold_days: 90,
            min_threshold_days: 7,
            max_threshold_days: 365,
            required_confirmations: 2,
            checkpoint_entries: 1000,
            notify_webhook: None,
        }
    }
}

impl VigilConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn default_threshold_days(mut self, days: u32) -> Self {
        self.default_threshold_days = days;
        self
    }

    pub fn threshold_bounds(mut self, min_days: u32, max_days: u32) -> Self {
        self.min_threshold_days = min_days;
        self.max_threshold_days = max_days;
        self
    }

    pub fn required_confirmations(mut self, required: u32) -> Self {
        self.required_confirmations = required;
        self
    }

    pub fn checkpoint_entries(mut self, entries: usize) -> Self {
        self.checkpoint_entries = entries;
        self
    }

    pub fn notify_webhook(mut self, url: &str) -> Self {
        self.notify_webhook = Some(url.to_string());
        self
    }

    /// Loads `.env` if present, then reads `VIGIL_*` variables over the defaults.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("VIGIL_HOST") {
            config.host = host;
        }
        if let Some(port) = parse_var(&lookup, "VIGIL_PORT")? {
            config.port = port;
        }
        if let Some(dir) = lookup("VIGIL_DATA_DIR").filter(|d| !d.trim().is_empty()) {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(mode) = lookup("VIGIL_DURABILITY") {
            config.durability = mode
                .parse()
                .map_err(|e: String| VigilError::Validation(format!("VIGIL_DURABILITY: {e}")))?;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "VIGIL_TICK_SECS")? {
            config.tick_interval = Duration::from_secs(secs);
        }
        if let Some(days) = parse_var(&lookup, "VIGIL_DEFAULT_THRESHOLD_DAYS")? {
            config.default_threshold_days = days;
        }
        if let Some(days) = parse_var(&lookup, "VIGIL_MIN_THRESHOLD_DAYS")? {
            config.min_threshold_days = days;
        }
        if let Some(days) = parse_var(&lookup, "VIGIL_MAX_THRESHOLD_DAYS")? {
            config.max_threshold_days = days;
        }
        if let Some(required) = parse_var(&lookup, "VIGIL_REQUIRED_CONFIRMATIONS")? {
            config.required_confirmations = required;
        }
        if let Some(entries) = parse_var(&lookup, "VIGIL_CHECKPOINT_ENTRIES")? {
            config.checkpoint_entries = entries;
        }
        if let Some(url) = lookup("VIGIL_NOTIFY_WEBHOOK").filter(|u| !u.trim().is_empty()) {
            config.notify_webhook = Some(url);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_threshold_days == 0 || self.min_threshold_days > self.max_threshold_days {
            return Err(VigilError::Validation(format!(
                "threshold bounds {}..={} are inconsistent",
                self.min_threshold_days, self.max_threshold_days
            )));
        }
        self.check_threshold(self.default_threshold_days)?;
        if self.required_confirmations == 0 {
            return Err(VigilError::Validation(
                "required confirmations must be at least 1".to_string(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(VigilError::Validation("tick interval must be positive".to_string()));
        }
        if self.checkpoint_entries == 0 {
            return Err(VigilError::Validation("checkpoint entries must be positive".to_string()));
        }
        Ok(())
    }

    /// Rejects an inactivity threshold outside the configured bounds.
    pub fn check_threshold(&self, days: u32) -> Result<()> {
        if days < self.min_threshold_days || days > self.max_threshold_days {
            return Err(VigilError::Validation(format!(
                "inactivity threshold must be between {} and {} days, got {}",
                self.min_threshold_days, self.max_threshold_days, days
            )));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| VigilError::Validation(format!("invalid listen address: {e}")))
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| VigilError::Validation(format!("{key}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = VigilConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.default_threshold_days, 90);
        assert_eq!(config.required_confirmations, 2);
        assert_eq!(config.durability, DurabilityMode::Async);
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn test_environment_overrides() {
        let config = VigilConfig::from_lookup(lookup(&[
            ("VIGIL_PORT", "9000"),
            ("VIGIL_DATA_DIR", "/var/lib/vigil"),
            ("VIGIL_DURABILITY", "sync"),
            ("VIGIL_TICK_SECS", "5"),
            ("VIGIL_REQUIRED_CONFIRMATIONS", "3"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/vigil")));
        assert_eq!(config.durability, DurabilityMode::Sync);
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert_eq!(config.required_confirmations, 3);
    }

    #[test]
    fn test_bad_values_are_rejected() {
        assert!(VigilConfig::from_lookup(lookup(&[("VIGIL_PORT", "http")])).is_err());
        assert!(VigilConfig::from_lookup(lookup(&[("VIGIL_DURABILITY", "maybe")])).is_err());
        assert!(VigilConfig::from_lookup(lookup(&[("VIGIL_DEFAULT_THRESHOLD_DAYS", "3")])).is_err());
        assert!(VigilConfig::from_lookup(lookup(&[("VIGIL_REQUIRED_CONFIRMATIONS", "0")])).is_err());
    }

    #[test]
    fn test_builder_and_threshold_check() {
        let config = VigilConfig::new().host("127.0.0.1").port(0).threshold_bounds(1, 30);
        assert!(config.bind_addr().is_ok());
        assert!(config.check_threshold(30).is_ok());
        assert!(config.check_threshold(31).is_err());
        // default 90 no longer fits the bounds
        assert!(config.validate().is_err());
    }
}
