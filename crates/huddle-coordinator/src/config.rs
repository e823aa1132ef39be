//! Coordinator configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults; every knob has a `HUDDLE_`-prefixed variable.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default bind address for the WebSocket and health endpoints.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default lifecycle sweep interval in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Default idle timeout for ad-hoc sessions in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 1800;

/// Default grace margin applied at both edges of an authorized window.
pub const DEFAULT_WINDOW_GRACE_SECONDS: u64 = 30;

/// Default bound on the recording stop-and-flush wait before a forced
/// disconnect proceeds anyway.
pub const DEFAULT_RECORDING_FLUSH_TIMEOUT_SECONDS: u64 = 10;

/// Default coordinator instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "huddle";

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address for the WebSocket endpoint and health routes.
    pub bind_address: String,

    /// Unique identifier for this coordinator instance.
    pub instance_id: String,

    /// Lifecycle monitor sweep interval.
    pub sweep_interval: Duration,

    /// Idle timeout after which an ad-hoc session is force-closed.
    pub idle_timeout: Duration,

    /// Grace margin applied at both edges of an authorized window.
    pub window_grace: Duration,

    /// Bound on the recording stop-and-flush wait during force-close.
    pub recording_flush_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("HUDDLE_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let sweep_interval = parse_seconds(vars, "HUDDLE_SWEEP_INTERVAL_SECONDS")?
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECONDS);
        let idle_timeout = parse_seconds(vars, "HUDDLE_IDLE_TIMEOUT_SECONDS")?
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECONDS);
        let window_grace = parse_seconds(vars, "HUDDLE_WINDOW_GRACE_SECONDS")?
            .unwrap_or(DEFAULT_WINDOW_GRACE_SECONDS);
        let recording_flush_timeout =
            parse_seconds(vars, "HUDDLE_RECORDING_FLUSH_TIMEOUT_SECONDS")?
                .unwrap_or(DEFAULT_RECORDING_FLUSH_TIMEOUT_SECONDS);

        let instance_id = vars.get("HUDDLE_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            instance_id,
            sweep_interval: Duration::from_secs(sweep_interval),
            idle_timeout: Duration::from_secs(idle_timeout),
            window_grace: Duration::from_secs(window_grace),
            recording_flush_timeout: Duration::from_secs(recording_flush_timeout),
        })
    }
}

/// Parse an optional seconds value; present-but-unparseable is an error
/// rather than a silent fallback.
fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
) -> Result<Option<u64>, ConfigError> {
    match vars.get(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value: raw.clone(),
            }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(
            config.sweep_interval,
            Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS)
        );
        assert_eq!(
            config.idle_timeout,
            Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECONDS)
        );
        assert_eq!(
            config.window_grace,
            Duration::from_secs(DEFAULT_WINDOW_GRACE_SECONDS)
        );
        assert_eq!(
            config.recording_flush_timeout,
            Duration::from_secs(DEFAULT_RECORDING_FLUSH_TIMEOUT_SECONDS)
        );
        assert!(config.instance_id.starts_with("huddle-"));
    }

    #[test]
    fn test_from_vars_custom_values() {
        let vars = HashMap::from([
            (
                "HUDDLE_BIND_ADDRESS".to_string(),
                "127.0.0.1:9000".to_string(),
            ),
            ("HUDDLE_SWEEP_INTERVAL_SECONDS".to_string(), "15".to_string()),
            ("HUDDLE_IDLE_TIMEOUT_SECONDS".to_string(), "600".to_string()),
            ("HUDDLE_WINDOW_GRACE_SECONDS".to_string(), "5".to_string()),
            (
                "HUDDLE_RECORDING_FLUSH_TIMEOUT_SECONDS".to_string(),
                "3".to_string(),
            ),
            ("HUDDLE_INSTANCE_ID".to_string(), "huddle-custom-001".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load");

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.sweep_interval, Duration::from_secs(15));
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert_eq!(config.window_grace, Duration::from_secs(5));
        assert_eq!(config.recording_flush_timeout, Duration::from_secs(3));
        assert_eq!(config.instance_id, "huddle-custom-001");
    }

    #[test]
    fn test_invalid_duration_is_an_error() {
        let vars = HashMap::from([(
            "HUDDLE_SWEEP_INTERVAL_SECONDS".to_string(),
            "soon".to_string(),
        )]);

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue { name, .. }) if name == "HUDDLE_SWEEP_INTERVAL_SECONDS")
        );
    }
}
