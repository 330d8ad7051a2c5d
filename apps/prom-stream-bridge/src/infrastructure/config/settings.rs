//! Bridge Configuration Settings
//!
//! Configuration types for the stream bridge, loaded from environment variables.
//! The loaded [`BridgeConfig`] is passed explicitly to every component
//! that needs it; nothing reads the environment after startup.

use std::time::Duration;

use crate::application::services::scheduler::SchedulerConfig;
use crate::domain::subscription::SubscriptionDefaults;

/// Default AWS region for request signing.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default SigV4 service name (Amazon Managed Prometheus).
pub const DEFAULT_SIGNING_SERVICE: &str = "aps";

/// AWS credentials used for SigV4 request signing.
#[derive(Clone)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(access_key: String, secret_key: String, session_token: Option<String>) -> Self {
        Self {
            access_key,
            secret_key,
            session_token,
        }
    }

    /// Get the access key ID.
    #[must_use]
    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// Get the secret access key.
    #[must_use]
    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    /// Get the session token, if any.
    #[must_use]
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &"[REDACTED]")
            .field("secret_key", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .finish()
    }
}

/// Metrics backend settings.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Base URL of the Prometheus-compatible query API, without the
    /// `/api/v1` suffix and without a trailing slash.
    pub endpoint: String,
    /// AWS region used when signing requests.
    pub region: String,
    /// SigV4 service name used when signing requests.
    pub service: String,
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// WebSocket server port.
    pub ws_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 8443,
            health_port: 9090,
        }
    }
}

/// Subscription scheduling settings.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Safety margin added to every alignment delay.
    pub poll_margin: Duration,
    /// Default polling cadence when a `start` request omits `step`.
    pub default_step_secs: u64,
    /// Default catch-up window when a `start` request omits `history`.
    pub default_history_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_margin: Duration::from_millis(200),
            default_step_secs: 5,
            default_history_secs: 60,
        }
    }
}

impl SchedulerSettings {
    /// Scheduler tuning for new sessions.
    #[must_use]
    pub const fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new(self.poll_margin)
    }

    /// Subscription defaults for new sessions.
    #[must_use]
    pub const fn subscription_defaults(&self) -> SubscriptionDefaults {
        SubscriptionDefaults::new(self.default_step_secs, self.default_history_secs)
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Metrics backend settings.
    pub backend: BackendSettings,
    /// Signing credentials. `None` sends unsigned requests.
    pub credentials: Option<Credentials>,
    /// Server port settings.
    pub server: ServerSettings,
    /// Subscription scheduling settings.
    pub scheduler: SchedulerSettings,
}

impl BridgeConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `PROM_ENDPOINT` is missing or empty, or if
    /// an access key is configured without its secret.
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = std::env::var("PROM_ENDPOINT")
            .map_err(|_| ConfigError::MissingEnvVar("PROM_ENDPOINT".to_string()))?;

        if endpoint.is_empty() {
            return Err(ConfigError::EmptyValue("PROM_ENDPOINT".to_string()));
        }

        let access_key = std::env::var("AWS_ACCESS_KEY_ID")
            .ok()
            .filter(|v| !v.is_empty());

        let credentials = match access_key {
            Some(access_key) => {
                let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
                    .map_err(|_| ConfigError::MissingEnvVar("AWS_SECRET_ACCESS_KEY".to_string()))?;

                if secret_key.is_empty() {
                    return Err(ConfigError::EmptyValue("AWS_SECRET_ACCESS_KEY".to_string()));
                }

                let session_token = std::env::var("AWS_SESSION_TOKEN")
                    .ok()
                    .filter(|v| !v.is_empty());

                Some(Credentials::new(access_key, secret_key, session_token))
            }
            None => None,
        };

        let backend = BackendSettings {
            endpoint: normalize_endpoint(&endpoint),
            region: std::env::var("AWS_REGION")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            service: std::env::var("SIGNING_SERVICE")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_SIGNING_SERVICE.to_string()),
        };

        let server = ServerSettings {
            ws_port: parse_env_u16("BRIDGE_WS_PORT", ServerSettings::default().ws_port),
            health_port: parse_env_u16("BRIDGE_HEALTH_PORT", ServerSettings::default().health_port),
        };

        let scheduler = SchedulerSettings {
            poll_margin: parse_env_duration_millis(
                "BRIDGE_POLL_MARGIN_MS",
                SchedulerSettings::default().poll_margin,
            ),
            default_step_secs: parse_env_u64(
                "BRIDGE_DEFAULT_STEP_SECS",
                SchedulerSettings::default().default_step_secs,
            ),
            default_history_secs: parse_env_u64(
                "BRIDGE_DEFAULT_HISTORY_SECS",
                SchedulerSettings::default().default_history_secs,
            ),
        };

        Ok(Self {
            backend,
            credentials,
            server,
            scheduler,
        })
    }

    /// Whether outbound backend requests will be signed.
    #[must_use]
    pub const fn signing_enabled(&self) -> bool {
        self.credentials.is_some()
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

/// Strip trailing slashes so path joining stays predictable.
fn normalize_endpoint(raw: &str) -> String {
    raw.trim_end_matches('/').to_string()
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_redacted_debug() {
        let creds = Credentials::new(
            "AKIAEXAMPLE".to_string(),
            "secret456".to_string(),
            Some("token789".to_string()),
        );
        let debug = format!("{creds:?}");
        assert!(!debug.contains("AKIAEXAMPLE"));
        assert!(!debug.contains("secret456"));
        assert!(!debug.contains("token789"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn credentials_accessors() {
        let creds = Credentials::new("key".to_string(), "secret".to_string(), None);
        assert_eq!(creds.access_key(), "key");
        assert_eq!(creds.secret_key(), "secret");
        assert!(creds.session_token().is_none());
    }

    #[test]
    fn server_settings_defaults() {
        let settings = ServerSettings::default();
        assert_eq!(settings.ws_port, 8443);
        assert_eq!(settings.health_port, 9090);
    }

    #[test]
    fn scheduler_settings_defaults() {
        let settings = SchedulerSettings::default();
        assert_eq!(settings.poll_margin, Duration::from_millis(200));
        assert_eq!(settings.default_step_secs, 5);
        assert_eq!(settings.default_history_secs, 60);
    }

    #[test]
    fn scheduler_settings_conversions() {
        let settings = SchedulerSettings {
            poll_margin: Duration::from_millis(50),
            default_step_secs: 10,
            default_history_secs: 0,
        };
        assert_eq!(settings.scheduler_config().poll_margin, Duration::from_millis(50));
        assert_eq!(settings.subscription_defaults(), SubscriptionDefaults::new(10, 0));
    }

    #[test]
    fn endpoint_normalization_strips_trailing_slashes() {
        assert_eq!(
            normalize_endpoint("https://aps.example.com/workspaces/ws-1/"),
            "https://aps.example.com/workspaces/ws-1"
        );
        assert_eq!(normalize_endpoint("http://localhost:9009"), "http://localhost:9009");
        assert_eq!(normalize_endpoint("http://localhost:9009//"), "http://localhost:9009");
    }
}
