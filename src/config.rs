use rocket::figment::Figment;
use serde::Deserialize;
use std::time::Duration;

use crate::roster::RosterPolicy;

/// Application settings, read from Rocket's figment so that `Rocket.toml`
/// and `ROCKET_*` variables (including those loaded from `config/*.env`)
/// apply.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_session_hours")]
    pub session_hours: i64,
    #[serde(default)]
    pub roster: RosterConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RosterConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub lock_timeout_ms: u64,
    pub strict: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub principal_username: String,
    pub principal_password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
    pub otlp_api_key: Option<String>,
    pub environment: String,
}

fn default_database_url() -> String {
    "sqlite://student_registry.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_session_hours() -> i64 {
    1
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 25,
            lock_timeout_ms: 5_000,
            strict: false,
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            principal_username: "admin".to_string(),
            principal_password: "admin123".to_string(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            otlp_api_key: None,
            environment: "development".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            session_hours: default_session_hours(),
            roster: RosterConfig::default(),
            bootstrap: BootstrapConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_figment(figment: &Figment) -> Result<Self, rocket::figment::Error> {
        figment.extract()
    }
}

impl RosterConfig {
    pub fn policy(&self) -> RosterPolicy {
        RosterPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff: Duration::from_millis(self.backoff_ms),
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            strict: self.strict,
        }
    }
}
