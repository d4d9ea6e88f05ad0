//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `XMPP_BRIDGE` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use xmpp_ws_bridge::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Bridging {} on port {}", config.xmpp.domain, config.server.port);
//! ```

mod bridge;
mod error;
mod server;
mod xmpp;

pub use bridge::BridgeConfig;
pub use error::{ConfigError, ValidationError};
pub use server::{Environment, ServerConfig};
pub use xmpp::XmppConfig;

use serde::Deserialize;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Listener configuration (host, port, environment, log filter)
    #[serde(default)]
    pub server: ServerConfig,

    /// XMPP server, domains and credentials
    pub xmpp: XmppConfig,

    /// Room defaults and failure policy
    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `XMPP_BRIDGE` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `XMPP_BRIDGE__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `XMPP_BRIDGE__XMPP__DOMAIN=...` -> `xmpp.domain = ...`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Required environment variables are missing
    /// - Values cannot be parsed into expected types
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("XMPP_BRIDGE")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for the first invalid value found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.xmpp.validate()?;
        self.bridge.validate()?;
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::CommandFailurePolicy;
    use std::env;
    use std::sync::Mutex;

    // Mutex to ensure tests don't run in parallel (env vars are global)
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "XMPP_BRIDGE__XMPP__DOMAIN",
        "XMPP_BRIDGE__XMPP__ROOM_DOMAIN",
        "XMPP_BRIDGE__XMPP__ADMIN_USERNAME",
        "XMPP_BRIDGE__XMPP__ADMIN_PASSWORD",
        "XMPP_BRIDGE__XMPP__USER_PASSWORD",
        "XMPP_BRIDGE__XMPP__PORT",
        "XMPP_BRIDGE__SERVER__PORT",
        "XMPP_BRIDGE__SERVER__ENVIRONMENT",
        "XMPP_BRIDGE__BRIDGE__SURFACE_COMMAND_FAILURES",
        "XMPP_BRIDGE__BRIDGE__MAX_ROOM_OCCUPANTS",
    ];

    /// Helper to set environment variables for testing
    /// Uses double underscores to separate nested config values
    fn set_minimal_env() {
        env::set_var("XMPP_BRIDGE__XMPP__DOMAIN", "example.com");
        env::set_var("XMPP_BRIDGE__XMPP__ROOM_DOMAIN", "conference.example.com");
        env::set_var("XMPP_BRIDGE__XMPP__ADMIN_USERNAME", "admin");
        env::set_var("XMPP_BRIDGE__XMPP__ADMIN_PASSWORD", "admin-secret");
        env::set_var("XMPP_BRIDGE__XMPP__USER_PASSWORD", "user-secret");
    }

    /// Helper to clear environment variables after testing
    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_load_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        assert!(result.is_ok(), "Failed to load config: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.xmpp.domain, "example.com");
        assert_eq!(config.xmpp.room_domain, "conference.example.com");
        assert_eq!(config.xmpp.port, 5222);
        assert_eq!(config.xmpp.resource, "bridge");
    }

    #[test]
    fn test_validate_full_config() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_xmpp_section_fails() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        assert!(AppConfig::load().is_err());
    }

    #[test]
    fn test_server_and_bridge_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.environment, Environment::Development);
        assert_eq!(config.bridge.max_room_occupants, 100);
        assert_eq!(config.bridge.failure_policy(), CommandFailurePolicy::Swallow);
    }

    #[test]
    fn test_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("XMPP_BRIDGE__SERVER__PORT", "3000");
        env::set_var("XMPP_BRIDGE__SERVER__ENVIRONMENT", "production");
        env::set_var("XMPP_BRIDGE__XMPP__PORT", "5322");
        env::set_var("XMPP_BRIDGE__BRIDGE__SURFACE_COMMAND_FAILURES", "true");
        env::set_var("XMPP_BRIDGE__BRIDGE__MAX_ROOM_OCCUPANTS", "25");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.server.port, 3000);
        assert!(config.is_production());
        assert_eq!(config.xmpp.port, 5322);
        assert_eq!(config.bridge.failure_policy(), CommandFailurePolicy::Surface);
        assert_eq!(config.bridge.room_config().max_occupants, 25);
    }
}
