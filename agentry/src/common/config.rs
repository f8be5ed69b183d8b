/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::time::Duration;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// Configuration for the Agentry runtime.
///
/// Loaded from `config.toml` in the XDG configuration directory for the
/// `agentry` prefix. Every section falls back to its defaults when absent.
///
/// ```toml
/// [timeouts]
/// remote_query_ms = 1000
/// reconnect_delay_ms = 1000
///
/// [network]
/// bind_address = "127.0.0.1"
/// master_port = 5081
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentryConfig {
    /// Timeout configuration
    pub timeouts: TimeoutConfig,
    /// Limits and capacity configuration
    pub limits: LimitsConfig,
    /// Network configuration for master containers
    pub network: NetworkConfig,
    /// Default names
    pub defaults: DefaultsConfig,
}

/// Timeout-related configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Bound on each remote directory or duplicate-name query, in milliseconds
    pub remote_query_ms: u64,
    /// Default wait for a reply in `request`, in milliseconds
    pub request_ms: u64,
    /// Delay between slave reconnection attempts, in milliseconds
    pub reconnect_delay_ms: u64,
    /// Grace period for agent tasks to finish on container shutdown, in milliseconds
    pub shutdown_ms: u64,
}

/// Limits and capacity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum length of a single protocol line in bytes
    pub max_frame_size: usize,
    /// Mailbox depth above which a warning is logged
    pub mailbox_warn_depth: usize,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address a master container binds its listener to
    pub bind_address: String,
    /// Port a master container listens on; 0 picks an ephemeral port
    pub master_port: u16,
}

/// Default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Container name when none is provided
    pub container_name: String,
    /// Prefix for generated gateway agent names
    pub gateway_prefix: String,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            remote_query_ms: 1_000,
            request_ms: 1_000,
            reconnect_delay_ms: 1_000,
            shutdown_ms: 5_000,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 1024 * 1024,
            mailbox_warn_depth: 1024,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            master_port: 0,
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            container_name: "container".to_string(),
            gateway_prefix: "gateway".to_string(),
        }
    }
}

impl AgentryConfig {
    /// Bound on a single remote query.
    pub const fn remote_query_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.remote_query_ms)
    }

    /// Deadline of a request made without an explicit timeout.
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.request_ms)
    }

    /// Delay between slave reconnection attempts.
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.timeouts.reconnect_delay_ms)
    }

    /// Grace period for agent tasks during shutdown.
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.shutdown_ms)
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load configuration from XDG-compliant locations.
    ///
    /// Looks for `agentry/config.toml` under `$XDG_CONFIG_HOME` and the XDG
    /// config search path. A missing file yields the defaults; a malformed
    /// file is logged and also yields the defaults.
    pub fn load() -> Self {
        use tracing::{error, info};

        let xdg_dirs = match xdg::BaseDirectories::with_prefix("agentry") {
            Ok(dirs) => dirs,
            Err(e) => {
                error!("Failed to initialize XDG directories: {}", e);
                return Self::default();
            }
        };

        let Some(path) = xdg_dirs.find_config_file("config.toml") else {
            info!("No configuration file found, using defaults");
            return Self::default();
        };

        info!("Loading configuration from: {}", path.display());
        match std::fs::read_to_string(&path) {
            Ok(config_str) => match Self::from_toml_str(&config_str) {
                Ok(config) => config,
                Err(e) => {
                    error!("Failed to parse configuration file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to read configuration file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

lazy_static! {
    /// Global configuration instance loaded from XDG-compliant locations
    pub static ref CONFIG: AgentryConfig = AgentryConfig::load();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_timeout() {
        let config = AgentryConfig::default();
        assert_eq!(config.timeouts.remote_query_ms, 1_000);
        assert_eq!(config.remote_query_timeout(), Duration::from_secs(1));
        assert_eq!(config.limits.max_frame_size, 1024 * 1024);
        assert_eq!(config.request_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = AgentryConfig::from_toml_str(
            r#"
            [timeouts]
            reconnect_delay_ms = 250

            [network]
            master_port = 5081
            "#,
        )
        .expect("valid toml");
        assert_eq!(config.timeouts.reconnect_delay_ms, 250);
        assert_eq!(config.timeouts.remote_query_ms, 1_000);
        assert_eq!(config.network.master_port, 5081);
        assert_eq!(config.network.bind_address, "0.0.0.0");
        assert_eq!(config.defaults.container_name, "container");
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        assert!(AgentryConfig::from_toml_str("[timeouts\nremote_query_ms = ").is_err());
    }
}
