//! Configuration for the PRISM client.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Shared-memory session settings.
    pub session: SessionSettings,
    /// Consumer loop tuning.
    pub runtime: RuntimeSettings,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Shared-memory session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// POSIX shared-memory object name published by the host.
    pub name: String,
    /// How long to keep retrying the initial attach, in milliseconds.
    pub attach_timeout_ms: u64,
}

/// Consumer loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Spin with thread yields instead of pure busy-wait. Pure spin
    /// buys the lowest latency at the cost of a pegged core.
    pub yield_while_waiting: bool,
    /// Log running statistics every this many frames.
    pub stats_every: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session: SessionSettings::default(),
            runtime: RuntimeSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            name: "/prism-session".into(),
            attach_timeout_ms: 10_000,
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            yield_while_waiting: true,
            stats_every: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Wait policy implied by the runtime settings.
    pub fn wait_mode(&self) -> prism_core::WaitMode {
        if self.runtime.yield_while_waiting {
            prism_core::WaitMode::SpinYield
        } else {
            prism_core::WaitMode::Spin
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = ClientConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("attach_timeout_ms"));
        assert!(text.contains("stats_every"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = ClientConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.session.name, "/prism-session");
        assert!(parsed.runtime.yield_while_waiting);
    }
}
