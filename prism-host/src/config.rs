//! Configuration for the PRISM host service.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Shared-memory session settings.
    pub session: SessionSettings,
    /// Generated display output settings.
    pub display: DisplaySettings,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Shared-memory session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// POSIX shared-memory object name (must start with '/').
    pub name: String,
    /// Frame channel capacity in mebibytes. Must hold one full frame.
    pub frame_capacity_mb: usize,
    /// Cursor channel capacity in kibibytes.
    pub cursor_capacity_kb: usize,
    /// Clipboard capacity per direction, in kibibytes.
    pub clipboard_capacity_kb: usize,
}

/// Generated display output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Target frames per second.
    pub fps: u8,
    /// Stop after this many frames; 0 runs until killed.
    pub max_frames: u64,
    /// Spin with thread yields instead of pure busy-wait.
    pub yield_while_waiting: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            session: SessionSettings::default(),
            display: DisplaySettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            name: "/prism-session".into(),
            frame_capacity_mb: 64,
            cursor_capacity_kb: 64,
            clipboard_capacity_kb: 1024,
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 60,
            max_frames: 0,
            yield_while_waiting: true,
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

impl HostConfig {
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

    /// Convert capacity settings into channel capacities.
    pub fn to_session_config(&self) -> prism_core::SessionConfig {
        prism_core::SessionConfig {
            frame_capacity: self.session.frame_capacity_mb.max(1) * 1024 * 1024,
            cursor_capacity: self.session.cursor_capacity_kb.max(1) * 1024,
            clipboard_capacity: self.session.clipboard_capacity_kb.max(1) * 1024,
        }
    }

    /// Wait policy implied by the display settings.
    pub fn wait_mode(&self) -> prism_core::WaitMode {
        if self.display.yield_while_waiting {
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
        let cfg = HostConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("frame_capacity_mb"));
        assert!(text.contains("fps"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = HostConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: HostConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.session.name, "/prism-session");
        assert_eq!(parsed.display.fps, 60);
    }

    #[test]
    fn to_session_config_scales_units() {
        let cfg = HostConfig::default();
        let session = cfg.to_session_config();
        assert_eq!(session.frame_capacity, 64 * 1024 * 1024);
        assert_eq!(session.cursor_capacity, 64 * 1024);
    }
}
