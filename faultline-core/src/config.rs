//! Centralized configuration for Faultline.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::time::Duration;

use crate::segment::SEGMENT_SIZE;
use crate::transport::SocketConfig;

/// Central configuration for all Faultline components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct HarnessConfig {
    pub socket: SocketDefaults,
    pub run: RunDefaults,
    pub effects: EffectDefaults,
}

/// Defaults for sockets created by scenarios.
#[derive(Debug, Clone)]
pub struct SocketDefaults {
    /// Receive window advertised by default
    pub window: u8,
    /// Retransmission timeout handed to the transport
    pub timeout: Duration,
    /// Whether unfinished transport operations are tolerated
    pub suppress_not_implemented: bool,
}

impl Default for SocketDefaults {
    fn default() -> Self {
        Self {
            window: 10,
            timeout: Duration::from_secs(2),
            suppress_not_implemented: false,
        }
    }
}

impl SocketDefaults {
    /// Converts the defaults into a per-socket configuration.
    pub fn socket_config(&self) -> SocketConfig {
        SocketConfig {
            window: self.window,
            timeout: self.timeout,
            suppress_not_implemented: self.suppress_not_implemented,
        }
    }
}

/// Orchestration and byte-helper timing.
#[derive(Debug, Clone)]
pub struct RunDefaults {
    /// Deadline for a scenario whose timeout is not specified
    pub timeout: Duration,
    /// Back-off when a send accepts zero bytes
    pub send_backoff: Duration,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            send_backoff: Duration::from_millis(50),
        }
    }
}

/// Parameters of the enumerated effects.
#[derive(Debug, Clone)]
pub struct EffectDefaults {
    /// Length every segment must have
    pub segment_size: usize,
    /// Ticks a reordered segment may be held
    pub reorder_hold_ticks: u32,
}

impl Default for EffectDefaults {
    fn default() -> Self {
        Self {
            segment_size: SEGMENT_SIZE,
            reorder_hold_ticks: 2,
        }
    }
}

impl HarnessConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up by variable name.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(timeout) = lookup("FAULTLINE_RUN_TIMEOUT") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                self.run.timeout = Duration::from_secs(seconds);
            }
        }

        if let Some(window) = lookup("FAULTLINE_WINDOW") {
            if let Ok(window) = window.parse::<u8>() {
                self.socket.window = window;
            }
        }

        if let Some(suppress) = lookup("FAULTLINE_SUPPRESS_NOT_IMPLEMENTED") {
            self.socket.suppress_not_implemented = suppress.parse().unwrap_or(false);
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = HarnessConfig::default();

        assert_eq!(config.socket.window, 10);
        assert_eq!(config.socket.timeout, Duration::from_secs(2));
        assert_eq!(config.run.timeout, Duration::from_secs(5));
        assert_eq!(config.run.send_backoff, Duration::from_millis(50));
        assert_eq!(config.effects.segment_size, 1018);
        assert_eq!(config.effects.reorder_hold_ticks, 2);
        assert!(!config.socket.suppress_not_implemented);
    }

    #[test]
    fn test_env_override() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("FAULTLINE_RUN_TIMEOUT", "30"),
            ("FAULTLINE_WINDOW", "3"),
            ("FAULTLINE_SUPPRESS_NOT_IMPLEMENTED", "true"),
        ]);
        let config =
            HarnessConfig::default().with_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.run.timeout, Duration::from_secs(30));
        assert_eq!(config.socket.window, 3);
        assert!(config.socket.suppress_not_implemented);
    }

    #[test]
    fn test_invalid_override_ignored() {
        let config = HarnessConfig::default().with_overrides(|key| match key {
            "FAULTLINE_WINDOW" => Some("4096".to_string()),
            _ => None,
        });
        assert_eq!(config.socket.window, 10);
    }
}
