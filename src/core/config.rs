//! Configuration for a mounted map facade
//!
//! Mirrors the preset pattern used for engine tuning: a plain options struct
//! with `Default`, plus named presets for the two diagnostics modes.

use crate::core::constants::{DEFAULT_FIT_PADDING, DEFAULT_LOAD_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Whether programmer errors are loud or silent.
///
/// Development surfaces misuse (adapter calls after destroy, unsupported
/// capability options, skipped geometry) as errors and warnings. Production
/// swallows misuse and logs at debug level only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticsMode {
    Development,
    Production,
}

impl DiagnosticsMode {
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }
}

impl Default for DiagnosticsMode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Development
        } else {
            Self::Production
        }
    }
}

/// Logs a diagnostic at warn level in development and debug level otherwise.
#[macro_export]
macro_rules! diagnostic {
    ($mode:expr, $($arg:tt)+) => {
        if $mode.is_development() {
            log::warn!($($arg)+);
        } else {
            log::debug!($($arg)+);
        }
    };
}

/// DOM-ish container the vendor map is mounted into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapContainer {
    pub element_id: String,
}

impl MapContainer {
    pub fn new(element_id: impl Into<String>) -> Self {
        Self {
            element_id: element_id.into(),
        }
    }
}

impl Default for MapContainer {
    fn default() -> Self {
        Self::new("map")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FacadeConfig {
    pub container: MapContainer,
    /// Upper bound on vendor script/API load during `initialize`
    pub load_timeout: Duration,
    pub mode: DiagnosticsMode,
    /// Padding used by `fit_bounds` when the caller gives none
    pub default_padding: f64,
}

impl FacadeConfig {
    pub fn development() -> Self {
        Self {
            mode: DiagnosticsMode::Development,
            ..Self::default()
        }
    }

    pub fn production() -> Self {
        Self {
            mode: DiagnosticsMode::Production,
            ..Self::default()
        }
    }

    pub fn with_container(mut self, container: MapContainer) -> Self {
        self.container = container;
        self
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn with_mode(mut self, mode: DiagnosticsMode) -> Self {
        self.mode = mode;
        self
    }
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            container: MapContainer::default(),
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            mode: DiagnosticsMode::default(),
            default_padding: DEFAULT_FIT_PADDING,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let dev = FacadeConfig::development();
        let prod = FacadeConfig::production();

        assert!(dev.mode.is_development());
        assert!(!prod.mode.is_development());
        assert_eq!(dev.load_timeout, Duration::from_secs(10));
        assert_eq!(dev.container, prod.container);
    }

    #[test]
    fn test_builder_overrides() {
        let config = FacadeConfig::production()
            .with_container(MapContainer::new("canvas"))
            .with_load_timeout(Duration::from_millis(250));

        assert_eq!(config.container.element_id, "canvas");
        assert_eq!(config.load_timeout, Duration::from_millis(250));
        assert_eq!(config.mode, DiagnosticsMode::Production);
    }
}
