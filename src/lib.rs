//! # unimap
//!
//! A declarative map layer that drives several incompatible vendor map SDKs
//! (Leaflet, Mapbox GL, Google Maps, Baidu Maps and Amap) through one prop and
//! event contract.
//!
//! Consumers describe what the map should show as [`MapProps`]. The
//! [`MapFacade`] turns every prop change into an immutable [`MapSnapshot`],
//! the [`ReconciliationEngine`] diffs it against what is already on the map
//! and issues the minimal ordered set of [`ProviderAdapter`] calls, and the
//! [`EventNormalizer`] turns vendor callbacks into [`CanonicalEvent`]s.

pub mod coords;
pub mod core;
pub mod events;
pub mod facade;
pub mod layers;
pub mod lifecycle;
pub mod plugins;
pub mod prelude;
pub mod props;
pub mod provider;
pub mod reconcile;
pub mod testing;

pub use crate::core::constants;

// Re-export public API
pub use crate::core::{
    config::{DiagnosticsMode, FacadeConfig, MapContainer},
    geo::{LatLng, LatLngBounds, Point},
};

pub use events::{
    canonical::{CanonicalEvent, CanonicalEventKind, MapEvent},
    dispatcher::EventDispatcher,
    normalizer::EventNormalizer,
};

pub use facade::{MapFacade, MapStatus, PropsOutcome};

pub use layers::{
    layer::{Layer, LayerSource},
    overlay::{Geometry, Overlay, OverlayKey, OverlayKind, OverlayStyle},
};

pub use lifecycle::{LifecycleManager, LifecycleState};

pub use plugins::{
    cluster::{ClusterConfig, ClusterOptions},
    draw::{DrawStyle, DrawTool, DrawingToolConfig},
    heatmap::{HeatPoint, Heatmap},
};

pub use props::MapProps;

pub use provider::{
    adapter::SdkAdapter, registry::AdapterRegistry, Capabilities, ProviderAdapter,
    ProviderHandle, ProviderKind,
};

pub use reconcile::{
    engine::{ReconcileReport, ReconciliationEngine},
    plan::{Operation, Plan},
    snapshot::{MapSnapshot, ViewSpec},
};

use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Locks a mutex, recovering the data if a listener panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, MapError>;

/// Why a provider failed to come up during `initialize`
#[derive(Debug, Clone, PartialEq)]
pub enum LoadFailure {
    /// The provider needs an API key / access token and none was given
    MissingApiKey,
    /// The vendor script did not finish loading within the configured timeout
    Timeout(Duration),
    /// The vendor script failed to load or the map could not be constructed
    Script(String),
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadFailure::MissingApiKey => write!(f, "missing API key"),
            LoadFailure::Timeout(timeout) => {
                write!(f, "vendor script load timed out after {}ms", timeout.as_millis())
            }
            LoadFailure::Script(message) => write!(f, "{}", message),
        }
    }
}

/// Common error types
///
/// Errors are `Clone` so a single load failure can be shared by every
/// initializer waiting on the same vendor script and fanned out to listeners.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MapError {
    /// Script, key or network failure during `initialize`; fatal for the mount
    #[error("failed to load {provider} provider: {reason}")]
    ProviderLoad {
        provider: ProviderKind,
        reason: LoadFailure,
    },

    /// An overlay with out-of-range coordinates or malformed shape; skipped
    #[error("invalid geometry for {kind} '{id}': {reason}")]
    InvalidGeometry {
        kind: OverlayKind,
        id: String,
        reason: String,
    },

    /// Props rejected at validation time; the previous valid state is kept
    #[error("invalid configuration: {0}")]
    ConfigValidation(String),

    /// A vendor call failed after the map was ready
    #[error("{provider} failed during {operation}: {message}")]
    VendorRuntime {
        provider: ProviderKind,
        operation: &'static str,
        message: String,
    },

    /// An adapter was used outside the lifetime of its handle
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl MapError {
    pub fn is_provider_load(&self) -> bool {
        matches!(self, MapError::ProviderLoad { .. })
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, MapError::InvalidState(_))
    }

    pub fn is_vendor_runtime(&self) -> bool {
        matches!(self, MapError::VendorRuntime { .. })
    }

    pub fn is_config_validation(&self) -> bool {
        matches!(self, MapError::ConfigValidation(_))
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        MapError::ConfigValidation(message.into())
    }
}

/// Error type alias for convenience
pub type Error = MapError;
