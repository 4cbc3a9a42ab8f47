//! Prelude module for common unimap types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use unimap::prelude::*;`

pub use crate::core::{
    config::{DiagnosticsMode, FacadeConfig, MapContainer},
    geo::{LatLng, LatLngBounds, Point},
};

pub use crate::events::canonical::{CanonicalEvent, CanonicalEventKind, MapEvent};

pub use crate::facade::{MapFacade, MapStatus, PropsOutcome};

pub use crate::layers::{
    layer::{Layer, LayerSource},
    overlay::{Geometry, Overlay, OverlayKey, OverlayKind, OverlayStyle},
};

pub use crate::lifecycle::LifecycleState;

pub use crate::plugins::{
    cluster::{ClusterConfig, ClusterOptions},
    draw::{DrawStyle, DrawTool, DrawingToolConfig},
    heatmap::{HeatPoint, Heatmap},
};

pub use crate::props::{CircleProps, MapProps, MarkerProps, PathProps, RectangleProps};

pub use crate::provider::{
    registry::AdapterRegistry, sdk::VendorSdk, Capabilities, ProviderAdapter, ProviderHandle,
    ProviderKind,
};

pub use crate::reconcile::{
    engine::ReconcileReport,
    plan::{Operation, Phase, Plan},
    snapshot::{MapSnapshot, ViewSpec},
};

pub use crate::{Error as MapError, LoadFailure, Result};

pub use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet};
