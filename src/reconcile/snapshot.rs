use crate::{
    core::{
        constants::{DEFAULT_FIT_PADDING, DEFAULT_MAX_ZOOM, DEFAULT_MIN_ZOOM, DEFAULT_ZOOM},
        geo::{LatLng, LatLngBounds},
    },
    layers::{
        layer::Layer,
        overlay::{Overlay, OverlayKind},
    },
    plugins::{cluster::ClusterSpec, draw::DrawingToolConfig, heatmap::Heatmap},
};

/// Desired camera. `bounds`, when present, wins over `center`/`zoom`.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSpec {
    pub center: LatLng,
    pub zoom: f64,
    pub bounds: Option<LatLngBounds>,
    /// Pixel padding for `bounds`
    pub padding: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl ViewSpec {
    pub fn new(center: LatLng, zoom: f64) -> Self {
        Self {
            center,
            zoom,
            ..Self::default()
        }
    }

    pub fn with_bounds(mut self, bounds: LatLngBounds, padding: f64) -> Self {
        self.bounds = Some(bounds);
        self.padding = padding;
        self
    }

    pub fn with_zoom_range(mut self, min_zoom: f64, max_zoom: f64) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    /// Same camera without the bounds request
    pub fn without_bounds(&self) -> Self {
        Self {
            bounds: None,
            ..self.clone()
        }
    }
}

impl Default for ViewSpec {
    fn default() -> Self {
        Self {
            center: LatLng::default(),
            zoom: DEFAULT_ZOOM,
            bounds: None,
            padding: DEFAULT_FIT_PADDING,
            min_zoom: DEFAULT_MIN_ZOOM,
            max_zoom: DEFAULT_MAX_ZOOM,
        }
    }
}

/// Immutable description of everything the map should show.
///
/// Built from props on every change and never mutated afterwards; the engine
/// keeps the last one it applied and diffs the next against it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapSnapshot {
    pub view: ViewSpec,
    /// In insertion order; `(kind, id)` is unique
    pub overlays: Vec<Overlay>,
    /// Sorted by `z_index`, ties in declaration order
    pub layers: Vec<Layer>,
    pub cluster: Option<ClusterSpec>,
    pub heatmap: Option<Heatmap>,
    pub drawing: Option<DrawingToolConfig>,
}

impl MapSnapshot {
    pub fn new(view: ViewSpec) -> Self {
        Self {
            view,
            ..Self::default()
        }
    }

    pub fn with_view(mut self, view: ViewSpec) -> Self {
        self.view = view;
        self
    }

    pub fn with_overlays(mut self, overlays: Vec<Overlay>) -> Self {
        self.overlays = overlays;
        self
    }

    pub fn with_layers(mut self, layers: Vec<Layer>) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_cluster(mut self, cluster: ClusterSpec) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn with_heatmap(mut self, heatmap: Heatmap) -> Self {
        self.heatmap = Some(heatmap);
        self
    }

    pub fn with_drawing(mut self, drawing: DrawingToolConfig) -> Self {
        self.drawing = Some(drawing);
        self
    }

    pub fn has_markers(&self) -> bool {
        self.overlays
            .iter()
            .any(|overlay| overlay.kind() == OverlayKind::Marker)
    }

    /// Ids of visible markers in snapshot order
    pub fn visible_marker_ids(&self) -> Vec<String> {
        self.overlays
            .iter()
            .filter(|overlay| overlay.kind() == OverlayKind::Marker && overlay.visible)
            .map(|overlay| overlay.id.clone())
            .collect()
    }

    pub fn overlay(&self, kind: OverlayKind, id: &str) -> Option<&Overlay> {
        self.overlays
            .iter()
            .find(|overlay| overlay.kind() == kind && overlay.id == id)
    }
}
