//! The consumer-facing prop surface
//!
//! [`MapProps`] deserializes straight from a camelCase JSON props document.
//! [`MapProps::validate`] rejects configurations that cannot be applied at
//! all; [`MapProps::to_snapshot`] turns valid props into an immutable
//! [`MapSnapshot`], skipping individual overlays whose geometry is bad.

use crate::{
    core::{
        constants::{
            BASE_LAYER_ID, DEFAULT_ATTRIBUTION, DEFAULT_MAX_ZOOM, DEFAULT_MIN_ZOOM,
            DEFAULT_TILES_URL, DEFAULT_ZOOM,
        },
        geo::{LatLng, LatLngBounds},
    },
    layers::{
        layer::{sort_by_z_index, Layer},
        overlay::{Geometry, Overlay, OverlayKey, OverlayStyle},
    },
    plugins::{
        cluster::{ClusterConfig, ClusterOptions, ClusterSpec},
        draw::DrawingToolConfig,
        heatmap::Heatmap,
    },
    provider::ProviderKind,
    reconcile::snapshot::{MapSnapshot, ViewSpec},
    MapError, Result,
};
use fxhash::FxHashSet;
use serde::{Deserialize, Serialize};

pub(crate) fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerProps {
    pub id: String,
    pub position: LatLng,
    #[serde(flatten)]
    pub style: OverlayStyle,
    #[serde(default = "default_true")]
    pub visible: bool,
}

/// A polygon or polyline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathProps {
    pub id: String,
    pub path: Vec<LatLng>,
    #[serde(flatten)]
    pub style: OverlayStyle,
    #[serde(default = "default_true")]
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircleProps {
    pub id: String,
    pub center: LatLng,
    /// Meters
    pub radius: f64,
    #[serde(flatten)]
    pub style: OverlayStyle,
    #[serde(default = "default_true")]
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RectangleProps {
    pub id: String,
    pub bounds: LatLngBounds,
    #[serde(flatten)]
    pub style: OverlayStyle,
    #[serde(default = "default_true")]
    pub visible: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MapProps {
    pub center: Option<LatLng>,
    pub zoom: Option<f64>,
    pub provider: ProviderKind,
    pub tiles_url: Option<String>,
    pub attribution: Option<String>,
    pub markers: Vec<MarkerProps>,
    pub polygons: Vec<PathProps>,
    pub polylines: Vec<PathProps>,
    pub circles: Vec<CircleProps>,
    pub rectangles: Vec<RectangleProps>,
    pub cluster_markers: bool,
    pub clustering_options: Option<ClusterOptions>,
    pub layers: Vec<Layer>,
    pub drawing_tools: Option<DrawingToolConfig>,
    pub heatmap: Option<Heatmap>,
    pub bounds: Option<LatLngBounds>,
    pub bounds_padding: Option<f64>,
    pub min_zoom: Option<f64>,
    pub max_zoom: Option<f64>,
    pub api_key: Option<String>,
    /// Consumer-forced loading indicator, ORed with the derived one
    pub loading: bool,
    /// Consumer-forced error state, ORed with the derived one
    pub error: bool,
    /// Replaces the displayed error text
    pub error_message: Option<String>,
}

impl MapProps {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| MapError::config(format!("invalid props: {}", e)))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| MapError::config(format!("invalid props: {}", e)))
    }

    pub fn min_zoom(&self) -> f64 {
        self.min_zoom.unwrap_or(DEFAULT_MIN_ZOOM)
    }

    pub fn max_zoom(&self) -> f64 {
        self.max_zoom.unwrap_or(DEFAULT_MAX_ZOOM)
    }

    /// Rejects props that cannot be applied as a whole
    pub fn validate(&self) -> Result<()> {
        let (min_zoom, max_zoom) = (self.min_zoom(), self.max_zoom());
        if !min_zoom.is_finite() || !max_zoom.is_finite() {
            return Err(MapError::config("zoom limits must be finite"));
        }
        if min_zoom > max_zoom {
            return Err(MapError::config(format!(
                "minZoom {} is greater than maxZoom {}",
                min_zoom, max_zoom
            )));
        }
        if let Some(zoom) = self.zoom {
            if !zoom.is_finite() {
                return Err(MapError::config("zoom must be finite"));
            }
        }
        if let Some(center) = self.center {
            if !center.is_valid() {
                return Err(MapError::config(format!(
                    "center out of range: ({}, {})",
                    center.lat, center.lng
                )));
            }
        }
        if let Some(bounds) = self.bounds {
            if !bounds.is_valid() {
                return Err(MapError::config("bounds are not a valid south-west/north-east box"));
            }
            if let Some(center) = self.center {
                if !bounds.contains(&center) {
                    return Err(MapError::config(format!(
                        "center ({}, {}) lies outside bounds",
                        center.lat, center.lng
                    )));
                }
            }
        }
        if let Some(padding) = self.bounds_padding {
            if !(padding.is_finite() && padding >= 0.0) {
                return Err(MapError::config("boundsPadding must be a non-negative number"));
            }
        }
        Ok(())
    }

    /// Builds the snapshot the engine reconciles towards, plus one
    /// `InvalidGeometry` error per overlay that was skipped. Call
    /// [`MapProps::validate`] first.
    pub fn to_snapshot(&self, default_padding: f64) -> (MapSnapshot, Vec<MapError>) {
        let (min_zoom, max_zoom) = (self.min_zoom(), self.max_zoom());
        let zoom = self.zoom.unwrap_or(DEFAULT_ZOOM).clamp(min_zoom, max_zoom);
        let center = self
            .center
            .or_else(|| self.bounds.map(|bounds| bounds.center()))
            .unwrap_or_default();

        let mut view = ViewSpec::new(center, zoom).with_zoom_range(min_zoom, max_zoom);
        if let Some(bounds) = self.bounds {
            view = view.with_bounds(bounds, self.bounds_padding.unwrap_or(default_padding));
        }

        let (overlays, skipped) = self.overlays();
        let mut snapshot = MapSnapshot::new(view)
            .with_overlays(overlays)
            .with_layers(self.layers());

        if let Some(heatmap) = &self.heatmap {
            let mut heatmap = heatmap.clone();
            let dropped = heatmap.retain_valid();
            if dropped > 0 {
                log::warn!("heatmap '{}': dropped {} invalid points", heatmap.id, dropped);
            }
            snapshot = snapshot.with_heatmap(heatmap);
        }
        if let Some(drawing) = &self.drawing_tools {
            snapshot = snapshot.with_drawing(drawing.clone());
        }
        if self.cluster_markers {
            let config = ClusterConfig::new(self.clustering_options.clone().unwrap_or_default());
            let members = snapshot.visible_marker_ids();
            snapshot = snapshot.with_cluster(ClusterSpec::from_config(&config, members));
        }

        (snapshot, skipped)
    }

    fn overlays(&self) -> (Vec<Overlay>, Vec<MapError>) {
        let markers = self.markers.iter().map(|m| {
            overlay(&m.id, Geometry::Marker { position: m.position }, &m.style, m.visible)
        });
        let polygons = self.polygons.iter().map(|p| {
            overlay(&p.id, Geometry::Polygon { path: p.path.clone() }, &p.style, p.visible)
        });
        let polylines = self.polylines.iter().map(|p| {
            overlay(&p.id, Geometry::Polyline { path: p.path.clone() }, &p.style, p.visible)
        });
        let circles = self.circles.iter().map(|c| {
            overlay(
                &c.id,
                Geometry::Circle {
                    center: c.center,
                    radius: c.radius,
                },
                &c.style,
                c.visible,
            )
        });
        let rectangles = self.rectangles.iter().map(|r| {
            overlay(&r.id, Geometry::Rectangle { bounds: r.bounds }, &r.style, r.visible)
        });

        let mut seen: FxHashSet<OverlayKey> = FxHashSet::default();
        let mut overlays = Vec::new();
        let mut skipped = Vec::new();
        for overlay in markers
            .chain(polygons)
            .chain(polylines)
            .chain(circles)
            .chain(rectangles)
        {
            if let Err(error) = overlay.validate() {
                skipped.push(error);
                continue;
            }
            if !seen.insert(overlay.key()) {
                skipped.push(MapError::InvalidGeometry {
                    kind: overlay.kind(),
                    id: overlay.id.clone(),
                    reason: "duplicate id".to_string(),
                });
                continue;
            }
            overlays.push(overlay);
        }
        (overlays, skipped)
    }

    fn layers(&self) -> Vec<Layer> {
        let mut layers = Vec::with_capacity(self.layers.len() + 1);
        let base_url = match (&self.tiles_url, self.provider) {
            (Some(url), _) => Some(url.clone()),
            // Leaflet has no imagery of its own
            (None, ProviderKind::Leaflet) => Some(DEFAULT_TILES_URL.to_string()),
            (None, _) => None,
        };
        if let Some(url) = base_url {
            let attribution = self
                .attribution
                .clone()
                .unwrap_or_else(|| DEFAULT_ATTRIBUTION.to_string());
            layers.push(
                Layer::tiles(BASE_LAYER_ID, url)
                    .with_z_index(i32::MIN)
                    .with_attribution(attribution),
            );
        }

        let mut seen: FxHashSet<&str> = layers.iter().map(|layer| layer.id.as_str()).collect();
        let mut extra = Vec::new();
        for layer in &self.layers {
            if seen.insert(layer.id.as_str()) {
                extra.push(layer.clone());
            } else {
                log::warn!("ignoring layer with duplicate id '{}'", layer.id);
            }
        }
        layers.extend(extra);
        sort_by_z_index(&mut layers);
        layers
    }
}

fn overlay(id: &str, geometry: Geometry, style: &OverlayStyle, visible: bool) -> Overlay {
    Overlay::new(id, geometry)
        .with_style(style.clone())
        .with_visible(visible)
}
