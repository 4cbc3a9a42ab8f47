//! Overlay entities: markers and vector shapes placed on the map
//!
//! An [`Overlay`] is owned by the declarative snapshot. Adapters only ever see
//! borrowed overlays and hand back an opaque [`crate::provider::OverlayRef`].

use crate::{
    core::geo::{LatLng, LatLngBounds},
    MapError, Result,
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayKind {
    Marker,
    Polygon,
    Polyline,
    Circle,
    Rectangle,
}

impl OverlayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlayKind::Marker => "marker",
            OverlayKind::Polygon => "polygon",
            OverlayKind::Polyline => "polyline",
            OverlayKind::Circle => "circle",
            OverlayKind::Rectangle => "rectangle",
        }
    }
}

impl fmt::Display for OverlayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an overlay. Ids are unique within a kind only, so a marker
/// and a polygon may share an id and still be distinct overlays.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayKey {
    pub kind: OverlayKind,
    pub id: String,
}

impl OverlayKey {
    pub fn new(kind: OverlayKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for OverlayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Geometry {
    Marker { position: LatLng },
    Polygon { path: Vec<LatLng> },
    Polyline { path: Vec<LatLng> },
    /// `radius` is in meters
    Circle { center: LatLng, radius: f64 },
    Rectangle { bounds: LatLngBounds },
}

impl Geometry {
    pub fn kind(&self) -> OverlayKind {
        match self {
            Geometry::Marker { .. } => OverlayKind::Marker,
            Geometry::Polygon { .. } => OverlayKind::Polygon,
            Geometry::Polyline { .. } => OverlayKind::Polyline,
            Geometry::Circle { .. } => OverlayKind::Circle,
            Geometry::Rectangle { .. } => OverlayKind::Rectangle,
        }
    }

    /// Returns a copy with every coordinate passed through `f`
    pub fn map_coords<F>(&self, f: F) -> Geometry
    where
        F: Fn(LatLng) -> LatLng,
    {
        match self {
            Geometry::Marker { position } => Geometry::Marker {
                position: f(*position),
            },
            Geometry::Polygon { path } => Geometry::Polygon {
                path: path.iter().map(|p| f(*p)).collect(),
            },
            Geometry::Polyline { path } => Geometry::Polyline {
                path: path.iter().map(|p| f(*p)).collect(),
            },
            Geometry::Circle { center, radius } => Geometry::Circle {
                center: f(*center),
                radius: *radius,
            },
            Geometry::Rectangle { bounds } => Geometry::Rectangle {
                bounds: bounds.map_corners(f),
            },
        }
    }

    /// Smallest bounds covering the geometry's vertices
    pub fn bounds(&self) -> Option<LatLngBounds> {
        match self {
            Geometry::Marker { position } => Some(LatLngBounds::new(*position, *position)),
            Geometry::Polygon { path } | Geometry::Polyline { path } => {
                LatLngBounds::from_points(path)
            }
            Geometry::Circle { center, .. } => Some(LatLngBounds::new(*center, *center)),
            Geometry::Rectangle { bounds } => Some(*bounds),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Geometry::Marker { position } => check_point(position),
            Geometry::Polygon { path } => {
                path.iter().try_for_each(check_point)?;
                let mut distinct: Vec<&LatLng> = Vec::with_capacity(path.len());
                for point in path {
                    if !distinct.contains(&point) {
                        distinct.push(point);
                    }
                }
                if distinct.len() < 3 {
                    return Err(format!(
                        "polygon needs at least 3 distinct vertices, got {}",
                        distinct.len()
                    ));
                }
                Ok(())
            }
            Geometry::Polyline { path } => {
                path.iter().try_for_each(check_point)?;
                if path.len() < 2 {
                    return Err(format!("polyline needs at least 2 points, got {}", path.len()));
                }
                Ok(())
            }
            Geometry::Circle { center, radius } => {
                check_point(center)?;
                if !radius.is_finite() || *radius <= 0.0 {
                    return Err(format!("circle radius must be positive, got {}", radius));
                }
                Ok(())
            }
            Geometry::Rectangle { bounds } => {
                if !bounds.is_valid() {
                    return Err(format!(
                        "rectangle bounds are out of range or inverted: {:?}",
                        bounds
                    ));
                }
                Ok(())
            }
        }
    }
}

fn check_point(point: &LatLng) -> std::result::Result<(), String> {
    if point.is_valid() {
        Ok(())
    } else {
        Err(format!("coordinate out of range: ({}, {})", point.lat, point.lng))
    }
}

/// Presentation options. Which fields a vendor honours depends on the kind;
/// unknown combinations are ignored by the adapters rather than rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlayStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stroke_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stroke_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stroke_opacity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_opacity: Option<f64>,
    /// Marker tooltip/title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Marker icon URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Popup / info window text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub popup: Option<String>,
    pub draggable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overlay {
    pub id: String,
    pub geometry: Geometry,
    #[serde(default)]
    pub style: OverlayStyle,
    #[serde(default = "crate::props::default_true")]
    pub visible: bool,
}

impl Overlay {
    pub fn new(id: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            id: id.into(),
            geometry,
            style: OverlayStyle::default(),
            visible: true,
        }
    }

    pub fn marker(id: impl Into<String>, position: LatLng) -> Self {
        Self::new(id, Geometry::Marker { position })
    }

    pub fn polygon(id: impl Into<String>, path: Vec<LatLng>) -> Self {
        Self::new(id, Geometry::Polygon { path })
    }

    pub fn polyline(id: impl Into<String>, path: Vec<LatLng>) -> Self {
        Self::new(id, Geometry::Polyline { path })
    }

    pub fn circle(id: impl Into<String>, center: LatLng, radius: f64) -> Self {
        Self::new(id, Geometry::Circle { center, radius })
    }

    pub fn rectangle(id: impl Into<String>, bounds: LatLngBounds) -> Self {
        Self::new(id, Geometry::Rectangle { bounds })
    }

    pub fn with_style(mut self, style: OverlayStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn kind(&self) -> OverlayKind {
        self.geometry.kind()
    }

    pub fn key(&self) -> OverlayKey {
        OverlayKey::new(self.kind(), self.id.clone())
    }

    /// True when only style or visibility differ, which lets adapters skip
    /// rebuilding the native object
    pub fn same_geometry(&self, other: &Overlay) -> bool {
        self.geometry == other.geometry
    }

    /// Copy of this overlay in another datum
    pub fn map_coords<F>(&self, f: F) -> Overlay
    where
        F: Fn(LatLng) -> LatLng,
    {
        Overlay {
            id: self.id.clone(),
            geometry: self.geometry.map_coords(f),
            style: self.style.clone(),
            visible: self.visible,
        }
    }

    /// Checks coordinate ranges and shape well-formedness
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(MapError::InvalidGeometry {
                kind: self.kind(),
                id: self.id.clone(),
                reason: "overlay id must not be empty".to_string(),
            });
        }
        self.geometry
            .validate()
            .map_err(|reason| MapError::InvalidGeometry {
                kind: self.kind(),
                id: self.id.clone(),
                reason,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_scoped_by_kind() {
        let marker = Overlay::marker("a", LatLng::new(1.0, 2.0));
        let polygon = Overlay::polygon(
            "a",
            vec![LatLng::new(0.0, 0.0), LatLng::new(0.0, 1.0), LatLng::new(1.0, 1.0)],
        );
        assert_ne!(marker.key(), polygon.key());
        assert_eq!(marker.key().to_string(), "marker:a");
    }

    #[test]
    fn test_out_of_range_marker_is_rejected() {
        let err = Overlay::marker("m", LatLng::new(95.0, 0.0)).validate().unwrap_err();
        assert!(matches!(err, MapError::InvalidGeometry { kind: OverlayKind::Marker, .. }));
    }

    #[test]
    fn test_degenerate_polygon_is_rejected() {
        let p = LatLng::new(1.0, 1.0);
        let polygon = Overlay::polygon("p", vec![p, p, LatLng::new(2.0, 2.0), p]);
        assert!(polygon.validate().is_err());

        let ok = Overlay::polygon(
            "p",
            vec![LatLng::new(0.0, 0.0), LatLng::new(0.0, 1.0), LatLng::new(1.0, 1.0)],
        );
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_circle_and_polyline_rules() {
        assert!(Overlay::circle("c", LatLng::new(0.0, 0.0), 0.0).validate().is_err());
        assert!(Overlay::circle("c", LatLng::new(0.0, 0.0), f64::NAN).validate().is_err());
        assert!(Overlay::circle("c", LatLng::new(0.0, 0.0), 50.0).validate().is_ok());
        assert!(Overlay::polyline("l", vec![LatLng::new(0.0, 0.0)]).validate().is_err());
    }

    #[test]
    fn test_style_change_keeps_geometry() {
        let a = Overlay::marker("m", LatLng::new(1.0, 1.0));
        let b = a.clone().with_style(OverlayStyle {
            title: Some("hello".to_string()),
            ..OverlayStyle::default()
        });
        assert!(a.same_geometry(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_map_coords_preserves_identity() {
        let circle = Overlay::circle("c", LatLng::new(10.0, 20.0), 30.0);
        let shifted = circle.map_coords(|p| LatLng::new(p.lat + 1.0, p.lng));
        assert_eq!(shifted.id, "c");
        assert_eq!(
            shifted.geometry,
            Geometry::Circle {
                center: LatLng::new(11.0, 20.0),
                radius: 30.0
            }
        );
    }
}
