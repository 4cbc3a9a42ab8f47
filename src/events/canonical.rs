//! The vendor-neutral event vocabulary
//!
//! Every vendor callback reaching the consumer has been translated into one
//! of these kinds by its adapter. Coordinates are always WGS-84.

use crate::{
    core::geo::{LatLng, Point},
    MapError,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CanonicalEventKind {
    #[serde(rename = "click")]
    Click,
    #[serde(rename = "dblclick")]
    DoubleClick,
    #[serde(rename = "move")]
    Move,
    #[serde(rename = "zoom")]
    Zoom,
    #[serde(rename = "load")]
    Load,
    #[serde(rename = "markerClick")]
    MarkerClick,
    #[serde(rename = "markerHover")]
    MarkerHover,
}

impl CanonicalEventKind {
    /// Kinds that are subscribed on the map object as soon as it is ready
    pub const MAP_KINDS: [CanonicalEventKind; 5] = [
        CanonicalEventKind::Click,
        CanonicalEventKind::DoubleClick,
        CanonicalEventKind::Move,
        CanonicalEventKind::Zoom,
        CanonicalEventKind::Load,
    ];

    /// Kinds that only make sense while markers are on the map
    pub const MARKER_KINDS: [CanonicalEventKind; 2] = [
        CanonicalEventKind::MarkerClick,
        CanonicalEventKind::MarkerHover,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalEventKind::Click => "click",
            CanonicalEventKind::DoubleClick => "dblclick",
            CanonicalEventKind::Move => "move",
            CanonicalEventKind::Zoom => "zoom",
            CanonicalEventKind::Load => "load",
            CanonicalEventKind::MarkerClick => "markerClick",
            CanonicalEventKind::MarkerHover => "markerHover",
        }
    }

    pub fn is_marker_kind(&self) -> bool {
        Self::MARKER_KINDS.contains(self)
    }
}

impl fmt::Display for CanonicalEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalEventKind {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::MAP_KINDS
            .iter()
            .chain(Self::MARKER_KINDS.iter())
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| MapError::config(format!("unknown event kind '{}'", s)))
    }
}

/// A translated vendor event.
///
/// `raw` keeps the vendor payload for consumers that need vendor specifics;
/// nothing inside the crate reads it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalEvent {
    pub kind: CanonicalEventKind,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub overlay_id: Option<String>,
    pub pixel: Option<Point>,
    pub zoom: Option<f64>,
    pub raw: serde_json::Value,
}

impl CanonicalEvent {
    pub fn new(kind: CanonicalEventKind) -> Self {
        Self {
            kind,
            lat: None,
            lng: None,
            overlay_id: None,
            pixel: None,
            zoom: None,
            raw: serde_json::Value::Null,
        }
    }

    pub fn with_position(mut self, position: LatLng) -> Self {
        self.lat = Some(position.lat);
        self.lng = Some(position.lng);
        self
    }

    pub fn with_overlay(mut self, overlay_id: impl Into<String>) -> Self {
        self.overlay_id = Some(overlay_id.into());
        self
    }

    pub fn with_pixel(mut self, pixel: Point) -> Self {
        self.pixel = Some(pixel);
        self
    }

    pub fn with_zoom(mut self, zoom: f64) -> Self {
        self.zoom = Some(zoom);
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = raw;
        self
    }

    pub fn position(&self) -> Option<LatLng> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(LatLng::new(lat, lng)),
            _ => None,
        }
    }
}

/// What consumers receive: a canonical event or a surfaced error
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    Canonical(CanonicalEvent),
    Error(MapError),
}

impl MapEvent {
    /// Listener key, `"error"` for errors
    pub fn key(&self) -> &'static str {
        match self {
            MapEvent::Canonical(event) => event.kind.as_str(),
            MapEvent::Error(_) => "error",
        }
    }

    pub fn as_canonical(&self) -> Option<&CanonicalEvent> {
        match self {
            MapEvent::Canonical(event) => Some(event),
            MapEvent::Error(_) => None,
        }
    }

    pub fn as_error(&self) -> Option<&MapError> {
        match self {
            MapEvent::Error(error) => Some(error),
            MapEvent::Canonical(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in CanonicalEventKind::MAP_KINDS
            .iter()
            .chain(CanonicalEventKind::MARKER_KINDS.iter())
        {
            assert_eq!(kind.as_str().parse::<CanonicalEventKind>().unwrap(), *kind);
        }
        assert!("drag".parse::<CanonicalEventKind>().is_err());
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&CanonicalEventKind::DoubleClick).unwrap();
        assert_eq!(json, "\"dblclick\"");
        let kind: CanonicalEventKind = serde_json::from_str("\"markerHover\"").unwrap();
        assert_eq!(kind, CanonicalEventKind::MarkerHover);
    }

    #[test]
    fn test_builder() {
        let event = CanonicalEvent::new(CanonicalEventKind::MarkerClick)
            .with_position(LatLng::new(1.0, 2.0))
            .with_overlay("m1")
            .with_zoom(4.0);
        assert_eq!(event.position(), Some(LatLng::new(1.0, 2.0)));
        assert_eq!(event.overlay_id.as_deref(), Some("m1"));
        assert_eq!(MapEvent::Canonical(event).key(), "markerClick");
    }
}
