use crate::core::geo::LatLng;
use serde::{Deserialize, Serialize};

/// Weighted sample for the heatmap
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatPoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl HeatPoint {
    pub fn new(position: LatLng, weight: f64) -> Self {
        Self {
            lat: position.lat,
            lng: position.lng,
            weight,
        }
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}

/// One colour stop of the heat gradient, `offset` in `[0, 1]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientStop {
    pub offset: f64,
    pub color: String,
}

/// Heatmap overlay. Rendering is entirely the vendor's; this is the
/// declarative description handed to `set_heatmap`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heatmap {
    #[serde(default = "default_id")]
    pub id: String,
    #[serde(default)]
    pub points: Vec<HeatPoint>,
    /// Radius of influence for each point, in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blur: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_intensity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gradient: Vec<GradientStop>,
}

fn default_id() -> String {
    "heatmap".to_string()
}

impl Heatmap {
    pub fn new(points: Vec<HeatPoint>) -> Self {
        Self {
            id: default_id(),
            points,
            radius: None,
            blur: None,
            max_intensity: None,
            opacity: None,
            gradient: Vec::new(),
        }
    }

    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = Some(radius);
        self
    }

    /// Drops points that are not valid coordinates, returning how many went
    pub fn retain_valid(&mut self) -> usize {
        let before = self.points.len();
        self.points
            .retain(|p| p.position().is_valid() && p.weight.is_finite());
        before - self.points.len()
    }

    /// Largest weight, used by vendors that need an explicit max
    pub fn effective_max(&self) -> f64 {
        self.max_intensity.unwrap_or_else(|| {
            self.points
                .iter()
                .map(|p| p.weight)
                .fold(0.0_f64, f64::max)
                .max(1.0)
        })
    }
}
