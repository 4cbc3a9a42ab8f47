use serde::{Deserialize, Serialize};

/// Where a tile/vector layer gets its imagery from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LayerSource {
    /// Raster XYZ template such as `https://{s}.tile.example.org/{z}/{x}/{y}.png`
    UrlTemplate(String),
    /// Vendor style/layer descriptor, only meaningful on vector engines
    Style(serde_json::Value),
}

impl LayerSource {
    pub fn is_url_template(&self) -> bool {
        matches!(self, LayerSource::UrlTemplate(_))
    }
}

/// Tile or vector layer descriptor. Layers are applied in `z_index` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub id: String,
    pub source: LayerSource,
    #[serde(default = "crate::props::default_true")]
    pub visible: bool,
    #[serde(default)]
    pub z_index: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
}

impl Layer {
    pub fn tiles(id: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: LayerSource::UrlTemplate(url_template.into()),
            visible: true,
            z_index: 0,
            opacity: None,
            attribution: None,
        }
    }

    pub fn style(id: impl Into<String>, descriptor: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            source: LayerSource::Style(descriptor),
            visible: true,
            z_index: 0,
            opacity: None,
            attribution: None,
        }
    }

    pub fn with_z_index(mut self, z_index: i32) -> Self {
        self.z_index = z_index;
        self
    }

    pub fn with_attribution(mut self, attribution: impl Into<String>) -> Self {
        self.attribution = Some(attribution.into());
        self
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = Some(opacity.clamp(0.0, 1.0));
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn url_template(&self) -> Option<&str> {
        match &self.source {
            LayerSource::UrlTemplate(url) => Some(url),
            LayerSource::Style(_) => None,
        }
    }
}

/// Stable sort by z-index, keeping declaration order for equal indices
pub fn sort_by_z_index(layers: &mut [Layer]) {
    layers.sort_by_key(|layer| layer.z_index);
}
