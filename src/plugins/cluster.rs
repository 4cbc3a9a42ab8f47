//! Marker clustering configuration
//!
//! Clustering never owns or mutates markers. A [`ClusterSpec`] names the
//! visible markers that belong to it and is rebuilt from scratch whenever the
//! member set, a member's content or the options change.

use crate::core::constants::DEFAULT_CLUSTER_ID;
use serde::{Deserialize, Serialize};

/// Options shared by the vendor clustering plugins.
///
/// Fields that a vendor does not understand are dropped by its adapter with a
/// development warning. Anything under `vendor` is forwarded untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterOptions {
    /// Pixel radius within which markers merge (Leaflet markercluster)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cluster_radius: Option<f64>,
    /// Zoom at and above which markers are shown individually
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_clustering_at_zoom: Option<f64>,
    /// Grid cell size in pixels (Google, Baidu, Amap clusterers)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_size: Option<f64>,
    #[serde(flatten)]
    pub vendor: serde_json::Map<String, serde_json::Value>,
}

impl ClusterOptions {
    pub fn is_empty(&self) -> bool {
        self.max_cluster_radius.is_none()
            && self.disable_clustering_at_zoom.is_none()
            && self.grid_size.is_none()
            && self.vendor.is_empty()
    }

    /// Option names that are set, in camelCase, for capability filtering
    pub fn set_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        if self.max_cluster_radius.is_some() {
            fields.push("maxClusterRadius".to_string());
        }
        if self.disable_clustering_at_zoom.is_some() {
            fields.push("disableClusteringAtZoom".to_string());
        }
        if self.grid_size.is_some() {
            fields.push("gridSize".to_string());
        }
        fields.extend(self.vendor.keys().cloned());
        fields
    }

    /// JSON object of the options whose names appear in `supported`
    pub fn to_json_filtered(&self, supported: &[&str]) -> serde_json::Map<String, serde_json::Value> {
        let mut out = serde_json::Map::new();
        let all = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => return out,
        };
        for (key, value) in all {
            if supported.contains(&key.as_str()) || self.vendor.contains_key(&key) {
                out.insert(key, value);
            }
        }
        out
    }
}

/// Declarative clustering request coming from props
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    pub id: String,
    pub options: ClusterOptions,
}

impl ClusterConfig {
    pub fn new(options: ClusterOptions) -> Self {
        Self {
            id: DEFAULT_CLUSTER_ID.to_string(),
            options,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self::new(ClusterOptions::default())
    }
}

/// A cluster as it appears in a snapshot: config plus resolved members
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSpec {
    pub id: String,
    pub options: ClusterOptions,
    /// Ids of visible markers, in snapshot order
    pub members: Vec<String>,
}

impl ClusterSpec {
    pub fn from_config(config: &ClusterConfig, members: Vec<String>) -> Self {
        Self {
            id: config.id.clone(),
            options: config.options.clone(),
            members,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vendor_options_pass_through() {
        let options: ClusterOptions = serde_json::from_value(json!({
            "maxClusterRadius": 60,
            "spiderfyOnMaxZoom": false
        }))
        .unwrap();

        assert_eq!(options.max_cluster_radius, Some(60.0));
        assert_eq!(options.vendor.get("spiderfyOnMaxZoom"), Some(&json!(false)));
        assert_eq!(
            options.set_fields(),
            vec!["maxClusterRadius".to_string(), "spiderfyOnMaxZoom".to_string()]
        );
    }

    #[test]
    fn test_filtering_keeps_supported_and_vendor_keys() {
        let options = ClusterOptions {
            max_cluster_radius: Some(80.0),
            grid_size: Some(40.0),
            ..ClusterOptions::default()
        };
        let filtered = options.to_json_filtered(&["gridSize"]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.get("gridSize"), Some(&json!(40.0)));
    }
}
