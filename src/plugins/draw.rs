use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawTool {
    Marker,
    Polyline,
    Polygon,
    Rectangle,
    Circle,
}

impl DrawTool {
    pub const ALL: [DrawTool; 5] = [
        DrawTool::Marker,
        DrawTool::Polyline,
        DrawTool::Polygon,
        DrawTool::Rectangle,
        DrawTool::Circle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DrawTool::Marker => "marker",
            DrawTool::Polyline => "polyline",
            DrawTool::Polygon => "polygon",
            DrawTool::Rectangle => "rectangle",
            DrawTool::Circle => "circle",
        }
    }
}

/// Default style applied to shapes the user draws
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DrawStyle {
    pub stroke_color: String,
    pub fill_color: String,
    pub stroke_weight: f64,
    pub fill_opacity: f64,
}

impl Default for DrawStyle {
    fn default() -> Self {
        Self {
            stroke_color: "#ff0000".to_string(),
            fill_color: "#ff0000".to_string(),
            stroke_weight: 2.0,
            fill_opacity: 0.25,
        }
    }
}

/// Which drawing tools are offered. Stateless: the adapter replaces its
/// drawing control wholesale whenever this changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawingToolConfig {
    #[serde(default = "all_tools")]
    pub tools: Vec<DrawTool>,
    #[serde(default)]
    pub style: DrawStyle,
    /// Control corner, e.g. `topleft`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

fn all_tools() -> Vec<DrawTool> {
    DrawTool::ALL.to_vec()
}

impl DrawingToolConfig {
    pub fn new(tools: Vec<DrawTool>) -> Self {
        Self {
            tools,
            style: DrawStyle::default(),
            position: None,
        }
    }

    pub fn enables(&self, tool: DrawTool) -> bool {
        self.tools.contains(&tool)
    }
}

impl Default for DrawingToolConfig {
    fn default() -> Self {
        Self::new(all_tools())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tools_default_to_all() {
        let config: DrawingToolConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.tools.len(), 5);
        assert!(config.enables(DrawTool::Circle));
    }

    #[test]
    fn test_explicit_tool_list() {
        let config: DrawingToolConfig =
            serde_json::from_str(r#"{"tools": ["marker", "polygon"], "position": "topright"}"#)
                .unwrap();
        assert!(config.enables(DrawTool::Polygon));
        assert!(!config.enables(DrawTool::Rectangle));
        assert_eq!(config.position.as_deref(), Some("topright"));
    }
}
