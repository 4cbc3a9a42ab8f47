//! AMap (Gaode) JavaScript API 1.4 binding (`AMap.*`)
//!
//! AMap works in GCJ-02 with `[lng, lat]` pairs. Clusterer, heatmap and
//! mouse tool are plugins requested on the script URL.

use crate::{
    core::{
        config::MapContainer,
        geo::{LatLng, LatLngBounds},
    },
    events::canonical::CanonicalEventKind,
    layers::{
        layer::{Layer, LayerSource},
        overlay::{Geometry, Overlay, OverlayStyle},
    },
    plugins::{
        draw::{DrawTool, DrawingToolConfig},
        heatmap::Heatmap,
    },
    provider::{
        adapter::{Dialect, SdkAdapter, UpdateOutcome},
        sdk::{object_arg, NativeId, NativeRef, ScriptRequest, SdkFault, SdkResult, VendorSdk},
        Capabilities, InitOptions, ProviderKind,
    },
};
use serde_json::{json, Map, Value};

pub struct Amap;

pub type AmapAdapter = SdkAdapter<Amap>;

const SCRIPT_URL: &str = "https://webapi.amap.com/maps";
const PLUGINS: &str = "AMap.MarkerClusterer,AMap.Heatmap,AMap.MouseTool";

fn point(p: LatLng) -> Value {
    json!([p.lng, p.lat])
}

fn path(points: &[LatLng]) -> Value {
    Value::Array(points.iter().copied().map(point).collect())
}

fn bounds(b: &LatLngBounds) -> Value {
    json!([[b.west(), b.south()], [b.east(), b.north()]])
}

fn object(native: &NativeRef) -> SdkResult<NativeId> {
    native
        .object_id()
        .ok_or_else(|| SdkFault::Unsupported("named resources".to_string()))
}

fn shape_options(style: &OverlayStyle) -> Map<String, Value> {
    let mut options = Map::new();
    if let Some(color) = &style.stroke_color {
        options.insert("strokeColor".into(), json!(color));
    }
    if let Some(weight) = style.stroke_weight {
        options.insert("strokeWeight".into(), json!(weight));
    }
    if let Some(opacity) = style.stroke_opacity {
        options.insert("strokeOpacity".into(), json!(opacity));
    }
    if let Some(color) = &style.fill_color {
        options.insert("fillColor".into(), json!(color));
    }
    if let Some(opacity) = style.fill_opacity {
        options.insert("fillOpacity".into(), json!(opacity));
    }
    if let Some(z_index) = style.z_index {
        options.insert("zIndex".into(), json!(z_index));
    }
    options
}

/// Full constructor options for a shape, geometry included
fn shape_with_geometry(overlay: &Overlay) -> (&'static str, Value) {
    let mut options = shape_options(&overlay.style);
    let class = match &overlay.geometry {
        Geometry::Marker { .. } => "AMap.Marker",
        Geometry::Polygon { path: points } => {
            options.insert("path".into(), path(points));
            "AMap.Polygon"
        }
        Geometry::Polyline { path: points } => {
            options.insert("path".into(), path(points));
            "AMap.Polyline"
        }
        Geometry::Circle { center, radius } => {
            options.insert("center".into(), point(*center));
            options.insert("radius".into(), json!(radius));
            "AMap.Circle"
        }
        Geometry::Rectangle { bounds: b } => {
            options.insert("bounds".into(), bounds(b));
            "AMap.Rectangle"
        }
    };
    (class, Value::Object(options))
}

fn set_visible(sdk: &dyn VendorSdk, id: NativeId, visible: bool) -> SdkResult<()> {
    let method = if visible { "show" } else { "hide" };
    sdk.invoke(id, method, vec![]).map(|_| ())
}

fn draw_method(tool: DrawTool) -> &'static str {
    match tool {
        DrawTool::Marker => "marker",
        DrawTool::Polyline => "polyline",
        DrawTool::Polygon => "polygon",
        DrawTool::Rectangle => "rectangle",
        DrawTool::Circle => "circle",
    }
}

impl Dialect for Amap {
    const KIND: ProviderKind = ProviderKind::Amap;
    const POSITION_KEY: &'static str = "lnglat";
    const PIXEL_KEY: &'static str = "pixel";

    fn capabilities() -> Capabilities {
        Capabilities::all()
    }

    fn requires_api_key() -> bool {
        true
    }

    fn script(api_key: Option<&str>) -> ScriptRequest {
        ScriptRequest {
            provider: Self::KIND,
            url: format!(
                "{}?v=1.4.15&key={}&plugin={}",
                SCRIPT_URL,
                api_key.unwrap_or_default(),
                PLUGINS
            ),
            global: "AMap",
        }
    }

    fn create_map(
        sdk: &dyn VendorSdk,
        container: &MapContainer,
        center: LatLng,
        options: &InitOptions,
    ) -> SdkResult<NativeId> {
        sdk.construct(
            "AMap.Map",
            vec![
                json!(container.element_id),
                json!({
                    "center": point(center),
                    "zoom": options.zoom,
                    "zooms": [options.min_zoom, options.max_zoom],
                }),
            ],
        )
    }

    fn destroy_map(sdk: &dyn VendorSdk, map: NativeId) {
        if let Err(fault) = sdk.invoke(map, "destroy", vec![]) {
            log::debug!("amap map.destroy failed: {}", fault);
        }
        sdk.release(map);
    }

    fn set_view(sdk: &dyn VendorSdk, map: NativeId, center: LatLng, zoom: f64) -> SdkResult<()> {
        sdk.invoke(map, "setZoomAndCenter", vec![json!(zoom), point(center)])
            .map(|_| ())
    }

    fn fit_bounds(
        sdk: &dyn VendorSdk,
        map: NativeId,
        b: &LatLngBounds,
        padding: f64,
    ) -> SdkResult<()> {
        let bounds = sdk.construct("AMap.Bounds", vec![point(b.south_west), point(b.north_east)])?;
        sdk.invoke(
            map,
            "setBounds",
            vec![object_arg(bounds), json!(false), json!([padding, padding, padding, padding])],
        )?;
        sdk.release(bounds);
        Ok(())
    }

    fn add_overlay(sdk: &dyn VendorSdk, map: NativeId, overlay: &Overlay) -> SdkResult<NativeRef> {
        let style = &overlay.style;
        let id = match &overlay.geometry {
            Geometry::Marker { position } => sdk.construct(
                "AMap.Marker",
                vec![json!({
                    "position": point(*position),
                    "title": style.title,
                    "icon": style.icon,
                    "draggable": style.draggable,
                    "zIndex": style.z_index.unwrap_or(100),
                })],
            )?,
            _ => {
                let (class, options) = shape_with_geometry(overlay);
                sdk.construct(class, vec![options])?
            }
        };

        if let Some(popup) = &style.popup {
            sdk.invoke(id, "setExtData", vec![json!({ "popup": popup })])?;
        }
        sdk.invoke(map, "add", vec![object_arg(id)])?;
        if !overlay.visible {
            set_visible(sdk, id, false)?;
        }
        Ok(NativeRef::Object(id))
    }

    fn update_overlay(
        sdk: &dyn VendorSdk,
        _map: NativeId,
        native: &NativeRef,
        previous: &Overlay,
        next: &Overlay,
    ) -> SdkResult<UpdateOutcome> {
        let id = object(native)?;
        let (old, new) = (&previous.style, &next.style);

        match &next.geometry {
            Geometry::Marker { position } => {
                if previous.geometry != next.geometry {
                    sdk.invoke(id, "setPosition", vec![point(*position)])?;
                }
                if old.icon != new.icon {
                    sdk.invoke(id, "setIcon", vec![json!(new.icon)])?;
                }
                if old.title != new.title {
                    sdk.invoke(id, "setTitle", vec![json!(new.title)])?;
                }
                if old.draggable != new.draggable {
                    sdk.invoke(id, "setDraggable", vec![json!(new.draggable)])?;
                }
                if old.z_index != new.z_index {
                    sdk.invoke(id, "setzIndex", vec![json!(new.z_index.unwrap_or(100))])?;
                }
            }
            _ => {
                if previous.geometry != next.geometry || old != new {
                    let (_, options) = shape_with_geometry(next);
                    sdk.invoke(id, "setOptions", vec![options])?;
                }
            }
        }
        if old.popup != new.popup {
            sdk.invoke(id, "setExtData", vec![json!({ "popup": new.popup })])?;
        }

        if previous.visible != next.visible {
            set_visible(sdk, id, next.visible)?;
        }
        Ok(UpdateOutcome::InPlace)
    }

    fn remove_overlay(sdk: &dyn VendorSdk, map: NativeId, native: &NativeRef) -> SdkResult<()> {
        sdk.invoke(map, "remove", vec![native.to_arg()]).map(|_| ())
    }

    fn set_layer(
        sdk: &dyn VendorSdk,
        map: NativeId,
        existing: Option<&NativeRef>,
        layer: &Layer,
    ) -> SdkResult<NativeRef> {
        match (&layer.source, existing) {
            (LayerSource::UrlTemplate(url), Some(NativeRef::Object(tiles))) => {
                sdk.invoke(*tiles, "setTileUrl", vec![json!(url)])?;
                sdk.invoke(*tiles, "setOpacity", vec![json!(layer.opacity.unwrap_or(1.0))])?;
                sdk.invoke(*tiles, "setzIndex", vec![json!(layer.z_index)])?;
                set_visible(sdk, *tiles, layer.visible)?;
                Ok(NativeRef::Object(*tiles))
            }
            (LayerSource::UrlTemplate(url), existing) => {
                if let Some(native) = existing {
                    Self::remove_layer(sdk, map, native)?;
                }
                let tiles = sdk.construct(
                    "AMap.TileLayer",
                    vec![json!({
                        "tileUrl": url,
                        "zIndex": layer.z_index,
                        "opacity": layer.opacity.unwrap_or(1.0),
                        "visible": layer.visible,
                    })],
                )?;
                sdk.invoke(map, "add", vec![object_arg(tiles)])?;
                Ok(NativeRef::Object(tiles))
            }
            (LayerSource::Style(style), existing) => {
                if let Some(native) = existing.filter(|native| native.object_id().is_some()) {
                    Self::remove_layer(sdk, map, native)?;
                }
                let style = if layer.visible { style.clone() } else { json!("amap://styles/normal") };
                sdk.invoke(map, "setMapStyle", vec![style])?;
                Ok(NativeRef::Named(layer.id.clone()))
            }
        }
    }

    fn remove_layer(sdk: &dyn VendorSdk, map: NativeId, native: &NativeRef) -> SdkResult<()> {
        match native {
            NativeRef::Object(_) => sdk.invoke(map, "remove", vec![native.to_arg()]).map(|_| ()),
            NativeRef::Named(_) => sdk
                .invoke(map, "setMapStyle", vec![json!("amap://styles/normal")])
                .map(|_| ()),
        }
    }

    fn native_event(kind: CanonicalEventKind) -> &'static str {
        match kind {
            CanonicalEventKind::Click | CanonicalEventKind::MarkerClick => "click",
            CanonicalEventKind::DoubleClick => "dblclick",
            CanonicalEventKind::Move => "moveend",
            CanonicalEventKind::Zoom => "zoomend",
            CanonicalEventKind::Load => "complete",
            CanonicalEventKind::MarkerHover => "mouseover",
        }
    }

    fn supported_cluster_options() -> &'static [&'static str] {
        &["gridSize", "disableClusteringAtZoom"]
    }

    fn create_cluster(
        sdk: &dyn VendorSdk,
        map: NativeId,
        members: &[NativeRef],
        options: &Map<String, Value>,
    ) -> SdkResult<NativeRef> {
        let mut options = options.clone();
        if let Some(zoom) = options.remove("disableClusteringAtZoom") {
            options.insert("maxZoom".into(), zoom);
        }
        let markers: Vec<Value> = members.iter().map(NativeRef::to_arg).collect();
        let clusterer = sdk.construct(
            "AMap.MarkerClusterer",
            vec![object_arg(map), Value::Array(markers), Value::Object(options)],
        )?;
        Ok(NativeRef::Object(clusterer))
    }

    fn dispose_cluster(
        sdk: &dyn VendorSdk,
        map: NativeId,
        cluster: &NativeRef,
        members: &[NativeRef],
    ) -> SdkResult<()> {
        let clusterer = object(cluster)?;
        sdk.invoke(clusterer, "clearMarkers", vec![])?;
        sdk.invoke(clusterer, "setMap", vec![Value::Null])?;
        let markers: Vec<Value> = members.iter().map(NativeRef::to_arg).collect();
        sdk.invoke(map, "add", vec![Value::Array(markers)])?;
        Ok(())
    }

    fn swap_cluster_member(
        sdk: &dyn VendorSdk,
        _map: NativeId,
        cluster: &NativeRef,
        old: &NativeRef,
        new: &NativeRef,
    ) -> SdkResult<()> {
        let clusterer = object(cluster)?;
        sdk.invoke(clusterer, "removeMarker", vec![old.to_arg()])?;
        sdk.invoke(clusterer, "addMarker", vec![new.to_arg()])?;
        Ok(())
    }

    fn set_heatmap(
        sdk: &dyn VendorSdk,
        map: NativeId,
        existing: Option<&NativeRef>,
        heatmap: &Heatmap,
    ) -> SdkResult<NativeRef> {
        let data: Vec<Value> = heatmap
            .points
            .iter()
            .map(|p| json!({ "lng": p.lng, "lat": p.lat, "count": p.weight }))
            .collect();
        let data_set = json!({ "data": data, "max": heatmap.effective_max() });

        let layer = match existing {
            Some(native) => object(native)?,
            None => {
                let gradient: Map<String, Value> = heatmap
                    .gradient
                    .iter()
                    .map(|stop| (stop.offset.to_string(), json!(stop.color)))
                    .collect();
                let opacity = heatmap.opacity.map(|opacity| json!([0.0, opacity]));
                sdk.construct(
                    "AMap.Heatmap",
                    vec![
                        object_arg(map),
                        json!({
                            "radius": heatmap.radius,
                            "opacity": opacity,
                            "gradient": gradient,
                        }),
                    ],
                )?
            }
        };
        sdk.invoke(layer, "setDataSet", vec![data_set])?;
        Ok(NativeRef::Object(layer))
    }

    fn remove_heatmap(sdk: &dyn VendorSdk, _map: NativeId, native: &NativeRef) -> SdkResult<()> {
        sdk.invoke(object(native)?, "setMap", vec![Value::Null])
            .map(|_| ())
    }

    fn set_drawing_tools(
        sdk: &dyn VendorSdk,
        map: NativeId,
        existing: Option<&NativeRef>,
        config: Option<&DrawingToolConfig>,
    ) -> SdkResult<Option<NativeRef>> {
        if let Some(native) = existing {
            sdk.invoke(object(native)?, "close", vec![json!(true)])?;
        }
        let Some(config) = config else {
            return Ok(None);
        };

        let tool = sdk.construct("AMap.MouseTool", vec![object_arg(map)])?;
        // The mouse tool draws one shape kind at a time
        if let Some(first) = config.tools.first() {
            let style = json!({
                "strokeColor": config.style.stroke_color,
                "fillColor": config.style.fill_color,
                "strokeWeight": config.style.stroke_weight,
                "fillOpacity": config.style.fill_opacity,
            });
            sdk.invoke(tool, draw_method(*first), vec![style])?;
        }
        Ok(Some(NativeRef::Object(tool)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shapes_carry_geometry_in_options() {
        let overlay = Overlay::circle("c", LatLng::new(39.9, 116.4), 250.0);
        let (class, options) = shape_with_geometry(&overlay);
        assert_eq!(class, "AMap.Circle");
        assert_eq!(options["center"], json!([116.4, 39.9]));
        assert_eq!(options["radius"], json!(250.0));
    }

    #[test]
    fn test_script_requests_plugins() {
        let request = Amap::script(Some("k"));
        assert!(request.url.contains("plugin=AMap.MarkerClusterer"));
        assert!(request.url.contains("key=k"));
        assert_eq!(Amap::native_event(CanonicalEventKind::Load), "complete");
    }
}
