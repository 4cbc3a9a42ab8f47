//! Baidu Maps JavaScript API v3 binding (`BMap.*`, plugins under `BMapLib.*`)
//!
//! Baidu works in BD-09 and takes `BMap.Point(lng, lat)` objects; point
//! arguments here are `{lng, lat}` literals the bridge turns into points.
//! There is no rectangle class, so rectangles are four-corner polygons.

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
    plugins::{draw::DrawingToolConfig, heatmap::Heatmap},
    provider::{
        adapter::{Dialect, SdkAdapter, UpdateOutcome},
        sdk::{object_arg, NativeId, NativeRef, ScriptRequest, SdkFault, SdkResult, VendorSdk},
        Capabilities, InitOptions, ProviderKind,
    },
};
use serde_json::{json, Map, Value};

pub struct Baidu;

pub type BaiduAdapter = SdkAdapter<Baidu>;

const SCRIPT_URL: &str = "https://api.map.baidu.com/api";

fn point(p: LatLng) -> Value {
    json!({ "lng": p.lng, "lat": p.lat })
}

fn path(points: &[LatLng]) -> Value {
    Value::Array(points.iter().copied().map(point).collect())
}

fn corners(b: &LatLngBounds) -> Vec<LatLng> {
    vec![
        LatLng::new(b.south(), b.west()),
        LatLng::new(b.south(), b.east()),
        LatLng::new(b.north(), b.east()),
        LatLng::new(b.north(), b.west()),
    ]
}

fn object(native: &NativeRef) -> SdkResult<NativeId> {
    native
        .object_id()
        .ok_or_else(|| SdkFault::Unsupported("named resources".to_string()))
}

fn shape_options(style: &OverlayStyle) -> Value {
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
    Value::Object(options)
}

/// Applies each shape style property through its own setter
fn apply_shape_style(sdk: &dyn VendorSdk, id: NativeId, style: &OverlayStyle) -> SdkResult<()> {
    let Value::Object(options) = shape_options(style) else {
        return Ok(());
    };
    for (key, value) in options {
        let setter = format!("set{}{}", key[..1].to_uppercase(), &key[1..]);
        sdk.invoke(id, &setter, vec![value])?;
    }
    Ok(())
}

fn set_visible(sdk: &dyn VendorSdk, id: NativeId, visible: bool) -> SdkResult<()> {
    let method = if visible { "show" } else { "hide" };
    sdk.invoke(id, method, vec![]).map(|_| ())
}

fn bind_info(sdk: &dyn VendorSdk, id: NativeId, popup: Option<&str>) -> SdkResult<()> {
    match popup {
        Some(content) => {
            let window = sdk.construct("BMap.InfoWindow", vec![json!(content)])?;
            sdk.invoke(id, "setInfoWindow", vec![object_arg(window)])?;
        }
        None => {
            sdk.invoke(id, "closeInfoWindow", vec![])?;
        }
    }
    Ok(())
}

fn marker_icon(sdk: &dyn VendorSdk, url: &str) -> SdkResult<NativeId> {
    sdk.construct("BMap.Icon", vec![json!(url), json!({ "width": 25, "height": 41 })])
}

impl Dialect for Baidu {
    const KIND: ProviderKind = ProviderKind::Baidu;
    const POSITION_KEY: &'static str = "point";
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
            url: format!("{}?v=3.0&ak={}", SCRIPT_URL, api_key.unwrap_or_default()),
            global: "BMap",
        }
    }

    fn create_map(
        sdk: &dyn VendorSdk,
        container: &MapContainer,
        center: LatLng,
        options: &InitOptions,
    ) -> SdkResult<NativeId> {
        let map = sdk.construct(
            "BMap.Map",
            vec![
                json!(container.element_id),
                json!({ "minZoom": options.min_zoom, "maxZoom": options.max_zoom }),
            ],
        )?;
        sdk.invoke(map, "centerAndZoom", vec![point(center), json!(options.zoom)])?;
        sdk.invoke(map, "enableScrollWheelZoom", vec![json!(true)])?;
        Ok(map)
    }

    fn destroy_map(sdk: &dyn VendorSdk, map: NativeId) {
        if let Err(fault) = sdk.invoke(map, "clearOverlays", vec![]) {
            log::debug!("baidu map.clearOverlays failed: {}", fault);
        }
        sdk.release(map);
    }

    fn set_view(sdk: &dyn VendorSdk, map: NativeId, center: LatLng, zoom: f64) -> SdkResult<()> {
        sdk.invoke(map, "centerAndZoom", vec![point(center), json!(zoom)])
            .map(|_| ())
    }

    fn fit_bounds(
        sdk: &dyn VendorSdk,
        map: NativeId,
        b: &LatLngBounds,
        padding: f64,
    ) -> SdkResult<()> {
        let margin = json!([padding, padding, padding, padding]);
        sdk.invoke(
            map,
            "setViewport",
            vec![path(&corners(b)), json!({ "margins": margin })],
        )
        .map(|_| ())
    }

    fn add_overlay(sdk: &dyn VendorSdk, map: NativeId, overlay: &Overlay) -> SdkResult<NativeRef> {
        let style = &overlay.style;
        let id = match &overlay.geometry {
            Geometry::Marker { position } => {
                let mut options = Map::new();
                if let Some(icon) = &style.icon {
                    options.insert("icon".into(), object_arg(marker_icon(sdk, icon)?));
                }
                options.insert("enableDragging".into(), json!(style.draggable));
                if let Some(title) = &style.title {
                    options.insert("title".into(), json!(title));
                }
                let marker = sdk.construct("BMap.Marker", vec![point(*position), Value::Object(options)])?;
                if let Some(z_index) = style.z_index {
                    sdk.invoke(marker, "setZIndex", vec![json!(z_index)])?;
                }
                marker
            }
            Geometry::Polygon { path: points } => {
                sdk.construct("BMap.Polygon", vec![path(points), shape_options(style)])?
            }
            Geometry::Polyline { path: points } => {
                sdk.construct("BMap.Polyline", vec![path(points), shape_options(style)])?
            }
            Geometry::Circle { center, radius } => sdk.construct(
                "BMap.Circle",
                vec![point(*center), json!(radius), shape_options(style)],
            )?,
            Geometry::Rectangle { bounds } => {
                sdk.construct("BMap.Polygon", vec![path(&corners(bounds)), shape_options(style)])?
            }
        };

        if let Some(popup) = &style.popup {
            bind_info(sdk, id, Some(popup))?;
        }
        sdk.invoke(map, "addOverlay", vec![object_arg(id)])?;
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

        if previous.geometry != next.geometry {
            match &next.geometry {
                Geometry::Marker { position } => {
                    sdk.invoke(id, "setPosition", vec![point(*position)])?;
                }
                Geometry::Polygon { path: points } | Geometry::Polyline { path: points } => {
                    sdk.invoke(id, "setPath", vec![path(points)])?;
                }
                Geometry::Circle { center, radius } => {
                    sdk.invoke(id, "setCenter", vec![point(*center)])?;
                    sdk.invoke(id, "setRadius", vec![json!(radius)])?;
                }
                Geometry::Rectangle { bounds } => {
                    sdk.invoke(id, "setPath", vec![path(&corners(bounds))])?;
                }
            }
        }

        if old != new {
            match &next.geometry {
                Geometry::Marker { .. } => {
                    if old.icon != new.icon {
                        if let Some(icon) = &new.icon {
                            let icon = marker_icon(sdk, icon)?;
                            sdk.invoke(id, "setIcon", vec![object_arg(icon)])?;
                        }
                    }
                    if old.title != new.title {
                        sdk.invoke(id, "setTitle", vec![json!(new.title)])?;
                    }
                    if old.draggable != new.draggable {
                        let method = if new.draggable { "enableDragging" } else { "disableDragging" };
                        sdk.invoke(id, method, vec![])?;
                    }
                    if old.z_index != new.z_index {
                        sdk.invoke(id, "setZIndex", vec![json!(new.z_index.unwrap_or(0))])?;
                    }
                }
                _ => apply_shape_style(sdk, id, new)?,
            }
            if old.popup != new.popup {
                bind_info(sdk, id, new.popup.as_deref())?;
            }
        }

        if previous.visible != next.visible {
            set_visible(sdk, id, next.visible)?;
        }
        Ok(UpdateOutcome::InPlace)
    }

    fn remove_overlay(sdk: &dyn VendorSdk, map: NativeId, native: &NativeRef) -> SdkResult<()> {
        sdk.invoke(map, "removeOverlay", vec![native.to_arg()])
            .map(|_| ())
    }

    fn set_layer(
        sdk: &dyn VendorSdk,
        map: NativeId,
        existing: Option<&NativeRef>,
        layer: &Layer,
    ) -> SdkResult<NativeRef> {
        if let Some(native) = existing {
            Self::remove_layer(sdk, map, native)?;
        }

        match &layer.source {
            LayerSource::UrlTemplate(url) => {
                let tiles = sdk.construct(
                    "BMap.TileLayer",
                    vec![json!({
                        "tileUrlTemplate": url,
                        "zIndex": layer.z_index,
                        "transparentPng": layer.opacity.map_or(false, |opacity| opacity < 1.0),
                    })],
                )?;
                if layer.visible {
                    sdk.invoke(map, "addTileLayer", vec![object_arg(tiles)])?;
                }
                Ok(NativeRef::Object(tiles))
            }
            LayerSource::Style(style) => {
                if layer.visible {
                    sdk.invoke(map, "setMapStyleV2", vec![json!({ "styleJson": style })])?;
                }
                Ok(NativeRef::Named(layer.id.clone()))
            }
        }
    }

    fn remove_layer(sdk: &dyn VendorSdk, map: NativeId, native: &NativeRef) -> SdkResult<()> {
        match native {
            NativeRef::Object(_) => sdk
                .invoke(map, "removeTileLayer", vec![native.to_arg()])
                .map(|_| ()),
            NativeRef::Named(_) => sdk
                .invoke(map, "setMapStyleV2", vec![json!({ "styleJson": [] })])
                .map(|_| ()),
        }
    }

    fn native_event(kind: CanonicalEventKind) -> &'static str {
        match kind {
            CanonicalEventKind::Click | CanonicalEventKind::MarkerClick => "click",
            CanonicalEventKind::DoubleClick => "dblclick",
            CanonicalEventKind::Move => "moveend",
            CanonicalEventKind::Zoom => "zoomend",
            CanonicalEventKind::Load => "tilesloaded",
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
        options.insert(
            "markers".into(),
            members.iter().map(NativeRef::to_arg).collect(),
        );
        let clusterer = sdk.construct(
            "BMapLib.MarkerClusterer",
            vec![object_arg(map), Value::Object(options)],
        )?;
        Ok(NativeRef::Object(clusterer))
    }

    fn dispose_cluster(
        sdk: &dyn VendorSdk,
        map: NativeId,
        cluster: &NativeRef,
        members: &[NativeRef],
    ) -> SdkResult<()> {
        sdk.invoke(object(cluster)?, "clearMarkers", vec![])?;
        for member in members {
            sdk.invoke(map, "addOverlay", vec![member.to_arg()])?;
        }
        Ok(())
    }

    fn swap_cluster_member(
        sdk: &dyn VendorSdk,
        map: NativeId,
        cluster: &NativeRef,
        old: &NativeRef,
        new: &NativeRef,
    ) -> SdkResult<()> {
        let clusterer = object(cluster)?;
        sdk.invoke(clusterer, "removeMarker", vec![old.to_arg()])?;
        // The clusterer owns placement of its members
        sdk.invoke(map, "removeOverlay", vec![new.to_arg()])?;
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

        let overlay = match existing {
            Some(native) => object(native)?,
            None => {
                let gradient: Map<String, Value> = heatmap
                    .gradient
                    .iter()
                    .map(|stop| (stop.offset.to_string(), json!(stop.color)))
                    .collect();
                let overlay = sdk.construct(
                    "BMapLib.HeatmapOverlay",
                    vec![json!({
                        "radius": heatmap.radius,
                        "opacity": heatmap.opacity,
                        "gradient": gradient,
                    })],
                )?;
                sdk.invoke(map, "addOverlay", vec![object_arg(overlay)])?;
                overlay
            }
        };
        sdk.invoke(overlay, "setDataSet", vec![data_set])?;
        Ok(NativeRef::Object(overlay))
    }

    fn remove_heatmap(sdk: &dyn VendorSdk, map: NativeId, native: &NativeRef) -> SdkResult<()> {
        sdk.invoke(map, "removeOverlay", vec![native.to_arg()])
            .map(|_| ())
    }

    fn set_drawing_tools(
        sdk: &dyn VendorSdk,
        map: NativeId,
        existing: Option<&NativeRef>,
        config: Option<&DrawingToolConfig>,
    ) -> SdkResult<Option<NativeRef>> {
        if let Some(native) = existing {
            sdk.invoke(object(native)?, "close", vec![])?;
        }
        let Some(config) = config else {
            return Ok(None);
        };

        let modes: Vec<String> = config
            .tools
            .iter()
            .map(|tool| format!("BMAP_DRAWING_{}", tool.as_str().to_uppercase()))
            .collect();
        let style = json!({
            "strokeColor": config.style.stroke_color,
            "fillColor": config.style.fill_color,
            "strokeWeight": config.style.stroke_weight,
            "fillOpacity": config.style.fill_opacity,
        });
        let manager = sdk.construct(
            "BMapLib.DrawingManager",
            vec![
                object_arg(map),
                json!({
                    "isOpen": false,
                    "enableDrawingTool": true,
                    "drawingToolOptions": {
                        "anchor": config.position.as_deref().unwrap_or("BMAP_ANCHOR_TOP_RIGHT"),
                        "drawingModes": modes,
                    },
                    "polygonOptions": style,
                    "polylineOptions": style,
                    "rectangleOptions": style,
                    "circleOptions": style,
                }),
            ],
        )?;
        Ok(Some(NativeRef::Object(manager)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangle_corners_wind_around_bounds() {
        let b = LatLngBounds::from_coords(39.0, 116.0, 40.0, 117.0);
        let ring = corners(&b);
        assert_eq!(ring.len(), 4);
        assert_eq!(ring[0], LatLng::new(39.0, 116.0));
        assert_eq!(ring[2], LatLng::new(40.0, 117.0));
    }

    #[test]
    fn test_translate_reads_point_key() {
        let event = Baidu::translate(
            CanonicalEventKind::Click,
            &json!({"point": {"lng": 116.404, "lat": 39.915}, "pixel": {"x": 5, "y": 6}}),
        );
        assert_eq!(event.position(), Some(LatLng::new(39.915, 116.404)));
        assert_eq!(Baidu::native_event(CanonicalEventKind::Load), "tilesloaded");
    }
}
