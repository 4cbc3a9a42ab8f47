//! Google Maps JavaScript API binding (`google.maps.*`)
//!
//! Every overlay class accepts a full options object through `setOptions`,
//! so updates are always applied in place. Treated as WGS-84; the GCJ-02
//! shift Google applies to mainland China tiles is not compensated.

use crate::{
    core::{
        config::MapContainer,
        geo::{LatLng, LatLngBounds},
    },
    events::canonical::CanonicalEventKind,
    layers::{
        layer::{Layer, LayerSource},
        overlay::{Geometry, Overlay},
    },
    plugins::{draw::DrawingToolConfig, heatmap::Heatmap},
    provider::{
        adapter::{Dialect, SdkAdapter, UpdateOutcome},
        sdk::{object_arg, NativeId, NativeRef, ScriptRequest, SdkFault, SdkResult, VendorSdk},
        Capabilities, InitOptions, ProviderKind,
    },
};
use serde_json::{json, Map, Value};

pub struct Google;

pub type GoogleAdapter = SdkAdapter<Google>;

const SCRIPT_URL: &str = "https://maps.googleapis.com/maps/api/js";

fn point(p: LatLng) -> Value {
    json!({ "lat": p.lat, "lng": p.lng })
}

fn bounds(b: &LatLngBounds) -> Value {
    json!({ "south": b.south(), "west": b.west(), "north": b.north(), "east": b.east() })
}

fn object(native: &NativeRef) -> SdkResult<NativeId> {
    native
        .object_id()
        .ok_or_else(|| SdkFault::Unsupported("named resources".to_string()))
}

fn class_of(geometry: &Geometry) -> &'static str {
    match geometry {
        Geometry::Marker { .. } => "google.maps.Marker",
        Geometry::Polygon { .. } => "google.maps.Polygon",
        Geometry::Polyline { .. } => "google.maps.Polyline",
        Geometry::Circle { .. } => "google.maps.Circle",
        Geometry::Rectangle { .. } => "google.maps.Rectangle",
    }
}

/// Complete options object for an overlay, including which map it is on
fn overlay_options(map: NativeId, overlay: &Overlay) -> Value {
    let style = &overlay.style;
    let mut options = Map::new();

    match &overlay.geometry {
        Geometry::Marker { position } => {
            options.insert("position".into(), point(*position));
            options.insert("title".into(), json!(style.title));
            options.insert("icon".into(), json!(style.icon));
            options.insert("draggable".into(), json!(style.draggable));
        }
        Geometry::Polygon { path } => {
            options.insert("paths".into(), path.iter().copied().map(point).collect());
        }
        Geometry::Polyline { path } => {
            options.insert("path".into(), path.iter().copied().map(point).collect());
        }
        Geometry::Circle { center, radius } => {
            options.insert("center".into(), point(*center));
            options.insert("radius".into(), json!(radius));
        }
        Geometry::Rectangle { bounds: b } => {
            options.insert("bounds".into(), bounds(b));
        }
    }

    if !matches!(overlay.geometry, Geometry::Marker { .. }) {
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
    }
    if let Some(z_index) = style.z_index {
        options.insert("zIndex".into(), json!(z_index));
    }
    options.insert("map".into(), on_map(map, overlay.visible));
    Value::Object(options)
}

fn on_map(map: NativeId, visible: bool) -> Value {
    if visible {
        object_arg(map)
    } else {
        Value::Null
    }
}

impl Dialect for Google {
    const KIND: ProviderKind = ProviderKind::Google;
    const POSITION_KEY: &'static str = "latLng";
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
                "{}?key={}&libraries=visualization,drawing",
                SCRIPT_URL,
                api_key.unwrap_or_default()
            ),
            global: "google.maps",
        }
    }

    fn create_map(
        sdk: &dyn VendorSdk,
        container: &MapContainer,
        center: LatLng,
        options: &InitOptions,
    ) -> SdkResult<NativeId> {
        sdk.construct(
            "google.maps.Map",
            vec![
                json!(container.element_id),
                json!({
                    "center": point(center),
                    "zoom": options.zoom,
                    "minZoom": options.min_zoom,
                    "maxZoom": options.max_zoom,
                }),
            ],
        )
    }

    fn destroy_map(sdk: &dyn VendorSdk, map: NativeId) {
        if let Err(fault) = sdk.invoke(map, "unbindAll", vec![]) {
            log::debug!("google map.unbindAll failed: {}", fault);
        }
        sdk.release(map);
    }

    fn set_view(sdk: &dyn VendorSdk, map: NativeId, center: LatLng, zoom: f64) -> SdkResult<()> {
        sdk.invoke(
            map,
            "setOptions",
            vec![json!({ "center": point(center), "zoom": zoom })],
        )
        .map(|_| ())
    }

    fn fit_bounds(
        sdk: &dyn VendorSdk,
        map: NativeId,
        b: &LatLngBounds,
        padding: f64,
    ) -> SdkResult<()> {
        sdk.invoke(map, "fitBounds", vec![bounds(b), json!(padding)])
            .map(|_| ())
    }

    fn add_overlay(sdk: &dyn VendorSdk, map: NativeId, overlay: &Overlay) -> SdkResult<NativeRef> {
        let id = sdk.construct(class_of(&overlay.geometry), vec![overlay_options(map, overlay)])?;
        Ok(NativeRef::Object(id))
    }

    fn update_overlay(
        sdk: &dyn VendorSdk,
        map: NativeId,
        native: &NativeRef,
        _previous: &Overlay,
        next: &Overlay,
    ) -> SdkResult<UpdateOutcome> {
        sdk.invoke(object(native)?, "setOptions", vec![overlay_options(map, next)])?;
        Ok(UpdateOutcome::InPlace)
    }

    fn remove_overlay(sdk: &dyn VendorSdk, _map: NativeId, native: &NativeRef) -> SdkResult<()> {
        sdk.invoke(object(native)?, "setMap", vec![Value::Null])
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
                    "google.maps.ImageMapType",
                    vec![json!({
                        "name": layer.id,
                        "tileUrlTemplate": url,
                        "tileSize": 256,
                        "opacity": layer.opacity.unwrap_or(1.0),
                    })],
                )?;
                if layer.visible {
                    if let Err(fault) = sdk.invoke(map, "overlayMapTypes.push", vec![object_arg(tiles)]) {
                        sdk.release(tiles);
                        return Err(fault);
                    }
                }
                Ok(NativeRef::Object(tiles))
            }
            LayerSource::Style(styles) => {
                let applied = if layer.visible { styles.clone() } else { Value::Null };
                sdk.invoke(map, "setOptions", vec![json!({ "styles": applied })])?;
                Ok(NativeRef::Named(layer.id.clone()))
            }
        }
    }

    fn remove_layer(sdk: &dyn VendorSdk, map: NativeId, native: &NativeRef) -> SdkResult<()> {
        match native {
            NativeRef::Object(tiles) => sdk
                .invoke(map, "overlayMapTypes.remove", vec![object_arg(*tiles)])
                .map(|_| ()),
            NativeRef::Named(_) => sdk
                .invoke(map, "setOptions", vec![json!({ "styles": Value::Null })])
                .map(|_| ()),
        }
    }

    fn native_event(kind: CanonicalEventKind) -> &'static str {
        match kind {
            CanonicalEventKind::Click | CanonicalEventKind::MarkerClick => "click",
            CanonicalEventKind::DoubleClick => "dblclick",
            CanonicalEventKind::Move => "idle",
            CanonicalEventKind::Zoom => "zoom_changed",
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
        options.insert("map".into(), object_arg(map));
        options.insert(
            "markers".into(),
            members.iter().map(NativeRef::to_arg).collect(),
        );
        let clusterer = sdk.construct("markerClusterer.MarkerClusterer", vec![Value::Object(options)])?;
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
        for member in members {
            sdk.invoke(object(member)?, "setMap", vec![object_arg(map)])?;
        }
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
            .map(|p| json!({ "location": point(p.position()), "weight": p.weight }))
            .collect();
        let gradient = if heatmap.gradient.is_empty() {
            Value::Null
        } else {
            heatmap.gradient.iter().map(|stop| json!(stop.color)).collect()
        };
        let options = json!({
            "data": data,
            "radius": heatmap.radius,
            "opacity": heatmap.opacity,
            "maxIntensity": heatmap.max_intensity,
            "gradient": gradient,
            "map": object_arg(map),
        });

        match existing {
            Some(native) => {
                sdk.invoke(object(native)?, "setOptions", vec![options])?;
                Ok(native.clone())
            }
            None => {
                let layer = sdk.construct("google.maps.visualization.HeatmapLayer", vec![options])?;
                Ok(NativeRef::Object(layer))
            }
        }
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
            sdk.invoke(object(native)?, "setMap", vec![Value::Null])?;
        }
        let Some(config) = config else {
            return Ok(None);
        };

        let modes: Vec<&str> = config.tools.iter().map(|tool| tool.as_str()).collect();
        let shape_options = json!({
            "strokeColor": config.style.stroke_color,
            "strokeWeight": config.style.stroke_weight,
            "fillColor": config.style.fill_color,
            "fillOpacity": config.style.fill_opacity,
        });
        let manager = sdk.construct(
            "google.maps.drawing.DrawingManager",
            vec![json!({
                "drawingControl": true,
                "drawingControlOptions": {
                    "position": config.position.as_deref().unwrap_or("TOP_CENTER"),
                    "drawingModes": modes,
                },
                "polygonOptions": shape_options,
                "polylineOptions": shape_options,
                "rectangleOptions": shape_options,
                "circleOptions": shape_options,
                "map": object_arg(map),
            })],
        )?;
        Ok(Some(NativeRef::Object(manager)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_overlays_are_detached() {
        let overlay = Overlay::marker("m", LatLng::new(1.0, 2.0)).with_visible(false);
        let options = overlay_options(7, &overlay);
        assert_eq!(options["map"], Value::Null);
        assert_eq!(options["position"], json!({"lat": 1.0, "lng": 2.0}));

        let shown = overlay_options(7, &overlay.with_visible(true));
        assert_eq!(shown["map"], object_arg(7));
    }

    #[test]
    fn test_script_carries_key() {
        let request = Google::script(Some("abc"));
        assert!(request.url.contains("key=abc"));
        assert_eq!(request.global, "google.maps");
    }
}
