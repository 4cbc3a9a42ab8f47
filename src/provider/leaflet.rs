//! Leaflet binding (`L.*`) with the markercluster, heat and draw plugins
//!
//! Leaflet takes WGS-84 `[lat, lng]` pairs everywhere.

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
    plugins::{draw::DrawTool, draw::DrawingToolConfig, heatmap::Heatmap},
    provider::{
        adapter::{Dialect, SdkAdapter, UpdateOutcome},
        sdk::{object_arg, NativeId, NativeRef, ScriptRequest, SdkFault, SdkResult, VendorSdk},
        Capabilities, InitOptions, ProviderKind,
    },
};
use serde_json::{json, Map, Value};

pub struct Leaflet;

pub type LeafletAdapter = SdkAdapter<Leaflet>;

const SCRIPT_URL: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js";

fn point(p: LatLng) -> Value {
    json!([p.lat, p.lng])
}

fn path(points: &[LatLng]) -> Value {
    Value::Array(points.iter().copied().map(point).collect())
}

fn bounds(b: &LatLngBounds) -> Value {
    json!([[b.south(), b.west()], [b.north(), b.east()]])
}

fn object(native: &NativeRef) -> SdkResult<NativeId> {
    native
        .object_id()
        .ok_or_else(|| SdkFault::Unsupported("named resources".to_string()))
}

fn path_options(style: &OverlayStyle) -> Value {
    let mut options = Map::new();
    if let Some(color) = &style.stroke_color {
        options.insert("color".into(), json!(color));
    }
    if let Some(weight) = style.stroke_weight {
        options.insert("weight".into(), json!(weight));
    }
    if let Some(opacity) = style.stroke_opacity {
        options.insert("opacity".into(), json!(opacity));
    }
    if let Some(color) = &style.fill_color {
        options.insert("fillColor".into(), json!(color));
    }
    if let Some(opacity) = style.fill_opacity {
        options.insert("fillOpacity".into(), json!(opacity));
    }
    Value::Object(options)
}

fn marker_options(sdk: &dyn VendorSdk, style: &OverlayStyle) -> SdkResult<Value> {
    let mut options = Map::new();
    if let Some(title) = &style.title {
        options.insert("title".into(), json!(title));
    }
    if let Some(icon) = &style.icon {
        options.insert("icon".into(), object_arg(create_icon(sdk, icon)?));
    }
    options.insert("draggable".into(), json!(style.draggable));
    if let Some(z_index) = style.z_index {
        options.insert("zIndexOffset".into(), json!(z_index));
    }
    Ok(Value::Object(options))
}

fn create_icon(sdk: &dyn VendorSdk, url: &str) -> SdkResult<NativeId> {
    sdk.construct("L.icon", vec![json!({ "iconUrl": url })])
}

fn show(sdk: &dyn VendorSdk, map: NativeId, target: NativeId, visible: bool) -> SdkResult<()> {
    let method = if visible { "addLayer" } else { "removeLayer" };
    sdk.invoke(map, method, vec![object_arg(target)]).map(|_| ())
}

impl Dialect for Leaflet {
    const KIND: ProviderKind = ProviderKind::Leaflet;
    const POSITION_KEY: &'static str = "latlng";
    const PIXEL_KEY: &'static str = "containerPoint";

    fn capabilities() -> Capabilities {
        Capabilities {
            vector_styles: false,
            ..Capabilities::all()
        }
    }

    fn requires_api_key() -> bool {
        false
    }

    fn script(_api_key: Option<&str>) -> ScriptRequest {
        ScriptRequest {
            provider: Self::KIND,
            url: SCRIPT_URL.to_string(),
            global: "L",
        }
    }

    fn create_map(
        sdk: &dyn VendorSdk,
        container: &MapContainer,
        center: LatLng,
        options: &InitOptions,
    ) -> SdkResult<NativeId> {
        sdk.construct(
            "L.map",
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
        if let Err(fault) = sdk.invoke(map, "remove", vec![]) {
            log::debug!("leaflet map.remove failed: {}", fault);
        }
        sdk.release(map);
    }

    fn set_view(sdk: &dyn VendorSdk, map: NativeId, center: LatLng, zoom: f64) -> SdkResult<()> {
        sdk.invoke(map, "setView", vec![point(center), json!(zoom)])
            .map(|_| ())
    }

    fn fit_bounds(
        sdk: &dyn VendorSdk,
        map: NativeId,
        b: &LatLngBounds,
        padding: f64,
    ) -> SdkResult<()> {
        sdk.invoke(
            map,
            "fitBounds",
            vec![bounds(b), json!({ "padding": [padding, padding] })],
        )
        .map(|_| ())
    }

    fn add_overlay(sdk: &dyn VendorSdk, map: NativeId, overlay: &Overlay) -> SdkResult<NativeRef> {
        let style = &overlay.style;
        let id = match &overlay.geometry {
            Geometry::Marker { position } => sdk.construct(
                "L.marker",
                vec![point(*position), marker_options(sdk, style)?],
            )?,
            Geometry::Polygon { path: points } => {
                sdk.construct("L.polygon", vec![path(points), path_options(style)])?
            }
            Geometry::Polyline { path: points } => {
                sdk.construct("L.polyline", vec![path(points), path_options(style)])?
            }
            Geometry::Circle { center, radius } => {
                let mut options = path_options(style);
                options["radius"] = json!(radius);
                sdk.construct("L.circle", vec![point(*center), options])?
            }
            Geometry::Rectangle { bounds: b } => {
                sdk.construct("L.rectangle", vec![bounds(b), path_options(style)])?
            }
        };

        if let Some(popup) = &style.popup {
            sdk.invoke(id, "bindPopup", vec![json!(popup)])?;
        }
        if overlay.visible {
            show(sdk, map, id, true)?;
        }
        Ok(NativeRef::Object(id))
    }

    fn update_overlay(
        sdk: &dyn VendorSdk,
        map: NativeId,
        native: &NativeRef,
        previous: &Overlay,
        next: &Overlay,
    ) -> SdkResult<UpdateOutcome> {
        let id = object(native)?;
        let (old, new) = (&previous.style, &next.style);

        // Leaflet fixes a marker's title and draggability at construction
        if matches!(next.geometry, Geometry::Marker { .. })
            && (old.title != new.title || old.draggable != new.draggable)
        {
            return Ok(UpdateOutcome::Replace);
        }

        if previous.geometry != next.geometry {
            match &next.geometry {
                Geometry::Marker { position } => {
                    sdk.invoke(id, "setLatLng", vec![point(*position)])?;
                }
                Geometry::Polygon { path: points } | Geometry::Polyline { path: points } => {
                    sdk.invoke(id, "setLatLngs", vec![path(points)])?;
                }
                Geometry::Circle { center, radius } => {
                    sdk.invoke(id, "setLatLng", vec![point(*center)])?;
                    sdk.invoke(id, "setRadius", vec![json!(radius)])?;
                }
                Geometry::Rectangle { bounds: b } => {
                    sdk.invoke(id, "setBounds", vec![bounds(b)])?;
                }
            }
        }

        if old != new {
            match &next.geometry {
                Geometry::Marker { .. } => {
                    if old.icon != new.icon {
                        if let Some(icon) = &new.icon {
                            let icon = create_icon(sdk, icon)?;
                            sdk.invoke(id, "setIcon", vec![object_arg(icon)])?;
                        }
                    }
                    if old.z_index != new.z_index {
                        sdk.invoke(id, "setZIndexOffset", vec![json!(new.z_index.unwrap_or(0))])?;
                    }
                }
                _ => {
                    sdk.invoke(id, "setStyle", vec![path_options(new)])?;
                }
            }
            if old.popup != new.popup {
                match &new.popup {
                    Some(popup) => sdk.invoke(id, "bindPopup", vec![json!(popup)])?,
                    None => sdk.invoke(id, "unbindPopup", vec![])?,
                };
            }
        }

        if previous.visible != next.visible {
            show(sdk, map, id, next.visible)?;
        }
        Ok(UpdateOutcome::InPlace)
    }

    fn remove_overlay(sdk: &dyn VendorSdk, map: NativeId, native: &NativeRef) -> SdkResult<()> {
        show(sdk, map, object(native)?, false)
    }

    fn set_layer(
        sdk: &dyn VendorSdk,
        map: NativeId,
        existing: Option<&NativeRef>,
        layer: &Layer,
    ) -> SdkResult<NativeRef> {
        let LayerSource::UrlTemplate(url) = &layer.source else {
            return Err(SdkFault::Unsupported("style layers".to_string()));
        };

        let id = match existing {
            Some(native) => {
                let id = object(native)?;
                sdk.invoke(id, "setUrl", vec![json!(url)])?;
                sdk.invoke(id, "setZIndex", vec![json!(layer.z_index)])?;
                sdk.invoke(id, "setOpacity", vec![json!(layer.opacity.unwrap_or(1.0))])?;
                id
            }
            None => sdk.construct(
                "L.tileLayer",
                vec![
                    json!(url),
                    json!({
                        "attribution": layer.attribution,
                        "opacity": layer.opacity.unwrap_or(1.0),
                        "zIndex": layer.z_index,
                    }),
                ],
            )?,
        };
        show(sdk, map, id, layer.visible)?;
        Ok(NativeRef::Object(id))
    }

    fn remove_layer(sdk: &dyn VendorSdk, map: NativeId, native: &NativeRef) -> SdkResult<()> {
        show(sdk, map, object(native)?, false)
    }

    fn native_event(kind: CanonicalEventKind) -> &'static str {
        match kind {
            CanonicalEventKind::Click | CanonicalEventKind::MarkerClick => "click",
            CanonicalEventKind::DoubleClick => "dblclick",
            CanonicalEventKind::Move => "moveend",
            CanonicalEventKind::Zoom => "zoomend",
            CanonicalEventKind::Load => "load",
            CanonicalEventKind::MarkerHover => "mouseover",
        }
    }

    fn supported_cluster_options() -> &'static [&'static str] {
        &["maxClusterRadius", "disableClusteringAtZoom"]
    }

    fn create_cluster(
        sdk: &dyn VendorSdk,
        map: NativeId,
        members: &[NativeRef],
        options: &Map<String, Value>,
    ) -> SdkResult<NativeRef> {
        let group = sdk.construct("L.markerClusterGroup", vec![Value::Object(options.clone())])?;
        let mut markers = Vec::with_capacity(members.len());
        for member in members {
            let id = object(member)?;
            show(sdk, map, id, false)?;
            markers.push(object_arg(id));
        }
        sdk.invoke(group, "addLayers", vec![Value::Array(markers)])?;
        show(sdk, map, group, true)?;
        Ok(NativeRef::Object(group))
    }

    fn dispose_cluster(
        sdk: &dyn VendorSdk,
        map: NativeId,
        cluster: &NativeRef,
        members: &[NativeRef],
    ) -> SdkResult<()> {
        let group = object(cluster)?;
        sdk.invoke(group, "clearLayers", vec![])?;
        show(sdk, map, group, false)?;
        for member in members {
            show(sdk, map, object(member)?, true)?;
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
        let group = object(cluster)?;
        let fresh = object(new)?;
        sdk.invoke(group, "removeLayer", vec![old.to_arg()])?;
        show(sdk, map, fresh, false)?;
        sdk.invoke(group, "addLayer", vec![object_arg(fresh)])?;
        Ok(())
    }

    fn set_heatmap(
        sdk: &dyn VendorSdk,
        map: NativeId,
        existing: Option<&NativeRef>,
        heatmap: &Heatmap,
    ) -> SdkResult<NativeRef> {
        let points: Vec<Value> = heatmap
            .points
            .iter()
            .map(|p| json!([p.lat, p.lng, p.weight]))
            .collect();
        let gradient: Map<String, Value> = heatmap
            .gradient
            .iter()
            .map(|stop| (stop.offset.to_string(), json!(stop.color)))
            .collect();
        let options = json!({
            "radius": heatmap.radius,
            "blur": heatmap.blur,
            "max": heatmap.effective_max(),
            "minOpacity": heatmap.opacity,
            "gradient": gradient,
        });

        match existing {
            Some(native) => {
                let id = object(native)?;
                sdk.invoke(id, "setLatLngs", vec![Value::Array(points)])?;
                sdk.invoke(id, "setOptions", vec![options])?;
                Ok(native.clone())
            }
            None => {
                let id = sdk.construct("L.heatLayer", vec![Value::Array(points), options])?;
                show(sdk, map, id, true)?;
                Ok(NativeRef::Object(id))
            }
        }
    }

    fn remove_heatmap(sdk: &dyn VendorSdk, map: NativeId, native: &NativeRef) -> SdkResult<()> {
        show(sdk, map, object(native)?, false)
    }

    fn set_drawing_tools(
        sdk: &dyn VendorSdk,
        map: NativeId,
        existing: Option<&NativeRef>,
        config: Option<&DrawingToolConfig>,
    ) -> SdkResult<Option<NativeRef>> {
        if let Some(native) = existing {
            sdk.invoke(map, "removeControl", vec![native.to_arg()])?;
        }
        let Some(config) = config else {
            return Ok(None);
        };

        let shape_options = json!({
            "color": config.style.stroke_color,
            "fillColor": config.style.fill_color,
            "weight": config.style.stroke_weight,
            "fillOpacity": config.style.fill_opacity,
        });
        let mut draw = Map::new();
        for tool in DrawTool::ALL {
            let enabled = if config.enables(tool) && tool != DrawTool::Marker {
                json!({ "shapeOptions": shape_options })
            } else {
                json!(config.enables(tool))
            };
            draw.insert(tool.as_str().to_string(), enabled);
        }

        let control = sdk.construct(
            "L.Control.Draw",
            vec![json!({
                "position": config.position.as_deref().unwrap_or("topleft"),
                "draw": draw,
            })],
        )?;
        sdk.invoke(map, "addControl", vec![object_arg(control)])?;
        Ok(Some(NativeRef::Object(control)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_translate_click() {
        let event = Leaflet::translate(
            CanonicalEventKind::Click,
            &json!({"latlng": {"lat": 51.5, "lng": -0.1}, "containerPoint": {"x": 10, "y": 20}}),
        );
        assert_eq!(event.position(), Some(LatLng::new(51.5, -0.1)));
        assert_eq!(event.pixel.map(|p| p.x), Some(10.0));
    }

    #[test]
    fn test_event_names() {
        assert_eq!(Leaflet::native_event(CanonicalEventKind::Move), "moveend");
        assert_eq!(Leaflet::native_event(CanonicalEventKind::MarkerHover), "mouseover");
    }
}
