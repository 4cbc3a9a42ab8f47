//! Mapbox GL binding (`mapboxgl.*`)
//!
//! Markers are DOM markers; every other shape is a GeoJSON source plus a
//! style layer addressed by name. Coordinates are `[lng, lat]`.

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
    plugins::heatmap::Heatmap,
    provider::{
        adapter::{Dialect, SdkAdapter, UpdateOutcome},
        sdk::{object_arg, NativeId, NativeRef, ScriptRequest, SdkFault, SdkResult, VendorSdk},
        Capabilities, InitOptions, ProviderKind,
    },
};
use serde_json::{json, Value};
use std::f64::consts::PI;

pub struct Mapbox;

pub type MapboxAdapter = SdkAdapter<Mapbox>;

const SCRIPT_URL: &str = "https://api.mapbox.com/mapbox-gl-js/v3.3.0/mapbox-gl.js";
const DEFAULT_STYLE: &str = "mapbox://styles/mapbox/streets-v12";

/// Vertices used to approximate a circle as a GeoJSON polygon
const CIRCLE_SEGMENTS: usize = 64;
const METERS_PER_DEGREE: f64 = 111_320.0;

fn point(p: LatLng) -> Value {
    json!([p.lng, p.lat])
}

fn ring(points: &[LatLng]) -> Vec<Value> {
    let mut ring: Vec<Value> = points.iter().copied().map(point).collect();
    if let (Some(first), Some(last)) = (points.first(), points.last()) {
        if first != last {
            ring.push(point(*first));
        }
    }
    ring
}

fn circle_ring(center: LatLng, radius: f64) -> Vec<LatLng> {
    let lat_radius = radius / METERS_PER_DEGREE;
    let lng_radius = radius / (METERS_PER_DEGREE * center.lat.to_radians().cos().max(1e-6));
    (0..CIRCLE_SEGMENTS)
        .map(|i| {
            let angle = 2.0 * PI * i as f64 / CIRCLE_SEGMENTS as f64;
            LatLng::new(
                center.lat + lat_radius * angle.sin(),
                center.lng + lng_radius * angle.cos(),
            )
        })
        .collect()
}

fn rectangle_ring(b: &LatLngBounds) -> Vec<LatLng> {
    vec![
        LatLng::new(b.south(), b.west()),
        LatLng::new(b.south(), b.east()),
        LatLng::new(b.north(), b.east()),
        LatLng::new(b.north(), b.west()),
    ]
}

/// GeoJSON feature for a shape overlay
fn feature(geometry: &Geometry) -> Value {
    let geometry = match geometry {
        Geometry::Polyline { path } => json!({
            "type": "LineString",
            "coordinates": path.iter().copied().map(point).collect::<Vec<_>>(),
        }),
        Geometry::Polygon { path } => json!({ "type": "Polygon", "coordinates": [ring(path)] }),
        Geometry::Circle { center, radius } => json!({
            "type": "Polygon",
            "coordinates": [ring(&circle_ring(*center, *radius))],
        }),
        Geometry::Rectangle { bounds } => json!({
            "type": "Polygon",
            "coordinates": [ring(&rectangle_ring(bounds))],
        }),
        Geometry::Marker { position } => json!({ "type": "Point", "coordinates": point(*position) }),
    };
    json!({ "type": "Feature", "properties": {}, "geometry": geometry })
}

fn resource_name(overlay: &Overlay) -> String {
    format!("unimap-{}-{}", overlay.kind(), overlay.id)
}

fn visibility(visible: bool) -> &'static str {
    if visible {
        "visible"
    } else {
        "none"
    }
}

fn layer_type(geometry: &Geometry) -> &'static str {
    match geometry {
        Geometry::Polyline { .. } => "line",
        _ => "fill",
    }
}

fn paint(geometry: &Geometry, style: &OverlayStyle) -> Value {
    match geometry {
        Geometry::Polyline { .. } => json!({
            "line-color": style.stroke_color.as_deref().unwrap_or("#3388ff"),
            "line-width": style.stroke_weight.unwrap_or(3.0),
            "line-opacity": style.stroke_opacity.unwrap_or(1.0),
        }),
        _ => json!({
            "fill-color": style.fill_color.as_deref().unwrap_or("#3388ff"),
            "fill-opacity": style.fill_opacity.unwrap_or(0.2),
            "fill-outline-color": style.stroke_color.as_deref().unwrap_or("#3388ff"),
        }),
    }
}

fn object(native: &NativeRef) -> SdkResult<NativeId> {
    native
        .object_id()
        .ok_or_else(|| SdkFault::Unsupported("expected a marker object".to_string()))
}

fn name(native: &NativeRef) -> SdkResult<&str> {
    match native {
        NativeRef::Named(name) => Ok(name),
        NativeRef::Object(id) => Err(SdkFault::Unsupported(format!(
            "object {} where a style layer was expected",
            id
        ))),
    }
}

fn remove_named(sdk: &dyn VendorSdk, map: NativeId, name: &str) -> SdkResult<()> {
    sdk.invoke(map, "removeLayer", vec![json!(name)])?;
    sdk.invoke(map, "removeSource", vec![json!(name)])?;
    Ok(())
}

impl Dialect for Mapbox {
    const KIND: ProviderKind = ProviderKind::Mapbox;
    const POSITION_KEY: &'static str = "lngLat";
    const PIXEL_KEY: &'static str = "point";

    fn capabilities() -> Capabilities {
        Capabilities {
            clustering: false,
            drawing: false,
            ..Capabilities::all()
        }
    }

    fn requires_api_key() -> bool {
        true
    }

    fn script(_api_key: Option<&str>) -> ScriptRequest {
        ScriptRequest {
            provider: Self::KIND,
            url: SCRIPT_URL.to_string(),
            global: "mapboxgl",
        }
    }

    fn create_map(
        sdk: &dyn VendorSdk,
        container: &MapContainer,
        center: LatLng,
        options: &InitOptions,
    ) -> SdkResult<NativeId> {
        sdk.construct(
            "mapboxgl.Map",
            vec![json!({
                "container": container.element_id,
                "accessToken": options.api_key,
                "style": DEFAULT_STYLE,
                "center": point(center),
                "zoom": options.zoom,
                "minZoom": options.min_zoom,
                "maxZoom": options.max_zoom,
            })],
        )
    }

    fn destroy_map(sdk: &dyn VendorSdk, map: NativeId) {
        if let Err(fault) = sdk.invoke(map, "remove", vec![]) {
            log::debug!("mapbox map.remove failed: {}", fault);
        }
        sdk.release(map);
    }

    fn set_view(sdk: &dyn VendorSdk, map: NativeId, center: LatLng, zoom: f64) -> SdkResult<()> {
        sdk.invoke(
            map,
            "jumpTo",
            vec![json!({ "center": point(center), "zoom": zoom })],
        )
        .map(|_| ())
    }

    fn fit_bounds(
        sdk: &dyn VendorSdk,
        map: NativeId,
        bounds: &LatLngBounds,
        padding: f64,
    ) -> SdkResult<()> {
        sdk.invoke(
            map,
            "fitBounds",
            vec![
                json!([[bounds.west(), bounds.south()], [bounds.east(), bounds.north()]]),
                json!({ "padding": padding }),
            ],
        )
        .map(|_| ())
    }

    fn add_overlay(sdk: &dyn VendorSdk, map: NativeId, overlay: &Overlay) -> SdkResult<NativeRef> {
        if let Geometry::Marker { position } = &overlay.geometry {
            let mut options = json!({ "draggable": overlay.style.draggable });
            if let Some(icon) = &overlay.style.icon {
                options["element"] = json!({ "img": icon, "title": overlay.style.title });
            }
            let marker = sdk.construct("mapboxgl.Marker", vec![options])?;
            sdk.invoke(marker, "setLngLat", vec![point(*position)])?;
            if overlay.visible {
                sdk.invoke(marker, "addTo", vec![object_arg(map)])?;
            }
            return Ok(NativeRef::Object(marker));
        }

        let name = resource_name(overlay);
        sdk.invoke(
            map,
            "addSource",
            vec![
                json!(name),
                json!({ "type": "geojson", "data": feature(&overlay.geometry) }),
            ],
        )?;
        sdk.invoke(
            map,
            "addLayer",
            vec![json!({
                "id": name,
                "type": layer_type(&overlay.geometry),
                "source": name,
                "paint": paint(&overlay.geometry, &overlay.style),
                "layout": { "visibility": visibility(overlay.visible) },
            })],
        )?;
        Ok(NativeRef::Named(name))
    }

    fn update_overlay(
        sdk: &dyn VendorSdk,
        map: NativeId,
        native: &NativeRef,
        previous: &Overlay,
        next: &Overlay,
    ) -> SdkResult<UpdateOutcome> {
        if let Geometry::Marker { position } = &next.geometry {
            // The marker element is built once; a new look needs a new marker
            if previous.style.icon != next.style.icon || previous.style.title != next.style.title {
                return Ok(UpdateOutcome::Replace);
            }
            let marker = object(native)?;
            if previous.geometry != next.geometry {
                sdk.invoke(marker, "setLngLat", vec![point(*position)])?;
            }
            if previous.style.draggable != next.style.draggable {
                sdk.invoke(marker, "setDraggable", vec![json!(next.style.draggable)])?;
            }
            if previous.visible != next.visible {
                if next.visible {
                    sdk.invoke(marker, "addTo", vec![object_arg(map)])?;
                } else {
                    sdk.invoke(marker, "remove", vec![])?;
                }
            }
            return Ok(UpdateOutcome::InPlace);
        }

        if previous.geometry != next.geometry {
            return Ok(UpdateOutcome::Replace);
        }

        let layer = name(native)?;
        if previous.style != next.style {
            let paint = paint(&next.geometry, &next.style);
            if let Value::Object(properties) = paint {
                for (property, value) in properties {
                    sdk.invoke(map, "setPaintProperty", vec![json!(layer), json!(property), value])?;
                }
            }
        }
        if previous.visible != next.visible {
            sdk.invoke(
                map,
                "setLayoutProperty",
                vec![json!(layer), json!("visibility"), json!(visibility(next.visible))],
            )?;
        }
        Ok(UpdateOutcome::InPlace)
    }

    fn remove_overlay(sdk: &dyn VendorSdk, map: NativeId, native: &NativeRef) -> SdkResult<()> {
        match native {
            NativeRef::Object(marker) => sdk.invoke(*marker, "remove", vec![]).map(|_| ()),
            NativeRef::Named(name) => remove_named(sdk, map, name),
        }
    }

    fn set_layer(
        sdk: &dyn VendorSdk,
        map: NativeId,
        existing: Option<&NativeRef>,
        layer: &Layer,
    ) -> SdkResult<NativeRef> {
        if let Some(native) = existing {
            remove_named(sdk, map, name(native)?)?;
        }

        match &layer.source {
            LayerSource::UrlTemplate(url) => {
                sdk.invoke(
                    map,
                    "addSource",
                    vec![
                        json!(layer.id),
                        json!({
                            "type": "raster",
                            "tiles": [url],
                            "tileSize": 256,
                            "attribution": layer.attribution,
                        }),
                    ],
                )?;
                sdk.invoke(
                    map,
                    "addLayer",
                    vec![json!({
                        "id": layer.id,
                        "type": "raster",
                        "source": layer.id,
                        "paint": { "raster-opacity": layer.opacity.unwrap_or(1.0) },
                        "layout": { "visibility": visibility(layer.visible) },
                    })],
                )?;
            }
            LayerSource::Style(descriptor) => {
                let mut spec = descriptor.clone();
                if let Value::Object(fields) = &mut spec {
                    fields.insert("id".to_string(), json!(layer.id));
                    fields.insert(
                        "layout".to_string(),
                        json!({ "visibility": visibility(layer.visible) }),
                    );
                }
                // Style layers bring their own source; give them an empty one
                // to remove alongside so removal is uniform
                sdk.invoke(
                    map,
                    "addSource",
                    vec![
                        json!(layer.id),
                        json!({ "type": "geojson", "data": { "type": "FeatureCollection", "features": [] } }),
                    ],
                )?;
                sdk.invoke(map, "addLayer", vec![spec])?;
            }
        }
        Ok(NativeRef::Named(layer.id.clone()))
    }

    fn remove_layer(sdk: &dyn VendorSdk, map: NativeId, native: &NativeRef) -> SdkResult<()> {
        remove_named(sdk, map, name(native)?)
    }

    fn native_event(kind: CanonicalEventKind) -> &'static str {
        match kind {
            CanonicalEventKind::Click | CanonicalEventKind::MarkerClick => "click",
            CanonicalEventKind::DoubleClick => "dblclick",
            CanonicalEventKind::Move => "moveend",
            CanonicalEventKind::Zoom => "zoomend",
            CanonicalEventKind::Load => "load",
            CanonicalEventKind::MarkerHover => "mouseenter",
        }
    }

    fn set_heatmap(
        sdk: &dyn VendorSdk,
        map: NativeId,
        existing: Option<&NativeRef>,
        heatmap: &Heatmap,
    ) -> SdkResult<NativeRef> {
        if let Some(native) = existing {
            remove_named(sdk, map, name(native)?)?;
        }

        let features: Vec<Value> = heatmap
            .points
            .iter()
            .map(|p| {
                json!({
                    "type": "Feature",
                    "properties": { "weight": p.weight },
                    "geometry": { "type": "Point", "coordinates": [p.lng, p.lat] },
                })
            })
            .collect();
        let source = format!("unimap-heatmap-{}", heatmap.id);
        sdk.invoke(
            map,
            "addSource",
            vec![
                json!(source),
                json!({ "type": "geojson", "data": { "type": "FeatureCollection", "features": features } }),
            ],
        )?;
        sdk.invoke(
            map,
            "addLayer",
            vec![json!({
                "id": source,
                "type": "heatmap",
                "source": source,
                "paint": {
                    "heatmap-weight": ["/", ["get", "weight"], heatmap.effective_max()],
                    "heatmap-radius": heatmap.radius.unwrap_or(30.0),
                    "heatmap-opacity": heatmap.opacity.unwrap_or(1.0),
                },
            })],
        )?;
        Ok(NativeRef::Named(source))
    }

    fn remove_heatmap(sdk: &dyn VendorSdk, map: NativeId, native: &NativeRef) -> SdkResult<()> {
        remove_named(sdk, map, name(native)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polygon_ring_is_closed() {
        let geometry = Geometry::Polygon {
            path: vec![LatLng::new(0.0, 0.0), LatLng::new(0.0, 1.0), LatLng::new(1.0, 1.0)],
        };
        let coordinates = &feature(&geometry)["geometry"]["coordinates"][0];
        assert_eq!(coordinates.as_array().unwrap().len(), 4);
        assert_eq!(coordinates[0], coordinates[3]);
        // lng first
        assert_eq!(coordinates[1], json!([1.0, 0.0]));
    }

    #[test]
    fn test_circle_approximation_radius() {
        let center = LatLng::new(45.0, 7.0);
        for vertex in circle_ring(center, 1000.0) {
            let distance = center.distance_to(&vertex);
            assert!((distance - 1000.0).abs() < 15.0, "vertex at {}m", distance);
        }
    }

    #[test]
    fn test_translate_uses_lng_lat() {
        let event = Mapbox::translate(
            CanonicalEventKind::Click,
            &json!({"lngLat": {"lng": 13.4, "lat": 52.5}, "point": {"x": 1, "y": 2}}),
        );
        assert_eq!(event.position(), Some(LatLng::new(52.5, 13.4)));
    }
}
