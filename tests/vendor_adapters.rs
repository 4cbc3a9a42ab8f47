use std::{sync::Arc, time::Duration};

use serde_json::json;

use unimap::{
    coords,
    props::MarkerProps,
    provider::{
        adapter::read_lat_lng, leaflet::LeafletAdapter, loader::ScriptRegistry, InitOptions,
    },
    testing::{LoadBehavior, NativeCall, ScriptedSdk},
    AdapterRegistry, CanonicalEventKind, ClusterOptions, DiagnosticsMode, DrawTool,
    DrawingToolConfig, FacadeConfig, HeatPoint, Heatmap, LatLng, Layer, LoadFailure, MapContainer,
    MapError, MapEvent, MapFacade, MapProps, OverlayStyle, PropsOutcome, ProviderAdapter,
    ProviderKind,
};

struct Harness {
    sdk: Arc<ScriptedSdk>,
    scripts: Arc<ScriptRegistry>,
    registry: AdapterRegistry,
}

impl Harness {
    fn new(mode: DiagnosticsMode) -> Self {
        let sdk = Arc::new(ScriptedSdk::new());
        let scripts = ScriptRegistry::new();
        let registry = AdapterRegistry::with_sdk_and_scripts(sdk.clone(), mode, scripts.clone());
        Self {
            sdk,
            scripts,
            registry,
        }
    }

    fn facade(&self, props: MapProps) -> MapFacade {
        MapFacade::new(self.registry.clone(), props, FacadeConfig::development()).unwrap()
    }
}

fn marker(id: &str, lat: f64, lng: f64) -> MarkerProps {
    MarkerProps {
        id: id.to_string(),
        position: LatLng::new(lat, lng),
        style: OverlayStyle::default(),
        visible: true,
    }
}

fn keyed(provider: ProviderKind) -> MapProps {
    let mut props = MapProps::new(provider);
    props.api_key = Some("test-key".into());
    props
}

#[tokio::test]
async fn test_leaflet_markers_and_map_events() {
    let harness = Harness::new(DiagnosticsMode::Development);
    let mut props = MapProps::default();
    props.markers = vec![marker("london", 51.5, -0.1)];
    let facade = harness.facade(props);
    facade.mount().await.unwrap();

    let maps = harness.sdk.objects_of_class("L.map");
    assert_eq!(maps.len(), 1);
    assert_eq!(harness.sdk.constructions("L.marker")[0][0], json!([51.5, -0.1]));
    assert_eq!(harness.sdk.objects_of_class("L.tileLayer").len(), 1);

    let fired = harness.sdk.fire(
        maps[0],
        "click",
        json!({"latlng": {"lat": 48.0, "lng": 2.0}, "containerPoint": {"x": 5, "y": 6}}),
    );
    assert_eq!(fired, 1);

    let events = facade.process_events();
    let kinds: Vec<_> = events
        .iter()
        .filter_map(MapEvent::as_canonical)
        .map(|event| event.kind)
        .collect();
    assert_eq!(kinds, vec![CanonicalEventKind::Load, CanonicalEventKind::Click]);
    let click = events[1].as_canonical().unwrap();
    assert_eq!(click.position(), Some(LatLng::new(48.0, 2.0)));
    assert_eq!(click.pixel.map(|p| (p.x, p.y)), Some((5.0, 6.0)));
}

#[tokio::test]
async fn test_view_change_while_loading_is_applied_once_ready() {
    let harness = Harness::new(DiagnosticsMode::Development);
    let gate = harness.sdk.gate_load();
    let facade = Arc::new(harness.facade(MapProps::default()));

    let mount = tokio::spawn({
        let facade = facade.clone();
        async move { facade.mount().await }
    });
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    let outcome = facade
        .update_props(|props| props.center = Some(LatLng::new(10.0, 20.0)))
        .unwrap();
    assert_eq!(outcome, PropsOutcome::Pending);

    gate.notify_one();
    mount.await.unwrap().unwrap();

    let maps = harness.sdk.constructions("L.map");
    assert_eq!(maps.len(), 1);
    assert_eq!(maps[0][1]["center"], json!([0.0, 0.0]));
    let views = harness.sdk.invocations("setView");
    assert_eq!(views.len(), 1);
    match &views[0] {
        NativeCall::Invoke { args, .. } => assert_eq!(args[0], json!([10.0, 20.0])),
        other => panic!("expected setView, got {:?}", other),
    }
    assert_eq!(facade.applied().unwrap().view.center, LatLng::new(10.0, 20.0));
}

#[tokio::test]
async fn test_baidu_works_in_bd09_and_reports_wgs84() {
    let harness = Harness::new(DiagnosticsMode::Development);
    let beijing = LatLng::new(39.9087, 116.3975);
    let mut props = keyed(ProviderKind::Baidu);
    props.markers = vec![marker("tiananmen", beijing.lat, beijing.lng)];
    let facade = harness.facade(props);
    facade.mount().await.unwrap();

    let native = read_lat_lng(&harness.sdk.constructions("BMap.Marker")[0][0]).unwrap();
    assert!(native.max_delta(&beijing) > 1e-3, "marker was not shifted into BD-09");
    assert!(native.max_delta(&coords::from_wgs84(ProviderKind::Baidu, beijing)) < 1e-12);

    let marker_id = harness.sdk.objects_of_class("BMap.Marker")[0];
    harness
        .sdk
        .fire(marker_id, "click", json!({ "point": { "lng": native.lng, "lat": native.lat } }));

    let events = facade.process_events();
    let click = events
        .iter()
        .filter_map(MapEvent::as_canonical)
        .find(|event| event.kind == CanonicalEventKind::MarkerClick)
        .unwrap();
    assert_eq!(click.overlay_id.as_deref(), Some("tiananmen"));
    assert!(click.position().unwrap().max_delta(&beijing) < 1e-5);
}

#[tokio::test]
async fn test_amap_cluster_and_heatmap() {
    let harness = Harness::new(DiagnosticsMode::Development);
    let mut props = keyed(ProviderKind::Amap);
    props.markers = vec![marker("a", 31.23, 121.47), marker("b", 31.24, 121.48)];
    props.cluster_markers = true;
    props.clustering_options = Some(ClusterOptions {
        grid_size: Some(80.0),
        ..ClusterOptions::default()
    });
    props.heatmap = Some(Heatmap::new(vec![HeatPoint::new(LatLng::new(31.2, 121.5), 3.0)]));
    let facade = harness.facade(props);
    facade.mount().await.unwrap();

    let clusterers = harness.sdk.constructions("AMap.MarkerClusterer");
    assert_eq!(clusterers.len(), 1);
    assert_eq!(clusterers[0][1].as_array().map(Vec::len), Some(2));
    assert_eq!(clusterers[0][2]["gridSize"], json!(80.0));
    assert_eq!(harness.sdk.objects_of_class("AMap.Heatmap").len(), 1);

    facade
        .update_props(|props| {
            props.cluster_markers = false;
            props.heatmap = None;
        })
        .unwrap();
    assert_eq!(harness.sdk.invocations("clearMarkers").len(), 1);
    assert!(harness.sdk.objects_of_class("AMap.MarkerClusterer").is_empty());
    assert!(harness.sdk.objects_of_class("AMap.Heatmap").is_empty());
}

#[tokio::test]
async fn test_unsupported_cluster_options_are_dropped() {
    let harness = Harness::new(DiagnosticsMode::Production);
    let mut props = keyed(ProviderKind::Google);
    props.markers = vec![marker("a", 1.0, 1.0)];
    props.cluster_markers = true;
    props.clustering_options = Some(ClusterOptions {
        max_cluster_radius: Some(40.0),
        grid_size: Some(60.0),
        ..ClusterOptions::default()
    });
    let facade = harness.facade(props);
    facade.mount().await.unwrap();

    let options = &harness.sdk.constructions("markerClusterer.MarkerClusterer")[0][0];
    assert_eq!(options["gridSize"], json!(60.0));
    assert_eq!(options.get("maxClusterRadius"), None);
}

#[tokio::test]
async fn test_missing_api_key_fails_without_loading() {
    let harness = Harness::new(DiagnosticsMode::Development);
    let facade = harness.facade(MapProps::new(ProviderKind::Google));

    let err = facade.mount().await.unwrap_err();
    assert_eq!(
        err,
        MapError::ProviderLoad {
            provider: ProviderKind::Google,
            reason: LoadFailure::MissingApiKey,
        }
    );
    assert_eq!(harness.sdk.load_count(), 0);
    assert!(facade.status().error_message.unwrap().contains("missing API key"));
}

#[tokio::test]
async fn test_concurrent_mounts_share_one_script_load() {
    let harness = Harness::new(DiagnosticsMode::Development);
    let gate = harness.sdk.gate_load();
    let first = Arc::new(harness.facade(keyed(ProviderKind::Amap)));
    let second = Arc::new(harness.facade(keyed(ProviderKind::Amap)));

    let a = tokio::spawn({
        let facade = first.clone();
        async move { facade.mount().await }
    });
    let b = tokio::spawn({
        let facade = second.clone();
        async move { facade.mount().await }
    });
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    assert_eq!(harness.sdk.load_count(), 1);

    gate.notify_one();
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();
    assert_eq!(harness.sdk.load_count(), 1);
    assert_eq!(harness.sdk.objects_of_class("AMap.Map").len(), 2);
    assert!(harness.scripts.is_loaded(ProviderKind::Amap));
}

#[tokio::test]
async fn test_failed_script_load_is_retried_on_remount() {
    let harness = Harness::new(DiagnosticsMode::Development);
    harness.sdk.fail_load("net::ERR_BLOCKED_BY_CLIENT");
    let facade = harness.facade(keyed(ProviderKind::Mapbox));

    let err = facade.mount().await.unwrap_err();
    assert!(err.is_provider_load());
    assert!(!harness.scripts.is_cached(ProviderKind::Mapbox));

    harness.sdk.set_load(LoadBehavior::Succeed);
    facade.mount().await.unwrap();
    assert_eq!(harness.sdk.load_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_load_stays_cached() {
    let harness = Harness::new(DiagnosticsMode::Development);
    harness.sdk.set_load(LoadBehavior::Hang);
    let config = FacadeConfig::development().with_load_timeout(Duration::from_secs(1));
    let facade =
        MapFacade::new(harness.registry.clone(), keyed(ProviderKind::Baidu), config).unwrap();

    let err = facade.mount().await.unwrap_err();
    assert!(matches!(
        err,
        MapError::ProviderLoad {
            reason: LoadFailure::Timeout(_),
            ..
        }
    ));
    assert!(harness.scripts.is_cached(ProviderKind::Baidu));
    assert!(!harness.scripts.is_loaded(ProviderKind::Baidu));
    assert!(harness.sdk.objects_of_class("BMap.Map").is_empty());
}

#[tokio::test]
async fn test_calls_after_destroy_depend_on_mode() {
    let sdk = Arc::new(ScriptedSdk::new());
    let scripts = ScriptRegistry::new();
    let options = InitOptions::default();

    let strict =
        LeafletAdapter::with_scripts(sdk.clone(), DiagnosticsMode::Development, scripts.clone());
    let handle = strict.initialize(&MapContainer::default(), &options).await.unwrap();
    strict.destroy(&handle);
    let err = strict.set_view(&handle, LatLng::new(1.0, 1.0), 4.0).unwrap_err();
    assert!(err.is_invalid_state());

    let lenient = LeafletAdapter::with_scripts(sdk.clone(), DiagnosticsMode::Production, scripts);
    let handle = lenient.initialize(&MapContainer::default(), &options).await.unwrap();
    lenient.destroy(&handle);
    sdk.clear_calls();
    assert!(lenient.set_view(&handle, LatLng::new(1.0, 1.0), 4.0).is_ok());
    assert!(sdk.calls().is_empty());
    assert_eq!(lenient.live_instances(), 0);
}

#[tokio::test]
async fn test_unmount_releases_everything() {
    let harness = Harness::new(DiagnosticsMode::Development);
    let mut props = MapProps::default();
    props.markers = vec![marker("a", 1.0, 1.0), marker("b", 2.0, 2.0)];
    let facade = harness.facade(props);
    facade.mount().await.unwrap();
    assert!(harness.sdk.live_listeners() > 0);

    facade.unmount();
    assert_eq!(harness.sdk.live_listeners(), 0);
    assert_eq!(harness.sdk.live_objects(), 0);
    assert!(harness
        .sdk
        .calls()
        .iter()
        .any(|call| matches!(call, NativeCall::Invoke { method, .. } if method == "remove")));
}

#[tokio::test]
async fn test_vendor_failure_during_reconcile_is_an_error_event() {
    let harness = Harness::new(DiagnosticsMode::Development);
    let facade = harness.facade(keyed(ProviderKind::Google));
    facade.mount().await.unwrap();
    harness.sdk.fail_method("google.maps.Circle");

    facade
        .update_props(|props| {
            props.circles = vec![unimap::props::CircleProps {
                id: "zone".into(),
                center: LatLng::new(1.0, 1.0),
                radius: 100.0,
                style: OverlayStyle::default(),
                visible: true,
            }];
        })
        .unwrap();

    let errors: Vec<String> = facade
        .process_events()
        .iter()
        .filter_map(MapEvent::as_error)
        .map(ToString::to_string)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("add_overlay"));
}

#[tokio::test]
async fn test_amap_mouse_tool_draws_first_enabled_shape() {
    let harness = Harness::new(DiagnosticsMode::Development);
    let mut props = keyed(ProviderKind::Amap);
    props.drawing_tools = Some(DrawingToolConfig::new(vec![DrawTool::Polygon, DrawTool::Circle]));
    let facade = harness.facade(props);
    facade.mount().await.unwrap();

    assert_eq!(harness.sdk.objects_of_class("AMap.MouseTool").len(), 1);
    assert_eq!(harness.sdk.invocations("polygon").len(), 1);
    assert!(harness.sdk.invocations("circle").is_empty());

    facade.update_props(|props| props.drawing_tools = None).unwrap();
    assert_eq!(harness.sdk.invocations("close").len(), 1);
    assert!(harness.sdk.objects_of_class("AMap.MouseTool").is_empty());
}

#[tokio::test]
async fn test_failed_google_layer_update_is_rebuilt_from_scratch() {
    let harness = Harness::new(DiagnosticsMode::Development);
    let mut props = keyed(ProviderKind::Google);
    props.layers = vec![Layer::tiles("traffic", "https://t/{z}/{x}/{y}.png")];
    let facade = harness.facade(props);
    facade.mount().await.unwrap();
    let original = harness.sdk.objects_of_class("google.maps.ImageMapType");
    assert_eq!(original.len(), 1);
    facade.process_events();

    harness.sdk.fail_method("overlayMapTypes.push");
    facade
        .update_props(|props| props.layers[0] = props.layers[0].clone().with_opacity(0.5))
        .unwrap();
    let errors: Vec<String> = facade
        .process_events()
        .iter()
        .filter_map(MapEvent::as_error)
        .map(ToString::to_string)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("set_layer"));
    // neither the replaced nor the half-built tiles survive
    assert!(harness.sdk.objects_of_class("google.maps.ImageMapType").is_empty());

    harness.sdk.clear_failures();
    harness.sdk.clear_calls();
    facade.update_props(|_| {}).unwrap();

    let live = harness.sdk.objects_of_class("google.maps.ImageMapType");
    assert_eq!(live.len(), 1);
    assert!(!live.contains(&original[0]));
    assert!(harness.sdk.invocations("overlayMapTypes.remove").is_empty());
    let pushes = harness.sdk.invocations("overlayMapTypes.push");
    assert_eq!(pushes.len(), 1);
    match &pushes[0] {
        NativeCall::Invoke { args, .. } => assert_eq!(args[0], json!({ "$ref": live[0] })),
        other => panic!("expected a push, got {:?}", other),
    }
    assert!(facade.process_events().iter().all(|event| event.as_error().is_none()));
}
