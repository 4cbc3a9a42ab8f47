use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use unimap::{
    props::MarkerProps,
    testing::{AdapterCall, LoadBehavior, RecordingAdapter},
    AdapterRegistry, CanonicalEvent, CanonicalEventKind, FacadeConfig, LatLng, LatLngBounds,
    LifecycleState, LoadFailure, MapError, MapEvent, MapFacade, MapProps, OverlayKey,
    OverlayKind, OverlayStyle, PropsOutcome, ProviderKind,
};

fn marker(id: &str, lat: f64, lng: f64) -> MarkerProps {
    MarkerProps {
        id: id.to_string(),
        position: LatLng::new(lat, lng),
        style: OverlayStyle::default(),
        visible: true,
    }
}

fn key(id: &str) -> OverlayKey {
    OverlayKey::new(OverlayKind::Marker, id)
}

fn setup(adapter: RecordingAdapter, props: MapProps) -> (MapFacade, Arc<RecordingAdapter>) {
    setup_with(adapter, props, FacadeConfig::development())
}

fn setup_with(
    adapter: RecordingAdapter,
    props: MapProps,
    config: FacadeConfig,
) -> (MapFacade, Arc<RecordingAdapter>) {
    let adapter = Arc::new(adapter);
    let registry = AdapterRegistry::new().with(adapter.clone());
    let facade = MapFacade::new(registry, props, config).unwrap();
    (facade, adapter)
}

#[tokio::test]
async fn test_swap_one_marker_removes_and_adds_exactly_once() {
    let mut props = MapProps::new(ProviderKind::Google);
    props.api_key = Some("key".into());
    props.markers = vec![marker("A", 1.0, 1.0), marker("B", 2.0, 2.0)];
    let (facade, adapter) = setup(RecordingAdapter::new(ProviderKind::Google), props);
    facade.mount().await.unwrap();
    adapter.clear_calls();

    let outcome = facade
        .update_props(|props| props.markers = vec![marker("B", 2.0, 2.0), marker("C", 3.0, 3.0)])
        .unwrap();

    let report = match outcome {
        PropsOutcome::Reconciled(report) => report,
        other => panic!("expected a reconciliation, got {:?}", other),
    };
    assert_eq!(report.operation_names(), vec!["remove_overlay", "add_overlay"]);
    assert_eq!(
        adapter.mutations(),
        vec![
            AdapterCall::RemoveOverlay { key: key("A") },
            AdapterCall::AddOverlay { key: key("C") },
        ]
    );
}

#[tokio::test]
async fn test_center_only_change_is_one_set_view() {
    let mut props = MapProps::new(ProviderKind::Mapbox);
    props.center = Some(LatLng::new(48.85, 2.35));
    props.zoom = Some(10.0);
    props.markers = vec![marker("A", 48.85, 2.35)];
    let (facade, adapter) = setup(RecordingAdapter::new(ProviderKind::Mapbox), props);
    facade.mount().await.unwrap();
    adapter.clear_calls();

    facade
        .update_props(|props| props.center = Some(LatLng::new(51.5, -0.12)))
        .unwrap();

    assert_eq!(
        adapter.calls(),
        vec![AdapterCall::SetView {
            center: LatLng::new(51.5, -0.12),
            zoom: 10.0
        }]
    );
}

#[tokio::test]
async fn test_bounds_take_precedence_over_center() {
    let mut props = MapProps::new(ProviderKind::Mapbox);
    props.center = Some(LatLng::new(5.0, 5.0));
    props.bounds = Some(LatLngBounds::from_coords(0.0, 0.0, 10.0, 10.0));
    props.bounds_padding = Some(32.0);
    let (facade, adapter) = setup(RecordingAdapter::new(ProviderKind::Mapbox), props);
    facade.mount().await.unwrap();

    let views: Vec<_> = adapter
        .mutations()
        .into_iter()
        .filter(|call| matches!(call, AdapterCall::SetView { .. } | AdapterCall::FitBounds { .. }))
        .collect();
    assert_eq!(
        views,
        vec![AdapterCall::FitBounds {
            bounds: LatLngBounds::from_coords(0.0, 0.0, 10.0, 10.0),
            padding: 32.0
        }]
    );
}

#[tokio::test]
async fn test_unmount_during_loading_issues_no_mutations() {
    let gate = Arc::new(tokio::sync::Notify::new());
    let mut props = MapProps::default();
    props.markers = vec![marker("A", 1.0, 1.0)];
    let (facade, adapter) = setup(
        RecordingAdapter::new(ProviderKind::Leaflet).with_load(LoadBehavior::Gate(gate.clone())),
        props,
    );
    let facade = Arc::new(facade);

    let mounting = tokio::spawn({
        let facade = facade.clone();
        async move { facade.mount().await }
    });
    tokio::task::yield_now().await;
    assert_eq!(facade.lifecycle(), LifecycleState::Loading);

    facade.unmount();
    assert_eq!(facade.lifecycle(), LifecycleState::Destroyed);
    gate.notify_one();

    let result = mounting.await.unwrap();
    assert!(result.unwrap_err().is_invalid_state());
    assert!(adapter.mutations().is_empty());
    assert!(facade.provider_handle().is_none());
    assert_eq!(adapter.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_load_timeout_surfaces_provider_load_error() {
    let mut props = MapProps::default();
    props.markers = vec![marker("A", 1.0, 1.0)];
    let config = FacadeConfig::development().with_load_timeout(Duration::from_millis(250));
    let (facade, adapter) = setup_with(
        RecordingAdapter::new(ProviderKind::Leaflet).with_load(LoadBehavior::Hang),
        props,
        config,
    );
    let errors = Arc::new(AtomicUsize::new(0));
    let counter = errors.clone();
    facade.on_error(move |error| {
        assert!(error.is_provider_load());
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let err = facade.mount().await.unwrap_err();
    assert_eq!(
        err,
        MapError::ProviderLoad {
            provider: ProviderKind::Leaflet,
            reason: LoadFailure::Timeout(Duration::from_millis(250)),
        }
    );

    let status = facade.status();
    assert!(!status.loading);
    assert!(status.error);
    assert_eq!(status.lifecycle, LifecycleState::Error);
    assert!(adapter.mutations().is_empty());

    facade.process_events();
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_callback_fires_after_unmount() {
    let mut props = MapProps::default();
    props.markers = vec![marker("A", 1.0, 1.0)];
    let (facade, adapter) = setup(RecordingAdapter::new(ProviderKind::Leaflet), props);
    let clicks = Arc::new(AtomicUsize::new(0));
    let counter = clicks.clone();
    facade.on(CanonicalEventKind::Click, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let receiver = facade.subscribe();
    facade.mount().await.unwrap();
    assert!(matches!(
        receiver.try_recv(),
        Ok(MapEvent::Canonical(event)) if event.kind == CanonicalEventKind::Load
    ));

    adapter.emit(CanonicalEvent::new(CanonicalEventKind::Click).with_position(LatLng::new(1.0, 2.0)));
    facade.process_events();
    assert_eq!(clicks.load(Ordering::SeqCst), 1);
    assert!(matches!(
        receiver.try_recv(),
        Ok(MapEvent::Canonical(event)) if event.kind == CanonicalEventKind::Click
    ));

    facade.unmount();
    assert_eq!(adapter.active_subscriptions(), 0);
    adapter.emit(CanonicalEvent::new(CanonicalEventKind::Click));
    assert!(facade.process_events().is_empty());
    assert_eq!(clicks.load(Ordering::SeqCst), 1);
    assert!(receiver.recv().is_err());

    // idempotent
    facade.unmount();
    assert_eq!(
        adapter.calls().iter().filter(|call| matches!(call, AdapterCall::Destroy { .. })).count(),
        1
    );
}

#[tokio::test]
async fn test_marker_subscriptions_follow_markers() {
    let (facade, adapter) = setup(RecordingAdapter::new(ProviderKind::Leaflet), MapProps::default());
    facade.mount().await.unwrap();
    assert_eq!(adapter.active_subscriptions(), 5);

    facade
        .update_props(|props| props.markers = vec![marker("A", 1.0, 1.0)])
        .unwrap();
    assert_eq!(adapter.active_subscriptions(), 7);

    facade.update_props(|props| props.markers.clear()).unwrap();
    assert_eq!(adapter.active_subscriptions(), 5);
}

#[tokio::test]
async fn test_vendor_failures_become_error_events() {
    let (facade, adapter) = setup(RecordingAdapter::new(ProviderKind::Amap), MapProps::new(ProviderKind::Amap));
    facade.mount().await.unwrap();
    adapter.fail_overlay("B");

    let outcome = facade
        .update_props(|props| props.markers = vec![marker("A", 30.0, 120.0), marker("B", 31.0, 121.0)])
        .unwrap();
    let PropsOutcome::Reconciled(report) = outcome else {
        panic!("map should be ready");
    };
    assert_eq!(report.failures.len(), 1);

    let events = facade.process_events();
    let errors: Vec<_> = events.iter().filter_map(MapEvent::as_error).collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].is_vendor_runtime());

    // the failed add shows up again on the next pass
    adapter.clear_failures();
    adapter.clear_calls();
    let PropsOutcome::Reconciled(retry) = facade.update_props(|_| {}).unwrap() else {
        panic!("map should be ready");
    };
    assert_eq!(retry.operation_names(), vec!["add_overlay"]);
    assert_eq!(facade.lifecycle(), LifecycleState::Ready);
}

#[tokio::test]
async fn test_provider_switch_requires_remount() {
    let leaflet = Arc::new(RecordingAdapter::new(ProviderKind::Leaflet));
    let baidu = Arc::new(RecordingAdapter::new(ProviderKind::Baidu));
    let registry = AdapterRegistry::new().with(leaflet.clone()).with(baidu.clone());
    let mut props = MapProps::default();
    props.markers = vec![marker("A", 39.9, 116.4)];
    let facade = MapFacade::new(registry, props, FacadeConfig::development()).unwrap();
    facade.mount().await.unwrap();

    let outcome = facade
        .update_props(|props| {
            props.provider = ProviderKind::Baidu;
            props.api_key = Some("ak".into());
        })
        .unwrap();
    assert_eq!(outcome, PropsOutcome::RemountRequired);
    assert_eq!(facade.lifecycle(), LifecycleState::Destroyed);
    assert!(leaflet.calls().iter().any(|call| matches!(call, AdapterCall::Destroy { .. })));
    assert_eq!(leaflet.active_subscriptions(), 0);

    facade.mount().await.unwrap();
    assert_eq!(facade.lifecycle(), LifecycleState::Ready);
    assert_eq!(facade.provider(), ProviderKind::Baidu);
    assert_eq!(
        baidu.mutations(),
        vec![AdapterCall::AddOverlay { key: key("A") }]
    );
}

#[test]
fn test_unknown_provider_in_registry_is_rejected() {
    let registry = AdapterRegistry::new().with(Arc::new(RecordingAdapter::new(ProviderKind::Leaflet)));
    let err = MapFacade::new(registry, MapProps::new(ProviderKind::Google), FacadeConfig::development())
        .err()
        .unwrap();
    assert!(err.is_config_validation());
}

#[tokio::test]
async fn test_fail_destroys_and_remount_starts_fresh() {
    let (facade, adapter) = setup(RecordingAdapter::new(ProviderKind::Leaflet), MapProps::default());
    facade.mount().await.unwrap();

    facade
        .fail(MapError::VendorRuntime {
            provider: ProviderKind::Leaflet,
            operation: "render",
            message: "context lost".into(),
        })
        .unwrap();
    assert_eq!(facade.lifecycle(), LifecycleState::Error);
    assert!(facade.provider_handle().is_none());
    assert_eq!(facade.update_props(|_| {}).unwrap(), PropsOutcome::Inactive);

    adapter.clear_calls();
    facade.mount().await.unwrap();
    assert_eq!(facade.lifecycle(), LifecycleState::Ready);
    assert_eq!(adapter.call_names()[0], "initialize");
    assert!(facade.status().cause.is_none());
}

#[tokio::test]
async fn test_imperative_fit_bounds_then_props_view_wins() {
    let (facade, adapter) = setup(RecordingAdapter::new(ProviderKind::Leaflet), MapProps::default());
    facade.mount().await.unwrap();
    let handle = facade.provider_handle().unwrap();
    assert!(handle.is_alive());
    adapter.clear_calls();

    let bounds = LatLngBounds::from_coords(40.0, -75.0, 41.0, -73.0);
    facade.fit_bounds(bounds, None).unwrap();
    assert_eq!(
        adapter.calls(),
        vec![AdapterCall::FitBounds { bounds, padding: 20.0 }]
    );

    // a prop change that does not touch the view keeps the imperative camera
    adapter.clear_calls();
    facade.update_props(|props| props.attribution = Some("tiles".into())).unwrap();
    assert_eq!(adapter.call_names(), vec!["set_layer"]);

    // moving the camera through props takes over again
    adapter.clear_calls();
    facade
        .update_props(|props| props.center = Some(LatLng::new(1.0, 1.0)))
        .unwrap();
    assert_eq!(adapter.call_names(), vec!["set_view"]);

    facade.unmount();
    assert!(!handle.is_alive());
}

#[tokio::test]
async fn test_mount_emits_one_load_event() {
    let (facade, _adapter) = setup(RecordingAdapter::new(ProviderKind::Leaflet), MapProps::default());
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    facade.on(CanonicalEventKind::Load, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    facade.mount().await.unwrap();

    let events = facade.process_events();
    let kinds: Vec<_> = events
        .iter()
        .filter_map(MapEvent::as_canonical)
        .map(|event| event.kind)
        .collect();
    assert_eq!(kinds, vec![CanonicalEventKind::Load]);
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    facade.update_props(|props| props.markers = vec![marker("A", 1.0, 1.0)]).unwrap();
    assert!(facade.process_events().is_empty());
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_props_set_during_a_pass_are_coalesced_into_it() {
    let (facade, adapter) = setup(RecordingAdapter::new(ProviderKind::Leaflet), MapProps::default());
    let facade = Arc::new(facade);
    facade.mount().await.unwrap();
    adapter.clear_calls();

    let nested = Arc::new(std::sync::Mutex::new(Vec::new()));
    adapter.on_call({
        let facade = Arc::downgrade(&facade);
        let recorder = Arc::downgrade(&adapter);
        let nested = nested.clone();
        move |call| {
            if *call != (AdapterCall::AddOverlay { key: key("A") }) {
                return;
            }
            let (Some(facade), Some(recorder)) = (facade.upgrade(), recorder.upgrade()) else {
                return;
            };
            let outcome = facade
                .update_props(|props| props.markers.push(marker("B", 2.0, 2.0)))
                .unwrap();
            // nothing ran inside the running pass
            let mutations_seen = recorder.mutations().len();
            nested.lock().unwrap().push((outcome, mutations_seen));
        }
    });

    let outcome = facade
        .update_props(|props| props.markers = vec![marker("A", 1.0, 1.0)])
        .unwrap();

    let nested = nested.lock().unwrap().clone();
    assert_eq!(nested.len(), 1);
    assert!(matches!(nested[0].0, PropsOutcome::Coalesced));
    assert_eq!(nested[0].1, 1);

    let PropsOutcome::Reconciled(report) = outcome else {
        panic!("map should be ready");
    };
    assert_eq!(report.operation_names(), vec!["add_overlay", "add_overlay"]);
    assert_eq!(
        adapter.mutations(),
        vec![
            AdapterCall::AddOverlay { key: key("A") },
            AdapterCall::AddOverlay { key: key("B") },
        ]
    );
    let applied: Vec<_> = facade
        .applied()
        .unwrap()
        .overlays
        .iter()
        .map(|overlay| overlay.id.clone())
        .collect();
    assert_eq!(applied, vec!["A".to_string(), "B".to_string()]);
}
