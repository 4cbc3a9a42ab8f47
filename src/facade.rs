//! The component consumers hold
//!
//! [`MapFacade`] ties props, lifecycle, reconciliation and events together
//! for one map. Every prop change becomes an immutable snapshot; while the
//! provider is loading, snapshots coalesce (last write wins) and the latest
//! one is flushed once the map is ready.

use crate::{
    core::{
        config::FacadeConfig,
        geo::{LatLng, LatLngBounds},
    },
    diagnostic,
    events::{
        canonical::{CanonicalEvent, CanonicalEventKind, MapEvent},
        dispatcher::{EventDispatcher, ListenerId},
        normalizer::EventNormalizer,
    },
    lifecycle::{LifecycleManager, LifecycleState, LoadCompletion},
    lock,
    props::MapProps,
    provider::{
        misuse, registry::AdapterRegistry, InitOptions, ProviderAdapter, ProviderHandle,
        ProviderKind, WeakHandle,
    },
    reconcile::{
        engine::{ReconcileReport, ReconciliationEngine},
        snapshot::{MapSnapshot, ViewSpec},
    },
    MapError, Result,
};
use crossbeam_channel::Receiver;
use futures::future::{abortable, AbortHandle, Aborted};
use std::sync::{Arc, Mutex};

/// What happened to a prop change
#[derive(Debug, Clone, PartialEq)]
pub enum PropsOutcome {
    /// The map was ready and the change has been applied
    Reconciled(ReconcileReport),
    /// The map is still loading; the change will be flushed once it is ready
    Pending,
    /// A reconciliation pass is running; the change is folded into its next
    /// iteration
    Coalesced,
    /// The provider changed. The old map is gone and `mount` must be called
    /// again.
    RemountRequired,
    /// The map is unmounted or failed; the props were stored but nothing ran
    Inactive,
}

/// Derived presentation state
#[derive(Debug, Clone, PartialEq)]
pub struct MapStatus {
    pub lifecycle: LifecycleState,
    pub loading: bool,
    pub error: bool,
    /// Text to display for the error, if any
    pub error_message: Option<String>,
    /// The error that failed the mount
    pub cause: Option<MapError>,
}

struct FacadeState {
    props: MapProps,
    adapter: Arc<dyn ProviderAdapter>,
    lifecycle: LifecycleManager,
    /// Latest snapshot built from props
    desired: MapSnapshot,
    dirty: bool,
    /// `None` before ready and while a pass borrows it
    engine: Option<ReconciliationEngine>,
    in_flight: bool,
    normalizer: EventNormalizer,
    abort: Option<AbortHandle>,
    /// Camera set through `pan_to`/`fit_bounds`; wins until props move the view
    imperative_view: Option<ViewSpec>,
    /// Imperative camera still to be recorded in the engine
    view_resync: Option<ViewSpec>,
    unmounted: bool,
}

impl FacadeState {
    /// Ends the current mount without touching the dispatcher
    fn teardown(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
        self.normalizer.clear();
        self.engine = None;
        self.imperative_view = None;
        self.view_resync = None;
        if let Some(handle) = self.lifecycle.destroy() {
            self.adapter.destroy(&handle);
        }
    }

    fn target(&self) -> MapSnapshot {
        match &self.imperative_view {
            Some(view) => self.desired.clone().with_view(view.clone()),
            None => self.desired.clone(),
        }
    }

    fn next_pass(&mut self) -> Option<Pass> {
        if !self.dirty || !self.lifecycle.is_ready() {
            return None;
        }
        let handle = self.lifecycle.handle()?.share();
        let engine = self.engine.take()?;
        self.dirty = false;
        Some(Pass {
            adapter: self.adapter.clone(),
            handle,
            engine,
            target: self.target(),
            resync: self.view_resync.take(),
        })
    }
}

/// Everything one reconciliation pass needs outside the facade lock
struct Pass {
    adapter: Arc<dyn ProviderAdapter>,
    handle: ProviderHandle,
    engine: ReconciliationEngine,
    target: MapSnapshot,
    resync: Option<ViewSpec>,
}

/// One declarative map over whichever vendor the props name
pub struct MapFacade {
    registry: AdapterRegistry,
    config: FacadeConfig,
    events: Arc<EventDispatcher>,
    state: Mutex<FacadeState>,
}

impl MapFacade {
    /// Validates `props` and prepares the map. Nothing is loaded until
    /// [`MapFacade::mount`].
    pub fn new(registry: AdapterRegistry, props: MapProps, config: FacadeConfig) -> Result<Self> {
        props.validate()?;
        let adapter = registry.get(props.provider)?;
        let desired = build_snapshot(&props, &config);
        let events = Arc::new(EventDispatcher::new());

        let state = FacadeState {
            props,
            adapter,
            lifecycle: LifecycleManager::new(),
            desired,
            dirty: true,
            engine: None,
            in_flight: false,
            normalizer: EventNormalizer::new(events.clone()),
            abort: None,
            imperative_view: None,
            view_resync: None,
            unmounted: false,
        };

        Ok(Self {
            registry,
            config,
            events,
            state: Mutex::new(state),
        })
    }

    pub fn config(&self) -> &FacadeConfig {
        &self.config
    }

    pub fn provider(&self) -> ProviderKind {
        lock(&self.state).props.provider
    }

    pub fn props(&self) -> MapProps {
        lock(&self.state).props.clone()
    }

    pub fn lifecycle(&self) -> LifecycleState {
        lock(&self.state).lifecycle.state()
    }

    /// What the engine last applied, `None` before the map is ready
    pub fn applied(&self) -> Option<MapSnapshot> {
        lock(&self.state)
            .engine
            .as_ref()
            .map(|engine| engine.applied().clone())
    }

    /// Loads the provider and flushes the latest snapshot.
    ///
    /// Resolves with an error when the load fails (the error is also emitted
    /// to `error` listeners) or when `unmount` cancels it. Mounting again
    /// after a failure or a provider switch starts a fresh lifecycle.
    pub async fn mount(&self) -> Result<()> {
        let (ticket, adapter, loaded_view, load) = {
            let mut state = lock(&self.state);
            if state.unmounted {
                return Err(MapError::InvalidState("mount after unmount".to_string()));
            }
            match state.lifecycle.state() {
                LifecycleState::Uninitialized => {}
                LifecycleState::Error | LifecycleState::Destroyed => {
                    log::debug!("remounting {} map", state.props.provider);
                    state.lifecycle = LifecycleManager::new();
                    state.dirty = true;
                }
                LifecycleState::Loading | LifecycleState::Ready => {
                    return Err(MapError::InvalidState(format!(
                        "map is already {}",
                        state.lifecycle.state()
                    )));
                }
            }

            let ticket = state.lifecycle.begin_load()?;
            // the engine starts from the camera the map was created with,
            // so view changes made while loading still diff
            let loaded_view = state.desired.view.without_bounds();
            let options = self.init_options(&state.props, &loaded_view);
            let container = self.config.container.clone();
            let adapter = state.adapter.clone();
            let loader = adapter.clone();
            let (load, abort) = abortable(async move { loader.initialize(&container, &options).await });
            state.abort = Some(abort);
            (ticket, adapter, loaded_view, load)
        };

        let result = match load.await {
            Ok(result) => result,
            Err(Aborted) => Err(MapError::InvalidState(
                "initialize cancelled by unmount".to_string(),
            )),
        };

        let mut state = lock(&self.state);
        state.abort = None;
        match state.lifecycle.complete_load(ticket, result) {
            LoadCompletion::Discarded(handle) => {
                if let Some(handle) = handle {
                    adapter.destroy(&handle);
                }
                Err(MapError::InvalidState(
                    "mount was cancelled before the provider loaded".to_string(),
                ))
            }
            LoadCompletion::Failed(error) => {
                drop(state);
                log::warn!("{}", error);
                self.events.emit(MapEvent::Error(error.clone()));
                Err(error)
            }
            LoadCompletion::Ready => {
                state.engine = Some(ReconciliationEngine::new(loaded_view, self.config.mode));
                state.dirty = true;
                drop(state);
                self.flush();
                self.events
                    .emit(MapEvent::Canonical(CanonicalEvent::new(CanonicalEventKind::Load)));
                Ok(())
            }
        }
    }

    /// Tears everything down. No callback fires after this returns.
    /// Repeated calls are no-ops.
    pub fn unmount(&self) {
        {
            let mut state = lock(&self.state);
            if state.unmounted {
                return;
            }
            state.unmounted = true;
            state.teardown();
        }
        self.events.close();
        log::debug!("map facade unmounted");
    }

    /// Replaces the props. Invalid props are rejected and the previous valid
    /// state is kept.
    pub fn set_props(&self, props: MapProps) -> Result<PropsOutcome> {
        props.validate()?;
        let desired = build_snapshot(&props, &self.config);

        let mut state = lock(&self.state);
        if props.provider != state.props.provider {
            let adapter = self.registry.get(props.provider)?;
            log::info!(
                "provider switched from {} to {}",
                state.props.provider,
                props.provider
            );
            let mounted = state.lifecycle.state() != LifecycleState::Uninitialized;
            if mounted {
                state.teardown();
            }
            state.adapter = adapter;
            state.props = props;
            state.desired = desired;
            state.dirty = true;
            return Ok(if state.unmounted {
                PropsOutcome::Inactive
            } else if mounted {
                PropsOutcome::RemountRequired
            } else {
                PropsOutcome::Pending
            });
        }

        if desired.view != state.desired.view {
            // The consumer moved the camera; imperative moves no longer apply
            state.imperative_view = None;
        }
        state.props = props;
        state.desired = desired;
        state.dirty = true;

        if state.unmounted {
            return Ok(PropsOutcome::Inactive);
        }
        match state.lifecycle.state() {
            LifecycleState::Uninitialized | LifecycleState::Loading => Ok(PropsOutcome::Pending),
            LifecycleState::Error | LifecycleState::Destroyed => Ok(PropsOutcome::Inactive),
            LifecycleState::Ready => {
                drop(state);
                Ok(match self.flush() {
                    Some(report) => PropsOutcome::Reconciled(report),
                    None => PropsOutcome::Coalesced,
                })
            }
        }
    }

    /// Edits a copy of the current props and applies it
    pub fn update_props<F>(&self, edit: F) -> Result<PropsOutcome>
    where
        F: FnOnce(&mut MapProps),
    {
        let mut props = self.props();
        edit(&mut props);
        self.set_props(props)
    }

    /// Runs passes until nothing is dirty. `None` when another caller is
    /// already running them.
    fn flush(&self) -> Option<ReconcileReport> {
        {
            let mut state = lock(&self.state);
            if state.in_flight {
                return None;
            }
            state.in_flight = true;
        }

        let mut total = ReconcileReport::default();
        loop {
            let pass = {
                let mut state = lock(&self.state);
                match state.next_pass() {
                    Some(pass) => pass,
                    None => {
                        state.in_flight = false;
                        break;
                    }
                }
            };
            total.merge(self.run_pass(pass));
        }
        Some(total)
    }

    fn run_pass(&self, pass: Pass) -> ReconcileReport {
        let Pass {
            adapter,
            handle,
            mut engine,
            target,
            resync,
        } = pass;

        if let Some(view) = resync {
            engine.resync_view(view);
        }
        let report = engine.reconcile(adapter.as_ref(), &handle, &target);
        let wanted = EventNormalizer::wanted_for(engine.applied(), adapter.capabilities());

        let sync_error = {
            let mut state = lock(&self.state);
            let current = state
                .lifecycle
                .handle()
                .map_or(false, |live| live.instance_id() == handle.instance_id());
            if current && state.lifecycle.is_ready() {
                let synced = state.normalizer.sync(adapter.as_ref(), &handle, &wanted);
                state.engine = Some(engine);
                synced.err()
            } else {
                // Unmounted or switched while the pass ran
                None
            }
        };

        for failure in report.failures.iter().chain(sync_error.iter()) {
            self.events.emit(MapEvent::Error(failure.clone()));
        }
        report
    }

    /// Fits the camera to `bounds` right away, then brings the facade's view
    /// state in line with it
    pub fn fit_bounds(&self, bounds: LatLngBounds, padding: Option<f64>) -> Result<()> {
        if !bounds.is_valid() {
            return Err(MapError::config("fit_bounds needs a south-west/north-east box"));
        }
        let padding = padding.unwrap_or(self.config.default_padding);
        let view = {
            let state = lock(&self.state);
            let current = self.current_view(&state);
            ViewSpec {
                center: bounds.center(),
                ..current
            }
            .with_bounds(bounds, padding)
        };
        self.move_camera(view, |adapter, handle| adapter.fit_bounds(handle, &bounds, padding))
    }

    /// Centers the map on `point`, keeping the zoom
    pub fn pan_to(&self, point: LatLng) -> Result<()> {
        if !point.is_valid() {
            return Err(MapError::config(format!(
                "pan_to target out of range: ({}, {})",
                point.lat, point.lng
            )));
        }
        let view = {
            let state = lock(&self.state);
            let current = self.current_view(&state);
            ViewSpec {
                center: point,
                bounds: None,
                ..current
            }
        };
        let zoom = view.zoom;
        self.move_camera(view, |adapter, handle| adapter.set_view(handle, point, zoom))
    }

    fn current_view(&self, state: &FacadeState) -> ViewSpec {
        state
            .imperative_view
            .clone()
            .or_else(|| state.engine.as_ref().map(|engine| engine.applied().view.clone()))
            .unwrap_or_else(|| state.desired.view.clone())
    }

    fn move_camera<F>(&self, view: ViewSpec, apply: F) -> Result<()>
    where
        F: FnOnce(&dyn ProviderAdapter, &ProviderHandle) -> Result<()>,
    {
        let (adapter, handle) = {
            let state = lock(&self.state);
            match state.lifecycle.handle() {
                Some(handle) if state.lifecycle.is_ready() => (state.adapter.clone(), handle.share()),
                _ => {
                    return misuse(
                        self.config.mode,
                        format!("camera moved while the map is {}", state.lifecycle.state()),
                    )
                }
            }
        };

        if let Err(error) = apply(adapter.as_ref(), &handle) {
            self.events.emit(MapEvent::Error(error.clone()));
            return Err(error);
        }

        {
            let mut state = lock(&self.state);
            state.imperative_view = Some(view.clone());
            state.view_resync = Some(view);
            state.dirty = true;
        }
        self.flush();
        Ok(())
    }

    /// Weak reference to the vendor map. Prefer props and events; this is
    /// for vendor features the facade does not cover.
    pub fn provider_handle(&self) -> Option<WeakHandle> {
        lock(&self.state)
            .lifecycle
            .handle()
            .map(ProviderHandle::downgrade)
    }

    pub fn status(&self) -> MapStatus {
        let state = lock(&self.state);
        let cause = state.lifecycle.error().cloned();
        let error = cause.is_some() || state.props.error;
        let error_message = match &state.props.error_message {
            Some(message) => Some(message.clone()),
            None => cause.as_ref().map(ToString::to_string),
        };
        MapStatus {
            lifecycle: state.lifecycle.state(),
            loading: state.lifecycle.is_loading() || state.props.loading,
            error,
            error_message,
            cause,
        }
    }

    /// Reports a fatal vendor failure noticed outside the facade. The map is
    /// destroyed and the facade moves to `Error`.
    pub fn fail(&self, error: MapError) -> Result<()> {
        {
            let mut state = lock(&self.state);
            let handle = state.lifecycle.fail(error.clone())?;
            if let Some(abort) = state.abort.take() {
                abort.abort();
            }
            state.normalizer.clear();
            state.engine = None;
            if let Some(handle) = handle {
                state.adapter.destroy(&handle);
            }
        }
        diagnostic!(self.config.mode, "map failed: {}", error);
        self.events.emit(MapEvent::Error(error));
        Ok(())
    }

    pub fn on<F>(&self, kind: CanonicalEventKind, callback: F) -> ListenerId
    where
        F: Fn(&CanonicalEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, callback)
    }

    pub fn on_error<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&MapError) + Send + Sync + 'static,
    {
        self.events.on_error(callback)
    }

    pub fn off(&self, listener: ListenerId) -> bool {
        self.events.off(listener)
    }

    /// Every event as it is emitted, without waiting for `process_events`
    pub fn subscribe(&self) -> Receiver<MapEvent> {
        self.events.subscribe()
    }

    /// Delivers queued events to the registered listeners
    pub fn process_events(&self) -> Vec<MapEvent> {
        self.events.process_events()
    }

    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    fn init_options(&self, props: &MapProps, view: &ViewSpec) -> InitOptions {
        InitOptions {
            api_key: props.api_key.clone(),
            center: view.center,
            zoom: view.zoom,
            min_zoom: view.min_zoom,
            max_zoom: view.max_zoom,
            load_timeout: self.config.load_timeout,
        }
    }
}

impl Drop for MapFacade {
    fn drop(&mut self) {
        self.unmount();
    }
}

fn build_snapshot(props: &MapProps, config: &FacadeConfig) -> MapSnapshot {
    let (snapshot, skipped) = props.to_snapshot(config.default_padding);
    for error in skipped {
        diagnostic!(config.mode, "skipping overlay: {}", error);
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        props::MarkerProps,
        testing::{AdapterCall, LoadBehavior, RecordingAdapter},
        DiagnosticsMode, OverlayStyle,
    };

    fn facade(adapter: RecordingAdapter, props: MapProps) -> (MapFacade, Arc<RecordingAdapter>) {
        let adapter = Arc::new(adapter);
        let registry = AdapterRegistry::new().with(adapter.clone());
        let facade = MapFacade::new(registry, props, FacadeConfig::development()).unwrap();
        (facade, adapter)
    }

    fn marker(id: &str, lat: f64) -> MarkerProps {
        MarkerProps {
            id: id.to_string(),
            position: LatLng::new(lat, 0.0),
            style: OverlayStyle::default(),
            visible: true,
        }
    }

    #[tokio::test]
    async fn test_mount_flushes_pending_snapshot() {
        let mut props = MapProps::new(ProviderKind::Mapbox);
        props.markers = vec![marker("a", 1.0)];
        let (facade, adapter) = facade(RecordingAdapter::new(ProviderKind::Mapbox), props);

        assert_eq!(facade.lifecycle(), LifecycleState::Uninitialized);
        facade.mount().await.unwrap();

        assert_eq!(facade.lifecycle(), LifecycleState::Ready);
        assert_eq!(adapter.mutations(), vec![AdapterCall::AddOverlay {
            key: crate::OverlayKey::new(crate::OverlayKind::Marker, "a")
        }]);
        assert_eq!(adapter.active_subscriptions(), 7);
    }

    #[tokio::test]
    async fn test_props_during_loading_are_coalesced() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let adapter = RecordingAdapter::new(ProviderKind::Leaflet).with_load(LoadBehavior::Gate(gate.clone()));
        let (facade, adapter) = facade(adapter, MapProps::default());
        let facade = Arc::new(facade);

        let mounting = tokio::spawn({
            let facade = facade.clone();
            async move { facade.mount().await }
        });
        tokio::task::yield_now().await;
        assert!(facade.status().loading);

        for lat in [1.0, 2.0, 3.0] {
            let outcome = facade
                .update_props(|props| props.markers = vec![marker("a", lat)])
                .unwrap();
            assert_eq!(outcome, PropsOutcome::Pending);
        }

        gate.notify_one();
        mounting.await.unwrap().unwrap();

        let adds: Vec<_> = adapter
            .mutations()
            .into_iter()
            .filter(|call| matches!(call, AdapterCall::AddOverlay { .. }))
            .collect();
        assert_eq!(adds.len(), 1);
        let applied = facade.applied().unwrap();
        assert_eq!(applied.overlays[0].geometry, crate::Geometry::Marker { position: LatLng::new(3.0, 0.0) });
    }

    #[tokio::test]
    async fn test_invalid_props_keep_previous_state() {
        let (facade, _adapter) = facade(RecordingAdapter::new(ProviderKind::Leaflet), MapProps::default());
        facade.mount().await.unwrap();

        let err = facade
            .update_props(|props| {
                props.min_zoom = Some(12.0);
                props.max_zoom = Some(4.0);
            })
            .unwrap_err();
        assert!(err.is_config_validation());
        assert_eq!(facade.props(), MapProps::default());
    }

    #[tokio::test]
    async fn test_pan_to_survives_unrelated_prop_changes() {
        let (facade, adapter) = facade(RecordingAdapter::new(ProviderKind::Leaflet), MapProps::default());
        facade.mount().await.unwrap();
        adapter.clear_calls();

        facade.pan_to(LatLng::new(10.0, 20.0)).unwrap();
        assert_eq!(adapter.call_names(), vec!["set_view"]);

        adapter.clear_calls();
        facade
            .update_props(|props| props.markers = vec![marker("a", 1.0)])
            .unwrap();
        assert_eq!(adapter.call_names(), vec!["add_overlay", "on", "on"]);
        assert_eq!(facade.applied().unwrap().view.center, LatLng::new(10.0, 20.0));
    }

    #[tokio::test]
    async fn test_status_overrides() {
        let mut props = MapProps::default();
        props.loading = true;
        props.error_message = Some("try again later".into());
        let adapter = RecordingAdapter::new(ProviderKind::Leaflet).with_load(LoadBehavior::Fail("offline".into()));
        let (facade, _adapter) = facade(adapter, props);

        let err = facade.mount().await.unwrap_err();
        assert!(err.is_provider_load());

        let status = facade.status();
        assert_eq!(status.lifecycle, LifecycleState::Error);
        assert!(status.loading);
        assert!(status.error);
        assert_eq!(status.error_message.as_deref(), Some("try again later"));
        assert!(status.cause.unwrap().is_provider_load());
    }

    #[tokio::test]
    async fn test_camera_before_ready_is_misuse() {
        let (facade, _adapter) = facade(RecordingAdapter::new(ProviderKind::Leaflet), MapProps::default());
        assert!(facade.pan_to(LatLng::new(1.0, 1.0)).unwrap_err().is_invalid_state());

        let production = MapFacade::new(
            AdapterRegistry::new().with(Arc::new(RecordingAdapter::new(ProviderKind::Leaflet))),
            MapProps::default(),
            FacadeConfig::default().with_mode(DiagnosticsMode::Production),
        )
        .unwrap();
        assert!(production.pan_to(LatLng::new(1.0, 1.0)).is_ok());
    }
}
