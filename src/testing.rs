//! Test doubles for both seams of the crate
//!
//! [`RecordingAdapter`] stands in for a whole vendor binding and records the
//! adapter calls the engine and facade issue. [`ScriptedSdk`] stands in for
//! the vendor script underneath a real [`crate::provider::adapter::SdkAdapter`]
//! and records the native calls a dialect makes.

use crate::{
    core::{
        config::{DiagnosticsMode, MapContainer},
        geo::{LatLng, LatLngBounds},
    },
    events::canonical::{CanonicalEvent, CanonicalEventKind},
    layers::{
        layer::Layer,
        overlay::{Overlay, OverlayKey},
    },
    lock,
    plugins::{cluster::ClusterOptions, draw::DrawingToolConfig, heatmap::Heatmap},
    provider::{
        handle::{ClusterRef, OverlayRef, ProviderHandle},
        sdk::{ListenerId, NativeCallback, NativeId, NativeRef, ScriptRequest, SdkFault, SdkResult, VendorSdk},
        Capabilities, EventCallback, InitOptions, ProviderAdapter, ProviderKind, Subscription,
    },
    LoadFailure, MapError, Result,
};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use fxhash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// How a simulated script load ends
#[derive(Debug, Clone, Default)]
pub enum LoadBehavior {
    #[default]
    Succeed,
    Fail(String),
    /// Waits for one `notify_one` on the gate
    Gate(Arc<Notify>),
    /// Never finishes; only the load timeout or cancellation ends it
    Hang,
}

impl LoadBehavior {
    async fn run(self) -> std::result::Result<(), String> {
        match self {
            LoadBehavior::Succeed => Ok(()),
            LoadBehavior::Fail(message) => Err(message),
            LoadBehavior::Gate(gate) => {
                gate.notified().await;
                Ok(())
            }
            LoadBehavior::Hang => futures::future::pending().await,
        }
    }
}

/// One call into a [`RecordingAdapter`]
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterCall {
    Initialize { container: String },
    Destroy { instance: u64 },
    SetView { center: LatLng, zoom: f64 },
    FitBounds { bounds: LatLngBounds, padding: f64 },
    AddOverlay { key: OverlayKey },
    UpdateOverlay { key: OverlayKey },
    RemoveOverlay { key: OverlayKey },
    SetLayer { id: String },
    RemoveLayer { id: String },
    CreateCluster { slot: u64, members: usize },
    DisposeCluster { slot: u64 },
    SetHeatmap { id: String, points: usize },
    RemoveHeatmap { id: String },
    SetDrawingTools { enabled: bool },
    Subscribe { kind: CanonicalEventKind },
}

impl AdapterCall {
    pub fn name(&self) -> &'static str {
        match self {
            AdapterCall::Initialize { .. } => "initialize",
            AdapterCall::Destroy { .. } => "destroy",
            AdapterCall::SetView { .. } => "set_view",
            AdapterCall::FitBounds { .. } => "fit_bounds",
            AdapterCall::AddOverlay { .. } => "add_overlay",
            AdapterCall::UpdateOverlay { .. } => "update_overlay",
            AdapterCall::RemoveOverlay { .. } => "remove_overlay",
            AdapterCall::SetLayer { .. } => "set_layer",
            AdapterCall::RemoveLayer { .. } => "remove_layer",
            AdapterCall::CreateCluster { .. } => "create_cluster",
            AdapterCall::DisposeCluster { .. } => "dispose_cluster",
            AdapterCall::SetHeatmap { .. } => "set_heatmap",
            AdapterCall::RemoveHeatmap { .. } => "remove_heatmap",
            AdapterCall::SetDrawingTools { .. } => "set_drawing_tools",
            AdapterCall::Subscribe { .. } => "on",
        }
    }

    /// Calls that change what the map shows or where it looks
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            AdapterCall::Initialize { .. } | AdapterCall::Destroy { .. } | AdapterCall::Subscribe { .. }
        )
    }
}

/// Runs after a call is recorded, outside every adapter lock
pub type CallHook = Arc<dyn Fn(&AdapterCall) + Send + Sync>;

#[derive(Default)]
struct RecorderState {
    calls: Vec<AdapterCall>,
    hook: Option<CallHook>,
    load: LoadBehavior,
    failing_overlays: FxHashSet<String>,
    failing_operations: FxHashSet<&'static str>,
    overlays: FxHashMap<u64, OverlayKey>,
    next_slot: u64,
    listeners: FxHashMap<u64, (CanonicalEventKind, EventCallback)>,
    next_listener: u64,
    next_map: NativeId,
}

impl RecorderState {
    fn allocate_slot(&mut self) -> u64 {
        self.next_slot += 1;
        self.next_slot
    }

    fn check(&self, provider: ProviderKind, operation: &'static str, overlay_id: Option<&str>) -> Result<()> {
        let overlay_fails = overlay_id.map_or(false, |id| self.failing_overlays.contains(id));
        if overlay_fails || self.failing_operations.contains(operation) {
            return Err(MapError::VendorRuntime {
                provider,
                operation,
                message: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

/// An in-memory [`ProviderAdapter`] that records every call
pub struct RecordingAdapter {
    kind: ProviderKind,
    capabilities: Capabilities,
    mode: DiagnosticsMode,
    inner: Arc<Mutex<RecorderState>>,
}

impl RecordingAdapter {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            capabilities: Capabilities::all(),
            mode: DiagnosticsMode::Development,
            inner: Arc::new(Mutex::new(RecorderState::default())),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_mode(mut self, mode: DiagnosticsMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_load(self, load: LoadBehavior) -> Self {
        self.set_load(load);
        self
    }

    /// Applies to the next `initialize`
    pub fn set_load(&self, load: LoadBehavior) {
        lock(&self.inner).load = load;
    }

    /// Makes every add/update/remove of overlays with `id` fail
    pub fn fail_overlay(&self, id: impl Into<String>) {
        lock(&self.inner).failing_overlays.insert(id.into());
    }

    /// Makes every call named `operation` (e.g. `"set_view"`) fail
    pub fn fail_operation(&self, operation: &'static str) {
        lock(&self.inner).failing_operations.insert(operation);
    }

    /// Calls `hook` with every recorded call once it is on the log. The hook
    /// may call back into the facade.
    pub fn on_call<F>(&self, hook: F)
    where
        F: Fn(&AdapterCall) + Send + Sync + 'static,
    {
        lock(&self.inner).hook = Some(Arc::new(hook));
    }

    pub fn clear_failures(&self) {
        let mut state = lock(&self.inner);
        state.failing_overlays.clear();
        state.failing_operations.clear();
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        lock(&self.inner).calls.clone()
    }

    pub fn mutations(&self) -> Vec<AdapterCall> {
        lock(&self.inner)
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    pub fn call_names(&self) -> Vec<&'static str> {
        lock(&self.inner).calls.iter().map(AdapterCall::name).collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.inner).calls.clear();
    }

    pub fn active_subscriptions(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    /// Delivers `event` to every callback subscribed to its kind, the way a
    /// vendor callback would
    pub fn emit(&self, event: CanonicalEvent) {
        let callbacks: Vec<EventCallback> = lock(&self.inner)
            .listeners
            .values()
            .filter(|(kind, _)| *kind == event.kind)
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(event.clone());
        }
    }

    /// Records `call` if the handle may be used. `Ok(false)` means the call
    /// is being ignored on a destroyed handle.
    fn record(&self, handle: &ProviderHandle, call: AdapterCall) -> Result<bool> {
        if !handle.ensure_live(self.mode, call.name())? {
            return Ok(false);
        }
        let hook = {
            let mut state = lock(&self.inner);
            state.calls.push(call.clone());
            state.hook.clone()
        };
        if let Some(hook) = hook {
            hook(&call);
        }
        Ok(true)
    }

    fn load_error(&self, reason: LoadFailure) -> MapError {
        MapError::ProviderLoad {
            provider: self.kind,
            reason,
        }
    }
}

#[async_trait]
impl ProviderAdapter for RecordingAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn initialize(
        &self,
        container: &MapContainer,
        options: &InitOptions,
    ) -> Result<ProviderHandle> {
        let load = {
            let mut state = lock(&self.inner);
            state.calls.push(AdapterCall::Initialize {
                container: container.element_id.clone(),
            });
            state.load.clone()
        };

        match tokio::time::timeout(options.load_timeout, load.run()).await {
            Err(_) => Err(self.load_error(LoadFailure::Timeout(options.load_timeout))),
            Ok(Err(message)) => Err(self.load_error(LoadFailure::Script(message))),
            Ok(Ok(())) => {
                let mut state = lock(&self.inner);
                state.next_map += 1;
                Ok(ProviderHandle::new(self.kind, NativeRef::Object(state.next_map)))
            }
        }
    }

    fn destroy(&self, handle: &ProviderHandle) {
        if !handle.is_live() {
            return;
        }
        handle.invalidate();
        let mut state = lock(&self.inner);
        state.calls.push(AdapterCall::Destroy {
            instance: handle.instance_id(),
        });
        state.overlays.clear();
    }

    fn set_view(&self, handle: &ProviderHandle, center: LatLng, zoom: f64) -> Result<()> {
        if !self.record(handle, AdapterCall::SetView { center, zoom })? {
            return Ok(());
        }
        lock(&self.inner).check(self.kind, "set_view", None)
    }

    fn fit_bounds(
        &self,
        handle: &ProviderHandle,
        bounds: &LatLngBounds,
        padding: f64,
    ) -> Result<()> {
        let call = AdapterCall::FitBounds {
            bounds: *bounds,
            padding,
        };
        if !self.record(handle, call)? {
            return Ok(());
        }
        lock(&self.inner).check(self.kind, "fit_bounds", None)
    }

    fn add_overlay(&self, handle: &ProviderHandle, overlay: &Overlay) -> Result<OverlayRef> {
        let key = overlay.key();
        if !self.record(handle, AdapterCall::AddOverlay { key: key.clone() })? {
            return Ok(OverlayRef::detached(overlay.kind()));
        }
        let mut state = lock(&self.inner);
        state.check(self.kind, "add_overlay", Some(&overlay.id))?;
        let slot = state.allocate_slot();
        state.overlays.insert(slot, key);
        Ok(handle.overlay_ref(slot, overlay.kind()))
    }

    fn update_overlay(
        &self,
        handle: &ProviderHandle,
        _overlay_ref: &OverlayRef,
        overlay: &Overlay,
    ) -> Result<()> {
        if !self.record(handle, AdapterCall::UpdateOverlay { key: overlay.key() })? {
            return Ok(());
        }
        lock(&self.inner).check(self.kind, "update_overlay", Some(&overlay.id))
    }

    fn remove_overlay(&self, handle: &ProviderHandle, overlay_ref: &OverlayRef) -> Result<()> {
        let key = lock(&self.inner)
            .overlays
            .get(&overlay_ref.slot())
            .cloned()
            .unwrap_or_else(|| OverlayKey::new(overlay_ref.kind(), ""));
        if !self.record(handle, AdapterCall::RemoveOverlay { key: key.clone() })? {
            return Ok(());
        }
        let mut state = lock(&self.inner);
        state.overlays.remove(&overlay_ref.slot());
        state.check(self.kind, "remove_overlay", Some(&key.id))
    }

    fn set_layer(&self, handle: &ProviderHandle, layer: &Layer) -> Result<()> {
        if !self.record(handle, AdapterCall::SetLayer { id: layer.id.clone() })? {
            return Ok(());
        }
        lock(&self.inner).check(self.kind, "set_layer", None)
    }

    fn remove_layer(&self, handle: &ProviderHandle, layer_id: &str) -> Result<()> {
        let call = AdapterCall::RemoveLayer {
            id: layer_id.to_string(),
        };
        if !self.record(handle, call)? {
            return Ok(());
        }
        lock(&self.inner).check(self.kind, "remove_layer", None)
    }

    fn create_cluster(
        &self,
        handle: &ProviderHandle,
        markers: &[OverlayRef],
        _options: &ClusterOptions,
    ) -> Result<ClusterRef> {
        let slot = lock(&self.inner).allocate_slot();
        let call = AdapterCall::CreateCluster {
            slot,
            members: markers.len(),
        };
        if !self.record(handle, call)? {
            return Ok(ClusterRef::detached());
        }
        lock(&self.inner).check(self.kind, "create_cluster", None)?;
        Ok(handle.cluster_ref(slot))
    }

    fn dispose_cluster(&self, handle: &ProviderHandle, cluster: &ClusterRef) -> Result<()> {
        if !self.record(handle, AdapterCall::DisposeCluster { slot: cluster.slot() })? {
            return Ok(());
        }
        lock(&self.inner).check(self.kind, "dispose_cluster", None)
    }

    fn set_heatmap(&self, handle: &ProviderHandle, heatmap: &Heatmap) -> Result<()> {
        let call = AdapterCall::SetHeatmap {
            id: heatmap.id.clone(),
            points: heatmap.points.len(),
        };
        if !self.record(handle, call)? {
            return Ok(());
        }
        lock(&self.inner).check(self.kind, "set_heatmap", None)
    }

    fn remove_heatmap(&self, handle: &ProviderHandle, heatmap_id: &str) -> Result<()> {
        let call = AdapterCall::RemoveHeatmap {
            id: heatmap_id.to_string(),
        };
        if !self.record(handle, call)? {
            return Ok(());
        }
        lock(&self.inner).check(self.kind, "remove_heatmap", None)
    }

    fn set_drawing_tools(
        &self,
        handle: &ProviderHandle,
        config: Option<&DrawingToolConfig>,
    ) -> Result<()> {
        let call = AdapterCall::SetDrawingTools {
            enabled: config.is_some(),
        };
        if !self.record(handle, call)? {
            return Ok(());
        }
        lock(&self.inner).check(self.kind, "set_drawing_tools", None)
    }

    fn on(
        &self,
        handle: &ProviderHandle,
        kind: CanonicalEventKind,
        callback: EventCallback,
    ) -> Result<Subscription> {
        if !self.record(handle, AdapterCall::Subscribe { kind })? {
            return Ok(Subscription::noop());
        }
        let id = {
            let mut state = lock(&self.inner);
            state.check(self.kind, "on", None)?;
            state.next_listener += 1;
            let id = state.next_listener;
            state.listeners.insert(id, (kind, callback));
            id
        };
        let inner = Arc::downgrade(&self.inner);
        Ok(Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                lock(&inner).listeners.remove(&id);
            }
        }))
    }
}

/// One call into a [`ScriptedSdk`]
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCall {
    Load { url: String },
    Construct { id: NativeId, class: String, args: Vec<Value> },
    Invoke { target: NativeId, method: String, args: Vec<Value> },
    Release { target: NativeId },
    Listen { target: NativeId, event: String },
    Unlisten { listener: ListenerId },
}

struct NativeListener {
    target: NativeId,
    event: String,
    callback: NativeCallback,
}

#[derive(Default)]
struct SdkState {
    calls: Vec<NativeCall>,
    load: LoadBehavior,
    loads: usize,
    objects: FxHashMap<NativeId, String>,
    next_object: NativeId,
    listeners: FxHashMap<ListenerId, NativeListener>,
    next_listener: ListenerId,
    failing: FxHashSet<String>,
}

/// An in-memory vendor object model.
///
/// Every construct hands out a fresh id; invoking a method on a released or
/// unknown id fails the way a call on a disposed JS object would. Method
/// calls return `null`.
#[derive(Default)]
pub struct ScriptedSdk {
    inner: Mutex<SdkState>,
}

impl ScriptedSdk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies to every following script load
    pub fn set_load(&self, load: LoadBehavior) {
        lock(&self.inner).load = load;
    }

    pub fn fail_load(&self, message: impl Into<String>) {
        self.set_load(LoadBehavior::Fail(message.into()));
    }

    /// Holds loads until the returned gate is notified
    pub fn gate_load(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.set_load(LoadBehavior::Gate(gate.clone()));
        gate
    }

    /// How many times a vendor script was requested
    pub fn load_count(&self) -> usize {
        lock(&self.inner).loads
    }

    /// Makes constructing a class or invoking a method with this name fail
    pub fn fail_method(&self, method: impl Into<String>) {
        lock(&self.inner).failing.insert(method.into());
    }

    pub fn clear_failures(&self) {
        lock(&self.inner).failing.clear();
    }

    pub fn calls(&self) -> Vec<NativeCall> {
        lock(&self.inner).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.inner).calls.clear();
    }

    /// Every invocation of `method`, in call order
    pub fn invocations(&self, method: &str) -> Vec<NativeCall> {
        lock(&self.inner)
            .calls
            .iter()
            .filter(|call| matches!(call, NativeCall::Invoke { method: m, .. } if m == method))
            .cloned()
            .collect()
    }

    /// Constructor arguments of every `class` object ever created
    pub fn constructions(&self, class: &str) -> Vec<Vec<Value>> {
        lock(&self.inner)
            .calls
            .iter()
            .filter_map(|call| match call {
                NativeCall::Construct { class: c, args, .. } if c == class => Some(args.clone()),
                _ => None,
            })
            .collect()
    }

    /// Live objects of `class`, oldest first
    pub fn objects_of_class(&self, class: &str) -> Vec<NativeId> {
        let mut ids: Vec<NativeId> = lock(&self.inner)
            .objects
            .iter()
            .filter(|(_, c)| c.as_str() == class)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_live(&self, id: NativeId) -> bool {
        lock(&self.inner).objects.contains_key(&id)
    }

    pub fn live_objects(&self) -> usize {
        lock(&self.inner).objects.len()
    }

    pub fn live_listeners(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    /// Fires a native event on `target`, returning how many listeners ran
    pub fn fire(&self, target: NativeId, event: &str, payload: Value) -> usize {
        let callbacks: Vec<NativeCallback> = {
            let state = lock(&self.inner);
            if !state.objects.contains_key(&target) {
                return 0;
            }
            state
                .listeners
                .values()
                .filter(|listener| listener.target == target && listener.event == event)
                .map(|listener| listener.callback.clone())
                .collect()
        };
        for callback in &callbacks {
            callback(&payload);
        }
        callbacks.len()
    }
}

impl VendorSdk for ScriptedSdk {
    fn load(&self, request: &ScriptRequest) -> BoxFuture<'static, SdkResult<()>> {
        let load = {
            let mut state = lock(&self.inner);
            state.loads += 1;
            state.calls.push(NativeCall::Load {
                url: request.url.clone(),
            });
            state.load.clone()
        };
        async move { load.run().await.map_err(SdkFault::ScriptUnavailable) }.boxed()
    }

    fn construct(&self, class: &str, args: Vec<Value>) -> SdkResult<NativeId> {
        let mut state = lock(&self.inner);
        if state.failing.contains(class) {
            return Err(SdkFault::Call {
                method: class.to_string(),
                message: "scripted failure".to_string(),
            });
        }
        state.next_object += 1;
        let id = state.next_object;
        state.objects.insert(id, class.to_string());
        state.calls.push(NativeCall::Construct {
            id,
            class: class.to_string(),
            args,
        });
        Ok(id)
    }

    fn invoke(&self, target: NativeId, method: &str, args: Vec<Value>) -> SdkResult<Value> {
        let mut state = lock(&self.inner);
        if !state.objects.contains_key(&target) {
            return Err(SdkFault::Released(target));
        }
        state.calls.push(NativeCall::Invoke {
            target,
            method: method.to_string(),
            args,
        });
        if state.failing.contains(method) {
            return Err(SdkFault::Call {
                method: method.to_string(),
                message: "scripted failure".to_string(),
            });
        }
        Ok(Value::Null)
    }

    fn release(&self, target: NativeId) {
        let mut state = lock(&self.inner);
        if state.objects.remove(&target).is_some() {
            state.calls.push(NativeCall::Release { target });
        }
    }

    fn listen(&self, target: NativeId, event: &str, callback: NativeCallback) -> SdkResult<ListenerId> {
        let mut state = lock(&self.inner);
        if !state.objects.contains_key(&target) {
            return Err(SdkFault::Released(target));
        }
        state.next_listener += 1;
        let id = state.next_listener;
        state.listeners.insert(
            id,
            NativeListener {
                target,
                event: event.to_string(),
                callback,
            },
        );
        state.calls.push(NativeCall::Listen {
            target,
            event: event.to_string(),
        });
        Ok(id)
    }

    fn unlisten(&self, listener: ListenerId) {
        let mut state = lock(&self.inner);
        if state.listeners.remove(&listener).is_some() {
            state.calls.push(NativeCall::Unlisten { listener });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_recording_adapter_ignores_destroyed_handle_in_production() {
        let adapter = RecordingAdapter::new(ProviderKind::Leaflet).with_mode(DiagnosticsMode::Production);
        let handle = adapter
            .initialize(&MapContainer::default(), &InitOptions::default())
            .await
            .unwrap();
        adapter.destroy(&handle);

        assert!(adapter.set_view(&handle, LatLng::new(1.0, 1.0), 3.0).is_ok());
        assert!(adapter.mutations().is_empty());
        assert_eq!(adapter.call_names(), vec!["initialize", "destroy"]);
    }

    #[tokio::test]
    async fn test_recording_adapter_load_failure() {
        let adapter = RecordingAdapter::new(ProviderKind::Amap).with_load(LoadBehavior::Fail("404".into()));
        let err = adapter
            .initialize(&MapContainer::default(), &InitOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_provider_load());
    }

    #[test]
    fn test_scripted_sdk_objects_and_listeners() {
        let sdk = ScriptedSdk::new();
        let map = sdk.construct("L.map", vec![]).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let listener = sdk
            .listen(
                map,
                "click",
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert_eq!(sdk.fire(map, "click", Value::Null), 1);
        assert_eq!(sdk.fire(map, "dblclick", Value::Null), 0);
        sdk.unlisten(listener);
        assert_eq!(sdk.fire(map, "click", Value::Null), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        sdk.release(map);
        assert_eq!(sdk.invoke(map, "setView", vec![]), Err(SdkFault::Released(map)));
        assert!(sdk.objects_of_class("L.map").is_empty());
    }
}
