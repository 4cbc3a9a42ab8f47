//! Generic [`ProviderAdapter`] over the [`VendorSdk`] bridge
//!
//! Everything vendors share lives here: handle bookkeeping, datum conversion
//! at the boundary, load timeout, capability gating, overlay slot tracking
//! and marker event fan-out. What differs per vendor (class names, argument
//! shapes, event names) is a [`Dialect`], one module per vendor.

use crate::{
    coords,
    core::{
        config::{DiagnosticsMode, MapContainer},
        geo::{LatLng, LatLngBounds, Point},
    },
    diagnostic,
    events::canonical::{CanonicalEvent, CanonicalEventKind},
    layers::{
        layer::{Layer, LayerSource},
        overlay::{Overlay, OverlayKind},
    },
    lock,
    plugins::{cluster::ClusterOptions, draw::DrawingToolConfig, heatmap::Heatmap},
    provider::{
        handle::{ClusterRef, OverlayRef, ProviderHandle},
        loader::ScriptRegistry,
        misuse,
        sdk::{ListenerId, NativeCallback, NativeId, NativeRef, ScriptRequest, SdkFault, SdkResult, VendorSdk},
        Capabilities, EventCallback, InitOptions, ProviderAdapter, ProviderKind, Subscription,
    },
    LoadFailure, MapError, Result,
};
use async_trait::async_trait;
use fxhash::FxHashMap;
use serde_json::{Map, Value};
use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
};

/// How the vendor applied an overlay update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The native object was patched
    InPlace,
    /// The vendor cannot patch this change; the adapter builds a new object
    /// and swaps it in behind the same ref
    Replace,
}

/// Per-vendor vocabulary. All coordinates handed to a dialect are already in
/// the vendor's datum.
pub trait Dialect: Send + Sync + 'static {
    const KIND: ProviderKind;

    /// Payload key holding the event position
    const POSITION_KEY: &'static str;

    /// Payload key holding the container pixel
    const PIXEL_KEY: &'static str;

    fn capabilities() -> Capabilities;

    fn requires_api_key() -> bool;

    fn script(api_key: Option<&str>) -> ScriptRequest;

    fn create_map(
        sdk: &dyn VendorSdk,
        container: &MapContainer,
        center: LatLng,
        options: &InitOptions,
    ) -> SdkResult<NativeId>;

    fn destroy_map(sdk: &dyn VendorSdk, map: NativeId);

    fn set_view(sdk: &dyn VendorSdk, map: NativeId, center: LatLng, zoom: f64) -> SdkResult<()>;

    fn fit_bounds(
        sdk: &dyn VendorSdk,
        map: NativeId,
        bounds: &LatLngBounds,
        padding: f64,
    ) -> SdkResult<()>;

    fn add_overlay(sdk: &dyn VendorSdk, map: NativeId, overlay: &Overlay) -> SdkResult<NativeRef>;

    fn update_overlay(
        sdk: &dyn VendorSdk,
        map: NativeId,
        native: &NativeRef,
        previous: &Overlay,
        next: &Overlay,
    ) -> SdkResult<UpdateOutcome>;

    fn remove_overlay(sdk: &dyn VendorSdk, map: NativeId, native: &NativeRef) -> SdkResult<()>;

    /// Adds the layer, or updates `existing` with the same id
    fn set_layer(
        sdk: &dyn VendorSdk,
        map: NativeId,
        existing: Option<&NativeRef>,
        layer: &Layer,
    ) -> SdkResult<NativeRef>;

    fn remove_layer(sdk: &dyn VendorSdk, map: NativeId, native: &NativeRef) -> SdkResult<()>;

    /// Native event name for a canonical kind
    fn native_event(kind: CanonicalEventKind) -> &'static str;

    /// Cluster option names (camelCase) the vendor clusterer understands
    fn supported_cluster_options() -> &'static [&'static str] {
        &[]
    }

    fn create_cluster(
        _sdk: &dyn VendorSdk,
        _map: NativeId,
        _members: &[NativeRef],
        _options: &Map<String, Value>,
    ) -> SdkResult<NativeRef> {
        Err(SdkFault::Unsupported("clustering".to_string()))
    }

    /// Dissolves the cluster, putting its members back on the map
    fn dispose_cluster(
        _sdk: &dyn VendorSdk,
        _map: NativeId,
        _cluster: &NativeRef,
        _members: &[NativeRef],
    ) -> SdkResult<()> {
        Err(SdkFault::Unsupported("clustering".to_string()))
    }

    /// Moves a rebuilt marker into the cluster its predecessor belonged to
    fn swap_cluster_member(
        _sdk: &dyn VendorSdk,
        _map: NativeId,
        _cluster: &NativeRef,
        _old: &NativeRef,
        _new: &NativeRef,
    ) -> SdkResult<()> {
        Err(SdkFault::Unsupported("clustering".to_string()))
    }

    fn set_heatmap(
        _sdk: &dyn VendorSdk,
        _map: NativeId,
        _existing: Option<&NativeRef>,
        _heatmap: &Heatmap,
    ) -> SdkResult<NativeRef> {
        Err(SdkFault::Unsupported("heatmap".to_string()))
    }

    fn remove_heatmap(_sdk: &dyn VendorSdk, _map: NativeId, _native: &NativeRef) -> SdkResult<()> {
        Err(SdkFault::Unsupported("heatmap".to_string()))
    }

    /// Replaces the drawing control; `None` only removes `existing`
    fn set_drawing_tools(
        _sdk: &dyn VendorSdk,
        _map: NativeId,
        _existing: Option<&NativeRef>,
        _config: Option<&DrawingToolConfig>,
    ) -> SdkResult<Option<NativeRef>> {
        Err(SdkFault::Unsupported("drawing tools".to_string()))
    }

    /// Attaches a listener to a single overlay
    fn listen_overlay(
        sdk: &dyn VendorSdk,
        _map: NativeId,
        native: &NativeRef,
        event: &str,
        callback: NativeCallback,
    ) -> SdkResult<ListenerId> {
        match native {
            NativeRef::Object(id) => sdk.listen(*id, event, callback),
            NativeRef::Named(name) => Err(SdkFault::Unsupported(format!(
                "listening on named resource {}",
                name
            ))),
        }
    }

    /// Builds the canonical event from a vendor payload. Positions stay in the
    /// vendor datum; the adapter converts them.
    fn translate(kind: CanonicalEventKind, payload: &Value) -> CanonicalEvent {
        let mut event = CanonicalEvent::new(kind).with_raw(payload.clone());
        let position = payload
            .get(Self::POSITION_KEY)
            .and_then(read_lat_lng)
            .or_else(|| payload.get("center").and_then(read_lat_lng));
        if let Some(position) = position {
            event = event.with_position(position);
        }
        if let Some(pixel) = payload.get(Self::PIXEL_KEY).and_then(read_point) {
            event = event.with_pixel(pixel);
        }
        if let Some(zoom) = payload.get("zoom").and_then(Value::as_f64) {
            event = event.with_zoom(zoom);
        }
        event
    }
}

/// Reads `{lat, lng}` objects and `[lng, lat]` arrays
pub fn read_lat_lng(value: &Value) -> Option<LatLng> {
    match value {
        Value::Object(fields) => Some(LatLng::new(
            fields.get("lat")?.as_f64()?,
            fields.get("lng")?.as_f64()?,
        )),
        Value::Array(items) if items.len() >= 2 => {
            Some(LatLng::new(items[1].as_f64()?, items[0].as_f64()?))
        }
        _ => None,
    }
}

pub fn read_point(value: &Value) -> Option<Point> {
    match value {
        Value::Object(fields) => Some(Point::new(fields.get("x")?.as_f64()?, fields.get("y")?.as_f64()?)),
        Value::Array(items) if items.len() >= 2 => {
            Some(Point::new(items[0].as_f64()?, items[1].as_f64()?))
        }
        _ => None,
    }
}

struct OverlaySlot {
    id: String,
    kind: OverlayKind,
    native: NativeRef,
    /// Vendor-datum copy of what is on the map
    content: Overlay,
    /// (subscription, native listener)
    listeners: Vec<(u64, ListenerId)>,
}

struct ClusterSlot {
    native: NativeRef,
    members: Vec<u64>,
}

struct MarkerSubscription {
    kind: CanonicalEventKind,
    callback: EventCallback,
}

/// Vendor-side state of one mounted map
struct Instance {
    map: NativeId,
    next_slot: u64,
    overlays: FxHashMap<u64, OverlaySlot>,
    layers: FxHashMap<String, NativeRef>,
    clusters: FxHashMap<u64, ClusterSlot>,
    heatmaps: FxHashMap<String, NativeRef>,
    drawing: Option<NativeRef>,
    map_listeners: FxHashMap<u64, ListenerId>,
    marker_subscriptions: FxHashMap<u64, MarkerSubscription>,
}

impl Instance {
    fn new(map: NativeId) -> Self {
        Self {
            map,
            next_slot: 1,
            overlays: FxHashMap::default(),
            layers: FxHashMap::default(),
            clusters: FxHashMap::default(),
            heatmaps: FxHashMap::default(),
            drawing: None,
            map_listeners: FxHashMap::default(),
            marker_subscriptions: FxHashMap::default(),
        }
    }

    fn allocate_slot(&mut self) -> u64 {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }
}

type Instances = Mutex<FxHashMap<u64, Instance>>;

/// A vendor binding: the shared adapter machinery specialised by a dialect
pub struct SdkAdapter<D: Dialect> {
    sdk: Arc<dyn VendorSdk>,
    scripts: Arc<ScriptRegistry>,
    mode: DiagnosticsMode,
    instances: Arc<Instances>,
    next_subscription: Arc<AtomicU64>,
    dialect: PhantomData<fn() -> D>,
}

impl<D: Dialect> SdkAdapter<D> {
    pub fn new(sdk: Arc<dyn VendorSdk>, mode: DiagnosticsMode) -> Self {
        Self::with_scripts(sdk, mode, ScriptRegistry::global())
    }

    /// Uses a private script registry instead of the process-wide one
    pub fn with_scripts(
        sdk: Arc<dyn VendorSdk>,
        mode: DiagnosticsMode,
        scripts: Arc<ScriptRegistry>,
    ) -> Self {
        Self {
            sdk,
            scripts,
            mode,
            instances: Arc::new(Mutex::new(FxHashMap::default())),
            next_subscription: Arc::new(AtomicU64::new(1)),
            dialect: PhantomData,
        }
    }

    /// Number of maps currently alive on this adapter
    pub fn live_instances(&self) -> usize {
        lock(&self.instances).len()
    }

    fn to_native(point: LatLng) -> LatLng {
        coords::from_wgs84(D::KIND, point)
    }

    fn vendor_error(operation: &'static str) -> impl Fn(SdkFault) -> MapError {
        move |fault| MapError::VendorRuntime {
            provider: D::KIND,
            operation,
            message: fault.to_string(),
        }
    }

    fn unsupported(&self, what: &str) {
        diagnostic!(self.mode, "{} does not support {}; ignoring", D::KIND, what);
    }

    /// Runs `f` against the live instance behind `handle`, or returns
    /// `default` when misuse is being ignored
    fn with_instance<T, F>(
        &self,
        handle: &ProviderHandle,
        operation: &'static str,
        default: T,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(&dyn VendorSdk, &mut Instance) -> Result<T>,
    {
        if !handle.ensure_live(self.mode, operation)? {
            return Ok(default);
        }
        if handle.provider() != D::KIND {
            misuse(
                self.mode,
                format!("{} handle passed to the {} adapter", handle.provider(), D::KIND),
            )?;
            return Ok(default);
        }

        let mut instances = lock(&self.instances);
        match instances.get_mut(&handle.instance_id()) {
            Some(instance) => f(self.sdk.as_ref(), instance),
            None => {
                misuse(
                    self.mode,
                    format!("{} called on an unknown {} map", operation, D::KIND),
                )?;
                Ok(default)
            }
        }
    }

    fn check_ref(&self, handle: &ProviderHandle, overlay_ref: &OverlayRef, operation: &str) -> Result<bool> {
        if overlay_ref.belongs_to(handle) {
            return Ok(true);
        }
        misuse(
            self.mode,
            format!("{} with a ref from another map", operation),
        )?;
        Ok(false)
    }

    fn supports_overlay(&self, kind: OverlayKind) -> bool {
        let capabilities = D::capabilities();
        match kind {
            OverlayKind::Marker => capabilities.markers,
            _ => capabilities.overlays,
        }
    }

    fn subscription(&self, instance_id: u64, subscription_id: u64) -> Subscription {
        let instances: Weak<Instances> = Arc::downgrade(&self.instances);
        let sdk = self.sdk.clone();
        Subscription::new(move || {
            let Some(instances) = instances.upgrade() else {
                return;
            };
            let mut instances = lock(&instances);
            let Some(instance) = instances.get_mut(&instance_id) else {
                return;
            };
            if let Some(listener) = instance.map_listeners.remove(&subscription_id) {
                sdk.unlisten(listener);
            }
            if instance
                .marker_subscriptions
                .remove(&subscription_id)
                .is_some()
            {
                for slot in instance.overlays.values_mut() {
                    slot.listeners.retain(|(owner, listener)| {
                        if *owner == subscription_id {
                            sdk.unlisten(*listener);
                            false
                        } else {
                            true
                        }
                    });
                }
            }
        })
    }
}

/// Event with its position converted back to WGS-84
fn canonical<D: Dialect>(kind: CanonicalEventKind, payload: &Value) -> CanonicalEvent {
    let mut event = D::translate(kind, payload);
    if let Some(position) = event.position() {
        let wgs84 = coords::to_wgs84(D::KIND, position);
        event.lat = Some(wgs84.lat);
        event.lng = Some(wgs84.lng);
    }
    event
}

fn attach_marker_listener<D: Dialect>(
    sdk: &dyn VendorSdk,
    map: NativeId,
    slot: &mut OverlaySlot,
    subscription_id: u64,
    subscription: &MarkerSubscription,
) {
    let kind = subscription.kind;
    let callback = subscription.callback.clone();
    let overlay_id = slot.id.clone();
    let native_callback: NativeCallback = Arc::new(move |payload: &Value| {
        callback(canonical::<D>(kind, payload).with_overlay(overlay_id.clone()));
    });

    match D::listen_overlay(sdk, map, &slot.native, D::native_event(kind), native_callback) {
        Ok(listener) => slot.listeners.push((subscription_id, listener)),
        Err(fault) => log::warn!(
            "{}: could not attach {} to marker '{}': {}",
            D::KIND,
            kind,
            slot.id,
            fault
        ),
    }
}

fn release(sdk: &dyn VendorSdk, native: &NativeRef) {
    if let Some(id) = native.object_id() {
        sdk.release(id);
    }
}

#[async_trait]
impl<D: Dialect> ProviderAdapter for SdkAdapter<D> {
    fn kind(&self) -> ProviderKind {
        D::KIND
    }

    fn capabilities(&self) -> Capabilities {
        D::capabilities()
    }

    async fn initialize(
        &self,
        container: &MapContainer,
        options: &InitOptions,
    ) -> Result<ProviderHandle> {
        let load_error = |reason: LoadFailure| MapError::ProviderLoad {
            provider: D::KIND,
            reason,
        };

        if D::requires_api_key() && !options.has_api_key() {
            return Err(load_error(LoadFailure::MissingApiKey));
        }

        let request = D::script(options.api_key.as_deref());
        let sdk = self.sdk.clone();
        let load = self.scripts.load(D::KIND, move || sdk.load(&request));

        match tokio::time::timeout(options.load_timeout, load).await {
            Err(_) => {
                log::warn!(
                    "{} script did not load within {:?}",
                    D::KIND,
                    options.load_timeout
                );
                return Err(load_error(LoadFailure::Timeout(options.load_timeout)));
            }
            Ok(Err(failure)) => return Err(load_error(failure)),
            Ok(Ok(())) => {}
        }

        let center = Self::to_native(options.center);
        let map = D::create_map(self.sdk.as_ref(), container, center, options)
            .map_err(|fault| load_error(LoadFailure::Script(fault.to_string())))?;

        let handle = ProviderHandle::new(D::KIND, NativeRef::Object(map));
        lock(&self.instances).insert(handle.instance_id(), Instance::new(map));
        log::info!(
            "{} map {} ready in #{}",
            D::KIND,
            handle.instance_id(),
            container.element_id
        );
        Ok(handle)
    }

    fn destroy(&self, handle: &ProviderHandle) {
        handle.invalidate();
        let Some(instance) = lock(&self.instances).remove(&handle.instance_id()) else {
            return;
        };
        let sdk = self.sdk.as_ref();

        for listener in instance.map_listeners.values() {
            sdk.unlisten(*listener);
        }
        for slot in instance.overlays.values() {
            for (_, listener) in &slot.listeners {
                sdk.unlisten(*listener);
            }
            release(sdk, &slot.native);
        }
        for cluster in instance.clusters.values() {
            release(sdk, &cluster.native);
        }
        for native in instance
            .layers
            .values()
            .chain(instance.heatmaps.values())
            .chain(instance.drawing.iter())
        {
            release(sdk, native);
        }
        D::destroy_map(sdk, instance.map);
        log::debug!("{} map {} destroyed", D::KIND, handle.instance_id());
    }

    fn set_view(&self, handle: &ProviderHandle, center: LatLng, zoom: f64) -> Result<()> {
        let center = Self::to_native(center);
        self.with_instance(handle, "set_view", (), |sdk, instance| {
            D::set_view(sdk, instance.map, center, zoom).map_err(Self::vendor_error("set_view"))
        })
    }

    fn fit_bounds(
        &self,
        handle: &ProviderHandle,
        bounds: &LatLngBounds,
        padding: f64,
    ) -> Result<()> {
        let bounds = bounds.map_corners(Self::to_native);
        self.with_instance(handle, "fit_bounds", (), |sdk, instance| {
            D::fit_bounds(sdk, instance.map, &bounds, padding)
                .map_err(Self::vendor_error("fit_bounds"))
        })
    }

    fn add_overlay(&self, handle: &ProviderHandle, overlay: &Overlay) -> Result<OverlayRef> {
        let kind = overlay.kind();
        if !self.supports_overlay(kind) {
            self.unsupported(&format!("{} overlays", kind));
            return Ok(OverlayRef::detached(kind));
        }

        let content = overlay.map_coords(Self::to_native);
        self.with_instance(handle, "add_overlay", OverlayRef::detached(kind), |sdk, instance| {
            let native = D::add_overlay(sdk, instance.map, &content)
                .map_err(Self::vendor_error("add_overlay"))?;

            let slot_id = instance.allocate_slot();
            let mut slot = OverlaySlot {
                id: overlay.id.clone(),
                kind,
                native,
                content,
                listeners: Vec::new(),
            };
            if kind == OverlayKind::Marker {
                for (subscription_id, subscription) in &instance.marker_subscriptions {
                    attach_marker_listener::<D>(sdk, instance.map, &mut slot, *subscription_id, subscription);
                }
            }
            instance.overlays.insert(slot_id, slot);
            Ok(handle.overlay_ref(slot_id, kind))
        })
    }

    fn update_overlay(
        &self,
        handle: &ProviderHandle,
        overlay_ref: &OverlayRef,
        overlay: &Overlay,
    ) -> Result<()> {
        if !self.check_ref(handle, overlay_ref, "update_overlay")? {
            return Ok(());
        }
        let next = overlay.map_coords(Self::to_native);

        self.with_instance(handle, "update_overlay", (), |sdk, instance| {
            let map = instance.map;
            let Instance {
                overlays,
                clusters,
                marker_subscriptions,
                ..
            } = instance;

            let Some(slot) = overlays.get_mut(&overlay_ref.slot()) else {
                return misuse(self.mode, format!("update_overlay on removed overlay '{}'", overlay.id));
            };
            if slot.kind != next.kind() {
                return Err(MapError::InvalidState(format!(
                    "cannot turn {} '{}' into a {}",
                    slot.kind,
                    slot.id,
                    next.kind()
                )));
            }

            let outcome = D::update_overlay(sdk, map, &slot.native, &slot.content, &next)
                .map_err(Self::vendor_error("update_overlay"))?;

            if outcome == UpdateOutcome::Replace {
                let fresh = D::add_overlay(sdk, map, &next)
                    .map_err(Self::vendor_error("update_overlay"))?;

                for cluster in clusters
                    .values()
                    .filter(|cluster| cluster.members.contains(&overlay_ref.slot()))
                {
                    if let Err(fault) =
                        D::swap_cluster_member(sdk, map, &cluster.native, &slot.native, &fresh)
                    {
                        log::warn!("{}: could not re-cluster '{}': {}", D::KIND, slot.id, fault);
                    }
                }

                for (_, listener) in slot.listeners.drain(..) {
                    sdk.unlisten(listener);
                }
                let stale = std::mem::replace(&mut slot.native, fresh);
                if let Err(fault) = D::remove_overlay(sdk, map, &stale) {
                    log::debug!("{}: removing replaced '{}' failed: {}", D::KIND, slot.id, fault);
                }
                release(sdk, &stale);

                if slot.kind == OverlayKind::Marker {
                    for (subscription_id, subscription) in marker_subscriptions.iter() {
                        attach_marker_listener::<D>(sdk, map, slot, *subscription_id, subscription);
                    }
                }
            }

            slot.content = next;
            Ok(())
        })
    }

    fn remove_overlay(&self, handle: &ProviderHandle, overlay_ref: &OverlayRef) -> Result<()> {
        if !self.check_ref(handle, overlay_ref, "remove_overlay")? {
            return Ok(());
        }
        self.with_instance(handle, "remove_overlay", (), |sdk, instance| {
            let Some(slot) = instance.overlays.remove(&overlay_ref.slot()) else {
                return Ok(());
            };
            for (_, listener) in &slot.listeners {
                sdk.unlisten(*listener);
            }
            for cluster in instance.clusters.values_mut() {
                cluster.members.retain(|member| *member != overlay_ref.slot());
            }
            let removed = D::remove_overlay(sdk, instance.map, &slot.native)
                .map_err(Self::vendor_error("remove_overlay"));
            release(sdk, &slot.native);
            removed
        })
    }

    fn set_layer(&self, handle: &ProviderHandle, layer: &Layer) -> Result<()> {
        let capabilities = D::capabilities();
        let supported = match layer.source {
            LayerSource::UrlTemplate(_) => capabilities.tiles,
            LayerSource::Style(_) => capabilities.vector_styles,
        };
        if !supported {
            self.unsupported(&format!("layer source of '{}'", layer.id));
            return Ok(());
        }

        self.with_instance(handle, "set_layer", (), |sdk, instance| {
            let previous = instance.layers.remove(&layer.id);
            match D::set_layer(sdk, instance.map, previous.as_ref(), layer) {
                Ok(native) => {
                    if let Some(previous) =
                        previous.filter(|previous| previous.object_id() != native.object_id())
                    {
                        release(sdk, &previous);
                    }
                    instance.layers.insert(layer.id.clone(), native);
                    Ok(())
                }
                Err(fault) => {
                    // Nothing stays tracked under the id; the next pass adds it afresh
                    if let Some(previous) = previous {
                        if let Err(cleanup) = D::remove_layer(sdk, instance.map, &previous) {
                            log::debug!("dropping layer '{}' after failed update: {}", layer.id, cleanup);
                        }
                        release(sdk, &previous);
                    }
                    Err(Self::vendor_error("set_layer")(fault))
                }
            }
        })
    }

    fn remove_layer(&self, handle: &ProviderHandle, layer_id: &str) -> Result<()> {
        self.with_instance(handle, "remove_layer", (), |sdk, instance| {
            let Some(native) = instance.layers.remove(layer_id) else {
                return Ok(());
            };
            let removed = D::remove_layer(sdk, instance.map, &native)
                .map_err(Self::vendor_error("remove_layer"));
            release(sdk, &native);
            removed
        })
    }

    fn create_cluster(
        &self,
        handle: &ProviderHandle,
        markers: &[OverlayRef],
        options: &ClusterOptions,
    ) -> Result<ClusterRef> {
        if !D::capabilities().clustering {
            self.unsupported("marker clustering");
            return Ok(ClusterRef::detached());
        }

        let supported = D::supported_cluster_options();
        for field in options.set_fields() {
            if !supported.contains(&field.as_str()) && !options.vendor.contains_key(&field) {
                self.unsupported(&format!("cluster option '{}'", field));
            }
        }
        let vendor_options = options.to_json_filtered(supported);

        self.with_instance(handle, "create_cluster", ClusterRef::detached(), |sdk, instance| {
            let mut members = Vec::with_capacity(markers.len());
            let mut natives = Vec::with_capacity(markers.len());
            for marker in markers.iter().filter(|marker| marker.belongs_to(handle)) {
                if let Some(slot) = instance.overlays.get(&marker.slot()) {
                    members.push(marker.slot());
                    natives.push(slot.native.clone());
                }
            }

            let native = D::create_cluster(sdk, instance.map, &natives, &vendor_options)
                .map_err(Self::vendor_error("create_cluster"))?;
            let slot = instance.allocate_slot();
            instance.clusters.insert(slot, ClusterSlot { native, members });
            Ok(handle.cluster_ref(slot))
        })
    }

    fn dispose_cluster(&self, handle: &ProviderHandle, cluster: &ClusterRef) -> Result<()> {
        if !cluster.belongs_to(handle) {
            // Ignored create_cluster calls hand out detached refs
            return Ok(());
        }
        self.with_instance(handle, "dispose_cluster", (), |sdk, instance| {
            let Some(slot) = instance.clusters.remove(&cluster.slot()) else {
                return Ok(());
            };
            let members: Vec<NativeRef> = slot
                .members
                .iter()
                .filter_map(|member| instance.overlays.get(member))
                .map(|overlay| overlay.native.clone())
                .collect();
            let disposed = D::dispose_cluster(sdk, instance.map, &slot.native, &members)
                .map_err(Self::vendor_error("dispose_cluster"));
            release(sdk, &slot.native);
            disposed
        })
    }

    fn set_heatmap(&self, handle: &ProviderHandle, heatmap: &Heatmap) -> Result<()> {
        if !D::capabilities().heatmap {
            self.unsupported("heatmaps");
            return Ok(());
        }

        let mut native_heatmap = heatmap.clone();
        for point in &mut native_heatmap.points {
            let native = Self::to_native(point.position());
            point.lat = native.lat;
            point.lng = native.lng;
        }

        self.with_instance(handle, "set_heatmap", (), |sdk, instance| {
            let native = D::set_heatmap(
                sdk,
                instance.map,
                instance.heatmaps.get(&heatmap.id),
                &native_heatmap,
            )
            .map_err(Self::vendor_error("set_heatmap"))?;
            instance.heatmaps.insert(heatmap.id.clone(), native);
            Ok(())
        })
    }

    fn remove_heatmap(&self, handle: &ProviderHandle, heatmap_id: &str) -> Result<()> {
        self.with_instance(handle, "remove_heatmap", (), |sdk, instance| {
            let Some(native) = instance.heatmaps.remove(heatmap_id) else {
                return Ok(());
            };
            let removed = D::remove_heatmap(sdk, instance.map, &native)
                .map_err(Self::vendor_error("remove_heatmap"));
            release(sdk, &native);
            removed
        })
    }

    fn set_drawing_tools(
        &self,
        handle: &ProviderHandle,
        config: Option<&DrawingToolConfig>,
    ) -> Result<()> {
        if !D::capabilities().drawing {
            if config.is_some() {
                self.unsupported("drawing tools");
            }
            return Ok(());
        }

        self.with_instance(handle, "set_drawing_tools", (), |sdk, instance| {
            let previous = instance.drawing.take();
            let next = D::set_drawing_tools(sdk, instance.map, previous.as_ref(), config)
                .map_err(Self::vendor_error("set_drawing_tools"))?;
            if let Some(previous) = previous {
                release(sdk, &previous);
            }
            instance.drawing = next;
            Ok(())
        })
    }

    fn on(
        &self,
        handle: &ProviderHandle,
        kind: CanonicalEventKind,
        callback: EventCallback,
    ) -> Result<Subscription> {
        if kind.is_marker_kind() && !D::capabilities().markers {
            self.unsupported("marker events");
            return Ok(Subscription::noop());
        }

        let subscription_id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let registered = self.with_instance(handle, "on", false, |sdk, instance| {
            if kind.is_marker_kind() {
                let subscription = MarkerSubscription { kind, callback };
                let map = instance.map;
                for slot in instance
                    .overlays
                    .values_mut()
                    .filter(|slot| slot.kind == OverlayKind::Marker)
                {
                    attach_marker_listener::<D>(sdk, map, slot, subscription_id, &subscription);
                }
                instance
                    .marker_subscriptions
                    .insert(subscription_id, subscription);
            } else {
                let native_callback: NativeCallback = Arc::new(move |payload: &Value| {
                    callback(canonical::<D>(kind, payload));
                });
                let listener = sdk
                    .listen(instance.map, D::native_event(kind), native_callback)
                    .map_err(Self::vendor_error("on"))?;
                instance.map_listeners.insert(subscription_id, listener);
            }
            Ok(true)
        })?;

        if registered {
            Ok(self.subscription(handle.instance_id(), subscription_id))
        } else {
            Ok(Subscription::noop())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_read_lat_lng_shapes() {
        assert_eq!(
            read_lat_lng(&json!({"lat": 1.5, "lng": 2.5})),
            Some(LatLng::new(1.5, 2.5))
        );
        // arrays are lng-first, as in GeoJSON
        assert_eq!(read_lat_lng(&json!([116.4, 39.9])), Some(LatLng::new(39.9, 116.4)));
        assert_eq!(read_lat_lng(&json!("nope")), None);
        assert_eq!(read_point(&json!({"x": 3, "y": 4})), Some(Point::new(3.0, 4.0)));
    }
}
