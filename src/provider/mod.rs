//! The uniform contract every vendor binding satisfies
//!
//! [`ProviderAdapter`] is the only seam between the engine and a vendor. The
//! five shipped bindings are [`adapter::SdkAdapter`] instantiated with one
//! [`adapter::Dialect`] per vendor; tests plug in
//! [`crate::testing::RecordingAdapter`] instead.

pub mod adapter;
pub mod amap;
pub mod baidu;
pub mod google;
pub mod handle;
pub mod leaflet;
pub mod loader;
pub mod mapbox;
pub mod registry;
pub mod sdk;

pub use handle::{ClusterRef, OverlayRef, ProviderHandle, WeakHandle};

use crate::{
    core::{
        config::{DiagnosticsMode, MapContainer},
        constants::{DEFAULT_LOAD_TIMEOUT, DEFAULT_MAX_ZOOM, DEFAULT_MIN_ZOOM, DEFAULT_ZOOM},
        geo::{LatLng, LatLngBounds},
    },
    events::canonical::{CanonicalEvent, CanonicalEventKind},
    layers::{layer::Layer, overlay::Overlay},
    plugins::{cluster::ClusterOptions, draw::DrawingToolConfig, heatmap::Heatmap},
    MapError, Result,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Leaflet,
    Mapbox,
    Google,
    Baidu,
    Amap,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Leaflet,
        ProviderKind::Mapbox,
        ProviderKind::Google,
        ProviderKind::Baidu,
        ProviderKind::Amap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Leaflet => "leaflet",
            ProviderKind::Mapbox => "mapbox",
            ProviderKind::Google => "google",
            ProviderKind::Baidu => "baidu",
            ProviderKind::Amap => "amap",
        }
    }
}

impl Default for ProviderKind {
    fn default() -> Self {
        ProviderKind::Leaflet
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| MapError::config(format!("unknown provider '{}'", s)))
    }
}

/// What a vendor binding can do. Requests outside the set are no-ops with a
/// development warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Raster tile layers from URL templates
    pub tiles: bool,
    /// Vendor style descriptors as layers
    pub vector_styles: bool,
    pub markers: bool,
    /// Polygons, polylines, circles and rectangles
    pub overlays: bool,
    pub clustering: bool,
    pub heatmap: bool,
    pub drawing: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            tiles: true,
            vector_styles: true,
            markers: true,
            overlays: true,
            clustering: true,
            heatmap: true,
            drawing: true,
        }
    }
}

/// Everything `initialize` needs besides the container
#[derive(Debug, Clone, PartialEq)]
pub struct InitOptions {
    pub api_key: Option<String>,
    /// WGS-84
    pub center: LatLng,
    pub zoom: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub load_timeout: Duration,
}

impl InitOptions {
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().map_or(false, |key| !key.trim().is_empty())
    }
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            center: LatLng::default(),
            zoom: DEFAULT_ZOOM,
            min_zoom: DEFAULT_MIN_ZOOM,
            max_zoom: DEFAULT_MAX_ZOOM,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }
}

/// Receives translated events from an adapter
pub type EventCallback = Arc<dyn Fn(CanonicalEvent) + Send + Sync>;

/// Detaches an event registration when dropped or unsubscribed
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to detach
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Handles misuse of an adapter outside its handle's lifetime: an error in
/// development, a logged no-op in production.
pub fn misuse(mode: DiagnosticsMode, message: impl Into<String>) -> Result<()> {
    let message = message.into();
    if mode.is_development() {
        Err(MapError::InvalidState(message))
    } else {
        log::debug!("ignoring call outside handle lifetime: {}", message);
        Ok(())
    }
}

/// Uniform contract over a vendor SDK.
///
/// Coordinates crossing this trait are WGS-84; conversion to the vendor datum
/// is the implementation's business. Mutating methods are only valid between
/// `initialize` resolving and `destroy`.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn capabilities(&self) -> Capabilities;

    /// Loads the vendor script (shared per process) and creates the map.
    /// Fails with [`MapError::ProviderLoad`] on a missing key, script error
    /// or when `options.load_timeout` elapses.
    async fn initialize(
        &self,
        container: &MapContainer,
        options: &InitOptions,
    ) -> Result<ProviderHandle>;

    /// Tears the map down. Idempotent; vendor errors are swallowed.
    fn destroy(&self, handle: &ProviderHandle);

    fn set_view(&self, handle: &ProviderHandle, center: LatLng, zoom: f64) -> Result<()>;

    fn fit_bounds(&self, handle: &ProviderHandle, bounds: &LatLngBounds, padding: f64)
        -> Result<()>;

    fn add_overlay(&self, handle: &ProviderHandle, overlay: &Overlay) -> Result<OverlayRef>;

    /// Replaces an overlay's content. The ref stays valid even when the
    /// vendor has to rebuild the native object.
    fn update_overlay(
        &self,
        handle: &ProviderHandle,
        overlay_ref: &OverlayRef,
        overlay: &Overlay,
    ) -> Result<()>;

    fn remove_overlay(&self, handle: &ProviderHandle, overlay_ref: &OverlayRef) -> Result<()>;

    /// Adds the layer, or updates it in place when its id is already present
    fn set_layer(&self, handle: &ProviderHandle, layer: &Layer) -> Result<()>;

    fn remove_layer(&self, handle: &ProviderHandle, layer_id: &str) -> Result<()>;

    fn create_cluster(
        &self,
        handle: &ProviderHandle,
        markers: &[OverlayRef],
        options: &ClusterOptions,
    ) -> Result<ClusterRef>;

    fn dispose_cluster(&self, handle: &ProviderHandle, cluster: &ClusterRef) -> Result<()>;

    /// Adds or replaces the heatmap with `heatmap.id`
    fn set_heatmap(&self, handle: &ProviderHandle, heatmap: &Heatmap) -> Result<()>;

    fn remove_heatmap(&self, handle: &ProviderHandle, heatmap_id: &str) -> Result<()>;

    /// `None` removes the drawing control
    fn set_drawing_tools(
        &self,
        handle: &ProviderHandle,
        config: Option<&DrawingToolConfig>,
    ) -> Result<()>;

    /// Subscribes `callback` to one canonical kind. Marker kinds cover every
    /// marker present now or added later.
    fn on(
        &self,
        handle: &ProviderHandle,
        kind: CanonicalEventKind,
        callback: EventCallback,
    ) -> Result<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_provider_names() {
        assert_eq!("Baidu".parse::<ProviderKind>().unwrap(), ProviderKind::Baidu);
        assert_eq!(ProviderKind::Amap.to_string(), "amap");
        let err = "bing".parse::<ProviderKind>().unwrap_err();
        assert!(err.is_config_validation());
    }

    #[test]
    fn test_subscription_detaches_once() {
        let detached = Arc::new(AtomicUsize::new(0));
        let counter = detached.clone();
        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        subscription.unsubscribe();
        assert_eq!(detached.load(Ordering::SeqCst), 1);

        let counter = detached.clone();
        drop(Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(detached.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_misuse_depends_on_mode() {
        assert!(misuse(DiagnosticsMode::Development, "late").unwrap_err().is_invalid_state());
        assert!(misuse(DiagnosticsMode::Production, "late").is_ok());
    }
}
