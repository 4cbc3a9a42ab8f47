//! Which adapter serves which provider

use crate::{
    core::config::DiagnosticsMode,
    provider::{
        amap::AmapAdapter, baidu::BaiduAdapter, google::GoogleAdapter, leaflet::LeafletAdapter,
        loader::ScriptRegistry, mapbox::MapboxAdapter, sdk::VendorSdk, ProviderAdapter,
        ProviderKind,
    },
    MapError, Result,
};
use fxhash::FxHashMap;
use std::sync::Arc;

/// Adapters keyed by provider. Cheap to clone; adapters are shared.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: FxHashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All five vendor bindings over one SDK bridge, sharing the process-wide
    /// script registry
    pub fn with_sdk(sdk: Arc<dyn VendorSdk>, mode: DiagnosticsMode) -> Self {
        Self::with_sdk_and_scripts(sdk, mode, ScriptRegistry::global())
    }

    pub fn with_sdk_and_scripts(
        sdk: Arc<dyn VendorSdk>,
        mode: DiagnosticsMode,
        scripts: Arc<ScriptRegistry>,
    ) -> Self {
        Self::new()
            .with(Arc::new(LeafletAdapter::with_scripts(sdk.clone(), mode, scripts.clone())))
            .with(Arc::new(MapboxAdapter::with_scripts(sdk.clone(), mode, scripts.clone())))
            .with(Arc::new(GoogleAdapter::with_scripts(sdk.clone(), mode, scripts.clone())))
            .with(Arc::new(BaiduAdapter::with_scripts(sdk.clone(), mode, scripts.clone())))
            .with(Arc::new(AmapAdapter::with_scripts(sdk, mode, scripts)))
    }

    /// Registers `adapter` under its own kind, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) -> Option<Arc<dyn ProviderAdapter>> {
        let kind = adapter.kind();
        let previous = self.adapters.insert(kind, adapter);
        if previous.is_some() {
            log::debug!("replaced adapter for {}", kind);
        }
        previous
    }

    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| MapError::config(format!("no adapter registered for provider '{}'", kind)))
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    /// Registered providers in a stable order
    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self.adapters.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingAdapter, ScriptedSdk};

    #[test]
    fn test_missing_provider_is_config_error() {
        let registry = AdapterRegistry::new().with(Arc::new(RecordingAdapter::new(ProviderKind::Leaflet)));
        assert!(registry.get(ProviderKind::Leaflet).is_ok());

        let err = registry.get(ProviderKind::Baidu).err().unwrap();
        assert!(err.is_config_validation());
    }

    #[test]
    fn test_with_sdk_registers_every_vendor() {
        let sdk = Arc::new(ScriptedSdk::new());
        let registry = AdapterRegistry::with_sdk_and_scripts(sdk, DiagnosticsMode::Development, ScriptRegistry::new());
        assert_eq!(registry.kinds(), ProviderKind::ALL.to_vec());
        for kind in ProviderKind::ALL {
            assert_eq!(registry.get(kind).unwrap().kind(), kind);
        }
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = AdapterRegistry::new();
        assert!(registry.register(Arc::new(RecordingAdapter::new(ProviderKind::Google))).is_none());
        assert!(registry.register(Arc::new(RecordingAdapter::new(ProviderKind::Google))).is_some());
        assert_eq!(registry.kinds(), vec![ProviderKind::Google]);
    }
}
