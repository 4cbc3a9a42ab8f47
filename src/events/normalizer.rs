use crate::{
    events::{
        canonical::{CanonicalEventKind, MapEvent},
        dispatcher::EventDispatcher,
    },
    provider::{Capabilities, EventCallback, ProviderAdapter, ProviderHandle, Subscription},
    reconcile::snapshot::MapSnapshot,
    Result,
};
use fxhash::FxHashMap;
use std::sync::Arc;

/// Keeps exactly one vendor subscription per wanted canonical kind and funnels
/// every translated event into the dispatcher queue.
pub struct EventNormalizer {
    subscriptions: FxHashMap<CanonicalEventKind, Subscription>,
    sink: EventCallback,
}

impl EventNormalizer {
    pub fn new(dispatcher: Arc<EventDispatcher>) -> Self {
        let sink: EventCallback = Arc::new(move |event| {
            dispatcher.emit(MapEvent::Canonical(event));
        });
        Self {
            subscriptions: FxHashMap::default(),
            sink,
        }
    }

    /// Map kinds always; marker kinds only while there are markers to listen on
    pub fn wanted_for(snapshot: &MapSnapshot, capabilities: Capabilities) -> Vec<CanonicalEventKind> {
        let mut wanted = CanonicalEventKind::MAP_KINDS.to_vec();
        if capabilities.markers && snapshot.has_markers() {
            wanted.extend(CanonicalEventKind::MARKER_KINDS);
        }
        wanted
    }

    /// Drops subscriptions no longer wanted and adds the missing ones
    pub fn sync(
        &mut self,
        adapter: &dyn ProviderAdapter,
        handle: &ProviderHandle,
        wanted: &[CanonicalEventKind],
    ) -> Result<()> {
        self.subscriptions.retain(|kind, _| {
            let keep = wanted.contains(kind);
            if !keep {
                log::trace!("dropping {} subscription", kind);
            }
            keep
        });

        for kind in wanted {
            if self.subscriptions.contains_key(kind) {
                continue;
            }
            let subscription = adapter.on(handle, *kind, self.sink.clone())?;
            self.subscriptions.insert(*kind, subscription);
        }
        Ok(())
    }

    pub fn active_kinds(&self) -> Vec<CanonicalEventKind> {
        let mut kinds: Vec<CanonicalEventKind> = self.subscriptions.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Detaches everything
    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}
