//! Opaque handles scoping everything an adapter creates for one map
//!
//! A [`ProviderHandle`] owns the scope; overlay and cluster refs only hold a
//! weak back-reference to it. Invalidating the handle on destroy makes every
//! ref it issued stale at once.

use crate::{
    core::config::DiagnosticsMode,
    layers::overlay::OverlayKind,
    provider::{misuse, sdk::NativeRef, ProviderKind},
    Result,
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

struct HandleScope {
    provider: ProviderKind,
    instance_id: u64,
    native: NativeRef,
    live: AtomicBool,
}

/// The value `initialize` resolves to. Deliberately not `Clone`: the
/// lifecycle manager owns it and lends it out by reference.
pub struct ProviderHandle {
    scope: Arc<HandleScope>,
}

impl ProviderHandle {
    pub fn new(provider: ProviderKind, native: NativeRef) -> Self {
        Self {
            scope: Arc::new(HandleScope {
                provider,
                instance_id: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
                native,
                live: AtomicBool::new(true),
            }),
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.scope.provider
    }

    /// Process-unique id of this map instance
    pub fn instance_id(&self) -> u64 {
        self.scope.instance_id
    }

    /// Vendor object behind the map
    pub fn native(&self) -> &NativeRef {
        &self.scope.native
    }

    pub fn is_live(&self) -> bool {
        self.scope.live.load(Ordering::Acquire)
    }

    /// `Ok(true)` when the handle may be used, `Ok(false)` when a destroyed
    /// handle is being silently ignored, `Err` in development mode.
    pub fn ensure_live(&self, mode: DiagnosticsMode, operation: &str) -> Result<bool> {
        if self.is_live() {
            return Ok(true);
        }
        misuse(
            mode,
            format!("{} called on a destroyed {} map", operation, self.provider()),
        )?;
        Ok(false)
    }

    pub fn overlay_ref(&self, slot: u64, kind: OverlayKind) -> OverlayRef {
        OverlayRef {
            slot,
            kind,
            scope: Arc::downgrade(&self.scope),
        }
    }

    pub fn cluster_ref(&self, slot: u64) -> ClusterRef {
        ClusterRef {
            slot,
            scope: Arc::downgrade(&self.scope),
        }
    }

    pub fn downgrade(&self) -> WeakHandle {
        WeakHandle {
            scope: Arc::downgrade(&self.scope),
        }
    }

    /// Second owner of the same scope, used while a reconciliation pass runs
    /// outside the facade lock
    pub(crate) fn share(&self) -> ProviderHandle {
        ProviderHandle {
            scope: self.scope.clone(),
        }
    }

    pub(crate) fn invalidate(&self) {
        self.scope.live.store(false, Ordering::Release);
    }

    fn owns(&self, scope: &Weak<HandleScope>) -> bool {
        std::ptr::eq(Weak::as_ptr(scope), Arc::as_ptr(&self.scope))
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("provider", &self.provider())
            .field("instance_id", &self.instance_id())
            .field("live", &self.is_live())
            .finish()
    }
}

/// Escape hatch to the vendor object. Does not keep the map alive.
#[derive(Clone)]
pub struct WeakHandle {
    scope: Weak<HandleScope>,
}

impl WeakHandle {
    pub fn is_alive(&self) -> bool {
        self.scope
            .upgrade()
            .map_or(false, |scope| scope.live.load(Ordering::Acquire))
    }

    /// The vendor map object, if the map has not been destroyed
    pub fn native(&self) -> Option<NativeRef> {
        self.scope
            .upgrade()
            .filter(|scope| scope.live.load(Ordering::Acquire))
            .map(|scope| scope.native.clone())
    }

    pub fn provider(&self) -> Option<ProviderKind> {
        self.scope.upgrade().map(|scope| scope.provider)
    }
}

impl fmt::Debug for WeakHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Identifies one overlay created by an adapter
#[derive(Clone)]
pub struct OverlayRef {
    slot: u64,
    kind: OverlayKind,
    scope: Weak<HandleScope>,
}

impl OverlayRef {
    /// Ref that belongs to no map, returned by ignored calls
    pub fn detached(kind: OverlayKind) -> Self {
        Self {
            slot: 0,
            kind,
            scope: Weak::new(),
        }
    }

    pub fn slot(&self) -> u64 {
        self.slot
    }

    pub fn kind(&self) -> OverlayKind {
        self.kind
    }

    pub fn is_valid(&self) -> bool {
        self.scope
            .upgrade()
            .map_or(false, |scope| scope.live.load(Ordering::Acquire))
    }

    pub fn belongs_to(&self, handle: &ProviderHandle) -> bool {
        handle.owns(&self.scope)
    }
}

impl fmt::Debug for OverlayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayRef")
            .field("slot", &self.slot)
            .field("kind", &self.kind)
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[derive(Clone)]
pub struct ClusterRef {
    slot: u64,
    scope: Weak<HandleScope>,
}

impl ClusterRef {
    pub fn detached() -> Self {
        Self {
            slot: 0,
            scope: Weak::new(),
        }
    }

    pub fn slot(&self) -> u64 {
        self.slot
    }

    pub fn is_valid(&self) -> bool {
        self.scope
            .upgrade()
            .map_or(false, |scope| scope.live.load(Ordering::Acquire))
    }

    pub fn belongs_to(&self, handle: &ProviderHandle) -> bool {
        handle.owns(&self.scope)
    }
}

impl fmt::Debug for ClusterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterRef")
            .field("slot", &self.slot)
            .field("valid", &self.is_valid())
            .finish()
    }
}
