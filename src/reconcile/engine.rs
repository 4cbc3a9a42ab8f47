//! Applies plans through a [`ProviderAdapter`] and tracks what is actually on
//! the map

use crate::{
    core::config::DiagnosticsMode,
    diagnostic,
    layers::{
        layer::Layer,
        overlay::{Overlay, OverlayKey, OverlayKind},
    },
    plugins::{cluster::ClusterSpec, draw::DrawingToolConfig, heatmap::Heatmap},
    provider::{ClusterRef, OverlayRef, ProviderAdapter, ProviderHandle},
    reconcile::{
        plan::{diff, Operation, Plan},
        snapshot::{MapSnapshot, ViewSpec},
    },
    MapError, Result,
};
use fxhash::FxHashMap;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Every operation attempted, in issue order
    pub operations: Vec<Operation>,
    /// Per-operation failures; none of them aborted the pass
    pub failures: Vec<MapError>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: ReconcileReport) {
        self.operations.extend(other.operations);
        self.failures.extend(other.failures);
    }

    pub fn operation_names(&self) -> Vec<&'static str> {
        self.operations.iter().map(Operation::name).collect()
    }
}

/// Working copy of the applied state while a plan runs
struct Applied {
    overlays: FxHashMap<OverlayKey, Overlay>,
    layers: FxHashMap<String, Layer>,
    cluster: Option<ClusterSpec>,
    heatmap: Option<Heatmap>,
    drawing: Option<DrawingToolConfig>,
    view: ViewSpec,
}

impl Applied {
    fn from_snapshot(snapshot: &MapSnapshot) -> Self {
        Self {
            overlays: snapshot
                .overlays
                .iter()
                .map(|overlay| (overlay.key(), overlay.clone()))
                .collect(),
            layers: snapshot
                .layers
                .iter()
                .map(|layer| (layer.id.clone(), layer.clone()))
                .collect(),
            cluster: snapshot.cluster.clone(),
            heatmap: snapshot.heatmap.clone(),
            drawing: snapshot.drawing.clone(),
            view: snapshot.view.clone(),
        }
    }

    /// Orders what survived like `next`
    fn into_snapshot(mut self, next: &MapSnapshot) -> MapSnapshot {
        let overlays = next
            .overlays
            .iter()
            .filter_map(|overlay| self.overlays.remove(&overlay.key()))
            .collect();
        let layers = next
            .layers
            .iter()
            .filter_map(|layer| self.layers.remove(&layer.id))
            .collect();
        MapSnapshot {
            view: self.view,
            overlays,
            layers,
            cluster: self.cluster,
            heatmap: self.heatmap,
            drawing: self.drawing,
        }
    }
}

/// Owns the last applied snapshot and the refs the adapter handed out for it.
///
/// One engine lives per mounted map. It never talks to the vendor except
/// through the adapter, and never retries: anything that failed shows up as
/// a difference again on the next pass.
pub struct ReconciliationEngine {
    applied: MapSnapshot,
    overlay_refs: FxHashMap<OverlayKey, OverlayRef>,
    cluster_refs: FxHashMap<String, ClusterRef>,
    mode: DiagnosticsMode,
}

impl ReconciliationEngine {
    /// `initial_view` is the camera the map was created with
    pub fn new(initial_view: ViewSpec, mode: DiagnosticsMode) -> Self {
        Self {
            applied: MapSnapshot::new(initial_view),
            overlay_refs: FxHashMap::default(),
            cluster_refs: FxHashMap::default(),
            mode,
        }
    }

    pub fn applied(&self) -> &MapSnapshot {
        &self.applied
    }

    pub fn overlay_ref(&self, key: &OverlayKey) -> Option<&OverlayRef> {
        self.overlay_refs.get(key)
    }

    pub fn plan(&self, next: &MapSnapshot) -> Plan {
        diff(&self.applied, next)
    }

    /// Diffs against the applied state and applies the result
    pub fn reconcile(
        &mut self,
        adapter: &dyn ProviderAdapter,
        handle: &ProviderHandle,
        next: &MapSnapshot,
    ) -> ReconcileReport {
        let plan = self.plan(next);
        self.apply(adapter, handle, plan, next)
    }

    /// Records a view the facade applied imperatively
    pub fn resync_view(&mut self, view: ViewSpec) {
        self.applied.view = view;
    }

    pub fn apply(
        &mut self,
        adapter: &dyn ProviderAdapter,
        handle: &ProviderHandle,
        plan: Plan,
        next: &MapSnapshot,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if plan.is_empty() {
            self.applied.view.min_zoom = next.view.min_zoom;
            self.applied.view.max_zoom = next.view.max_zoom;
            return report;
        }

        log::debug!(
            "reconciling {} operations on {} map {}",
            plan.len(),
            handle.provider(),
            handle.instance_id()
        );
        let mut applied = Applied::from_snapshot(&self.applied);
        let mut view_applied = false;

        for operation in plan {
            log::trace!("{}", operation);
            let result = self.execute(adapter, handle, &operation, &mut applied, next);
            if matches!(operation, Operation::SetView { .. } | Operation::FitBounds { .. }) {
                view_applied = true;
            }
            if let Err(error) = result {
                diagnostic!(self.mode, "{} failed: {}", operation, error);
                report.failures.push(error);
            }
            report.operations.push(operation);
        }

        if !view_applied {
            // Nothing to issue: either unchanged or shadowed by bounds
            applied.view = next.view.clone();
        }
        self.applied = applied.into_snapshot(next);
        report
    }

    fn execute(
        &mut self,
        adapter: &dyn ProviderAdapter,
        handle: &ProviderHandle,
        operation: &Operation,
        applied: &mut Applied,
        next: &MapSnapshot,
    ) -> Result<()> {
        match operation {
            Operation::DisposeCluster { id } => {
                applied.cluster = None;
                match self.cluster_refs.remove(id) {
                    Some(cluster) => adapter.dispose_cluster(handle, &cluster),
                    None => Ok(()),
                }
            }
            Operation::RemoveOverlay { key } => {
                // Dropped from the applied state even when the vendor fails
                applied.overlays.remove(key);
                match self.overlay_refs.remove(key) {
                    Some(overlay_ref) => adapter.remove_overlay(handle, &overlay_ref),
                    None => Ok(()),
                }
            }
            Operation::RemoveLayer { id } => {
                applied.layers.remove(id);
                adapter.remove_layer(handle, id)
            }
            Operation::RemoveHeatmap { id } => {
                applied.heatmap = None;
                adapter.remove_heatmap(handle, id)
            }
            Operation::DisableDrawing => {
                applied.drawing = None;
                adapter.set_drawing_tools(handle, None)
            }
            Operation::AddOverlay { overlay } => {
                let overlay_ref = adapter.add_overlay(handle, overlay)?;
                self.overlay_refs.insert(overlay.key(), overlay_ref);
                applied.overlays.insert(overlay.key(), overlay.clone());
                Ok(())
            }
            Operation::AddLayer { layer } | Operation::UpdateLayer { layer } => {
                adapter.set_layer(handle, layer)?;
                applied.layers.insert(layer.id.clone(), layer.clone());
                Ok(())
            }
            Operation::AddHeatmap { heatmap } | Operation::UpdateHeatmap { heatmap } => {
                adapter.set_heatmap(handle, heatmap)?;
                applied.heatmap = Some(heatmap.clone());
                Ok(())
            }
            Operation::EnableDrawing { config } | Operation::UpdateDrawing { config } => {
                adapter.set_drawing_tools(handle, Some(config))?;
                applied.drawing = Some(config.clone());
                Ok(())
            }
            Operation::CreateCluster { cluster } => {
                let mut members = Vec::with_capacity(cluster.members.len());
                let mut refs = Vec::with_capacity(cluster.members.len());
                for id in &cluster.members {
                    let key = OverlayKey::new(OverlayKind::Marker, id.clone());
                    if let Some(overlay_ref) = self.overlay_refs.get(&key) {
                        members.push(id.clone());
                        refs.push(overlay_ref.clone());
                    }
                }
                let cluster_ref = adapter.create_cluster(handle, &refs, &cluster.options)?;
                self.cluster_refs.insert(cluster.id.clone(), cluster_ref);
                applied.cluster = Some(ClusterSpec {
                    members,
                    ..cluster.clone()
                });
                Ok(())
            }
            Operation::UpdateOverlay { next: overlay, .. } => {
                let key = overlay.key();
                match self.overlay_refs.get(&key) {
                    Some(overlay_ref) => {
                        adapter.update_overlay(handle, overlay_ref, overlay)?;
                    }
                    None => {
                        log::debug!("{} has no ref; adding instead of updating", key);
                        let overlay_ref = adapter.add_overlay(handle, overlay)?;
                        self.overlay_refs.insert(key.clone(), overlay_ref);
                    }
                }
                applied.overlays.insert(key, overlay.clone());
                Ok(())
            }
            Operation::SetView { center, zoom } => {
                adapter.set_view(handle, *center, *zoom)?;
                applied.view = next.view.clone();
                Ok(())
            }
            Operation::FitBounds { bounds, padding } => {
                adapter.fit_bounds(handle, bounds, *padding)?;
                applied.view = next.view.clone();
                Ok(())
            }
        }
    }
}
