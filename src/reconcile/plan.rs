//! Pure snapshot diffing
//!
//! [`diff`] compares two snapshots and returns the operations that turn the
//! first into the second: removals first (in the order of the previous
//! snapshot), then additions, then updates (both in the order of the next
//! snapshot), then at most one view operation.

use crate::{
    core::geo::{LatLng, LatLngBounds},
    layers::{
        layer::Layer,
        overlay::{Overlay, OverlayKey, OverlayKind},
    },
    plugins::{cluster::ClusterSpec, draw::DrawingToolConfig, heatmap::Heatmap},
    reconcile::snapshot::MapSnapshot,
};
use fxhash::{FxHashMap, FxHashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Removal,
    Addition,
    Update,
    View,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    DisposeCluster { id: String },
    RemoveOverlay { key: OverlayKey },
    RemoveLayer { id: String },
    RemoveHeatmap { id: String },
    DisableDrawing,

    AddOverlay { overlay: Overlay },
    AddLayer { layer: Layer },
    AddHeatmap { heatmap: Heatmap },
    EnableDrawing { config: DrawingToolConfig },
    /// Issued after every overlay addition so new members exist
    CreateCluster { cluster: ClusterSpec },

    UpdateOverlay { previous: Overlay, next: Overlay },
    UpdateLayer { layer: Layer },
    UpdateHeatmap { heatmap: Heatmap },
    UpdateDrawing { config: DrawingToolConfig },

    SetView { center: LatLng, zoom: f64 },
    FitBounds { bounds: LatLngBounds, padding: f64 },
}

impl Operation {
    pub fn phase(&self) -> Phase {
        match self {
            Operation::DisposeCluster { .. }
            | Operation::RemoveOverlay { .. }
            | Operation::RemoveLayer { .. }
            | Operation::RemoveHeatmap { .. }
            | Operation::DisableDrawing => Phase::Removal,
            Operation::AddOverlay { .. }
            | Operation::AddLayer { .. }
            | Operation::AddHeatmap { .. }
            | Operation::EnableDrawing { .. }
            | Operation::CreateCluster { .. } => Phase::Addition,
            Operation::UpdateOverlay { .. }
            | Operation::UpdateLayer { .. }
            | Operation::UpdateHeatmap { .. }
            | Operation::UpdateDrawing { .. } => Phase::Update,
            Operation::SetView { .. } | Operation::FitBounds { .. } => Phase::View,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::DisposeCluster { .. } => "dispose_cluster",
            Operation::RemoveOverlay { .. } => "remove_overlay",
            Operation::RemoveLayer { .. } => "remove_layer",
            Operation::RemoveHeatmap { .. } => "remove_heatmap",
            Operation::DisableDrawing => "disable_drawing",
            Operation::AddOverlay { .. } => "add_overlay",
            Operation::AddLayer { .. } => "add_layer",
            Operation::AddHeatmap { .. } => "add_heatmap",
            Operation::EnableDrawing { .. } => "enable_drawing",
            Operation::CreateCluster { .. } => "create_cluster",
            Operation::UpdateOverlay { .. } => "update_overlay",
            Operation::UpdateLayer { .. } => "update_layer",
            Operation::UpdateHeatmap { .. } => "update_heatmap",
            Operation::UpdateDrawing { .. } => "update_drawing",
            Operation::SetView { .. } => "set_view",
            Operation::FitBounds { .. } => "fit_bounds",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::RemoveOverlay { key } => write!(f, "remove_overlay({})", key),
            Operation::AddOverlay { overlay } => write!(f, "add_overlay({})", overlay.key()),
            Operation::UpdateOverlay { next, .. } => write!(f, "update_overlay({})", next.key()),
            Operation::DisposeCluster { id } | Operation::RemoveLayer { id } | Operation::RemoveHeatmap { id } => {
                write!(f, "{}({})", self.name(), id)
            }
            Operation::AddLayer { layer } | Operation::UpdateLayer { layer } => {
                write!(f, "{}({})", self.name(), layer.id)
            }
            Operation::AddHeatmap { heatmap } | Operation::UpdateHeatmap { heatmap } => {
                write!(f, "{}({})", self.name(), heatmap.id)
            }
            Operation::CreateCluster { cluster } => {
                write!(f, "create_cluster({}, {} members)", cluster.id, cluster.members.len())
            }
            _ => f.write_str(self.name()),
        }
    }
}

/// Ordered operations produced by [`diff`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    operations: Vec<Operation>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.operations.iter()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn count(&self, phase: Phase) -> usize {
        self.operations
            .iter()
            .filter(|operation| operation.phase() == phase)
            .count()
    }

    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }
}

impl IntoIterator for Plan {
    type Item = Operation;
    type IntoIter = std::vec::IntoIter<Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.into_iter()
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

/// Computes the operations taking the map from `prev` to `next`.
/// `diff(s, s)` is always empty.
pub fn diff(prev: &MapSnapshot, next: &MapSnapshot) -> Plan {
    let mut removals = Vec::new();
    let mut additions = Vec::new();
    let mut updates = Vec::new();

    let prev_overlays: FxHashMap<OverlayKey, &Overlay> =
        prev.overlays.iter().map(|o| (o.key(), o)).collect();
    let next_overlays: FxHashMap<OverlayKey, &Overlay> =
        next.overlays.iter().map(|o| (o.key(), o)).collect();

    // The cluster goes first so its members are released before removal
    let changed_members: FxHashSet<&str> = next
        .overlays
        .iter()
        .filter(|overlay| overlay.kind() == OverlayKind::Marker)
        .filter(|overlay| {
            prev_overlays
                .get(&overlay.key())
                .map_or(false, |previous| **previous != **overlay)
        })
        .map(|overlay| overlay.id.as_str())
        .collect();
    let recreate_cluster = match (&prev.cluster, &next.cluster) {
        (Some(old), Some(new)) => {
            old != new || new.members.iter().any(|id| changed_members.contains(id.as_str()))
        }
        _ => false,
    };
    if let Some(old) = &prev.cluster {
        if next.cluster.is_none() || recreate_cluster {
            removals.push(Operation::DisposeCluster { id: old.id.clone() });
        }
    }

    for overlay in &prev.overlays {
        let key = overlay.key();
        if !next_overlays.contains_key(&key) {
            removals.push(Operation::RemoveOverlay { key });
        }
    }
    for overlay in &next.overlays {
        match prev_overlays.get(&overlay.key()) {
            None => additions.push(Operation::AddOverlay {
                overlay: overlay.clone(),
            }),
            Some(previous) if *previous != overlay => updates.push(Operation::UpdateOverlay {
                previous: (*previous).clone(),
                next: overlay.clone(),
            }),
            Some(_) => {}
        }
    }

    let prev_layers: FxHashMap<&str, &Layer> =
        prev.layers.iter().map(|l| (l.id.as_str(), l)).collect();
    let next_layers: FxHashSet<&str> = next.layers.iter().map(|l| l.id.as_str()).collect();
    for layer in &prev.layers {
        if !next_layers.contains(layer.id.as_str()) {
            removals.push(Operation::RemoveLayer {
                id: layer.id.clone(),
            });
        }
    }
    for layer in &next.layers {
        match prev_layers.get(layer.id.as_str()) {
            None => additions.push(Operation::AddLayer {
                layer: layer.clone(),
            }),
            Some(previous) if *previous != layer => updates.push(Operation::UpdateLayer {
                layer: layer.clone(),
            }),
            Some(_) => {}
        }
    }

    match (&prev.heatmap, &next.heatmap) {
        (Some(old), Some(new)) if old.id == new.id => {
            if old != new {
                updates.push(Operation::UpdateHeatmap {
                    heatmap: new.clone(),
                });
            }
        }
        (old, new) => {
            if let Some(old) = old {
                removals.push(Operation::RemoveHeatmap { id: old.id.clone() });
            }
            if let Some(new) = new {
                additions.push(Operation::AddHeatmap {
                    heatmap: new.clone(),
                });
            }
        }
    }

    match (&prev.drawing, &next.drawing) {
        (Some(_), None) => removals.push(Operation::DisableDrawing),
        (None, Some(config)) => additions.push(Operation::EnableDrawing {
            config: config.clone(),
        }),
        (Some(old), Some(new)) if old != new => updates.push(Operation::UpdateDrawing {
            config: new.clone(),
        }),
        _ => {}
    }

    if let Some(new) = &next.cluster {
        if prev.cluster.is_none() || recreate_cluster {
            additions.push(Operation::CreateCluster {
                cluster: new.clone(),
            });
        }
    }

    let mut operations = removals;
    operations.extend(additions);
    operations.extend(updates);
    operations.extend(diff_view(prev, next));
    Plan { operations }
}

fn diff_view(prev: &MapSnapshot, next: &MapSnapshot) -> Option<Operation> {
    let (old, new) = (&prev.view, &next.view);
    match new.bounds {
        Some(bounds) => (old.bounds != Some(bounds) || old.padding != new.padding).then(|| {
            Operation::FitBounds {
                bounds,
                padding: new.padding,
            }
        }),
        None => (old.bounds.is_some() || old.center != new.center || old.zoom != new.zoom).then(
            || Operation::SetView {
                center: new.center,
                zoom: new.zoom,
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        plugins::cluster::{ClusterConfig, ClusterOptions},
        reconcile::snapshot::ViewSpec,
    };

    fn marker(id: &str, lat: f64) -> Overlay {
        Overlay::marker(id, LatLng::new(lat, 0.0))
    }

    fn names(plan: &Plan) -> Vec<String> {
        plan.iter().map(|op| op.to_string()).collect()
    }

    #[test]
    fn test_identical_snapshots_diff_to_nothing() {
        let snapshot = MapSnapshot::default()
            .with_overlays(vec![marker("a", 1.0), Overlay::circle("c", LatLng::new(0.0, 0.0), 5.0)])
            .with_layers(vec![Layer::tiles("base", "https://t/{z}/{x}/{y}.png")])
            .with_heatmap(Heatmap::new(Vec::new()));
        assert!(diff(&snapshot, &snapshot).is_empty());
    }

    #[test]
    fn test_swap_one_marker() {
        let prev = MapSnapshot::default().with_overlays(vec![marker("A", 1.0), marker("B", 2.0)]);
        let next = MapSnapshot::default().with_overlays(vec![marker("B", 2.0), marker("C", 3.0)]);
        assert_eq!(names(&diff(&prev, &next)), vec!["remove_overlay(marker:A)", "add_overlay(marker:C)"]);
    }

    #[test]
    fn test_id_reused_across_kinds_is_remove_and_add() {
        let prev = MapSnapshot::default().with_overlays(vec![marker("x", 1.0)]);
        let next = MapSnapshot::default()
            .with_overlays(vec![Overlay::circle("x", LatLng::new(1.0, 0.0), 10.0)]);
        let plan = diff(&prev, &next);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.count(Phase::Removal), 1);
        assert_eq!(plan.count(Phase::Addition), 1);
    }

    #[test]
    fn test_phase_order() {
        let prev = MapSnapshot::default().with_overlays(vec![marker("a", 1.0), marker("b", 2.0)]);
        let next = MapSnapshot::default()
            .with_view(ViewSpec::new(LatLng::new(5.0, 5.0), 4.0))
            .with_overlays(vec![marker("b", 9.0), marker("c", 3.0)]);
        let phases: Vec<Phase> = diff(&prev, &next).iter().map(Operation::phase).collect();
        assert_eq!(phases, vec![Phase::Removal, Phase::Addition, Phase::Update, Phase::View]);
    }

    #[test]
    fn test_center_only_change_is_one_set_view() {
        let prev = MapSnapshot::default().with_overlays(vec![marker("a", 1.0)]);
        let mut next = prev.clone();
        next.view.center = LatLng::new(10.0, 20.0);
        let plan = diff(&prev, &next);
        assert_eq!(
            plan.operations(),
            &[Operation::SetView {
                center: LatLng::new(10.0, 20.0),
                zoom: prev.view.zoom
            }]
        );
    }

    #[test]
    fn test_bounds_take_precedence() {
        let bounds = LatLngBounds::from_coords(0.0, 0.0, 1.0, 1.0);
        let prev = MapSnapshot::default();
        let next = MapSnapshot::default()
            .with_view(ViewSpec::new(LatLng::new(0.5, 0.5), 9.0).with_bounds(bounds, 20.0));
        assert_eq!(
            diff(&prev, &next).operations(),
            &[Operation::FitBounds {
                bounds,
                padding: 20.0
            }]
        );

        // dropping bounds falls back to center/zoom
        let back = diff(&next, &prev);
        assert!(matches!(back.operations(), [Operation::SetView { .. }]));
    }

    #[test]
    fn test_cluster_recreated_when_member_changes() {
        let config = ClusterConfig::new(ClusterOptions::default());
        let prev = MapSnapshot::default()
            .with_overlays(vec![marker("a", 1.0), marker("b", 2.0)])
            .with_cluster(ClusterSpec::from_config(&config, vec!["a".into(), "b".into()]));
        let mut next = prev.clone();
        next.overlays[0] = marker("a", 1.5);

        let plan = diff(&prev, &next);
        assert_eq!(
            names(&plan),
            vec![
                "dispose_cluster(markers)",
                "create_cluster(markers, 2 members)",
                "update_overlay(marker:a)"
            ]
        );

        // an unrelated circle change leaves the cluster alone
        let mut unrelated = prev.clone();
        unrelated.overlays.push(Overlay::circle("a", LatLng::new(0.0, 0.0), 3.0));
        let plan = diff(&prev, &unrelated);
        assert_eq!(plan.len(), 1);
        assert!(matches!(&plan.operations()[0], Operation::AddOverlay { overlay } if overlay.kind() == OverlayKind::Circle));
    }

    #[test]
    fn test_heatmap_and_drawing() {
        let prev = MapSnapshot::default().with_drawing(DrawingToolConfig::default());
        let next = MapSnapshot::default().with_heatmap(Heatmap::new(Vec::new()));
        assert_eq!(names(&diff(&prev, &next)), vec!["disable_drawing", "add_heatmap(heatmap)"]);
    }
}
