use bevy::math::Affine3A;
use bevy::prelude::*;

use crate::commands::{CommandHistory, EditorCommand, SetTransform, SpawnSnapshot, push_batch};
use crate::config::EditorConfig;
use crate::entity_ops::clone_subtree;
use crate::gizmos::{GizmoAxis, GizmoMode, GizmoState, GizmoUpdateSet};
use crate::proxy::ProxyRegistry;
use crate::selectable::Selectable;
use crate::selection::Selection;
use crate::snapping::SnapSettings;
use crate::viewport::{PickView, PointerState};

/// How high above / below a move target the terrain probe ray reaches.
pub(crate) const TERRAIN_PROBE_SPAN: f32 = 10_000.0;
/// Movement below this never materializes a pending clone.
const CLONE_DEADZONE: f32 = 1e-4;

pub struct TransformDragPlugin;

#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransformDragSet;

impl Plugin for TransformDragPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<TransformDragState>()
            .add_message::<CloneCompleted>()
            .add_message::<TerrainHeightReadout>()
            .add_systems(
                Update,
                drive_transform_drag
                    .in_set(TransformDragSet)
                    .after(GizmoUpdateSet),
            );
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Broadcast when a clone-drag materializes its copies.
#[derive(Message)]
pub struct CloneCompleted {
    pub sources: Vec<Entity>,
    pub clones: Vec<Entity>,
}

/// Terrain height sampled under the gesture, for the status-bar readout.
#[derive(Message)]
pub struct TerrainHeightReadout {
    pub point: Vec3,
}

// ---------------------------------------------------------------------------
// Gesture state
// ---------------------------------------------------------------------------

/// Pivot for multi-object rotate/scale.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum PivotMode {
    /// Each object turns around its own bounds center.
    #[default]
    ObjectCenter,
    /// The whole selection turns around its shared bounds center.
    CommonCenter,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum CloneState {
    #[default]
    None,
    /// Copy-modifier was held at gesture start; clones appear on first
    /// actual movement.
    NeedsClone,
    Done,
}

/// Per-object context captured once at gesture start.
pub struct ObjectSnapshot {
    pub target: Selectable,
    /// Local transform at gesture start.
    pub original: Transform,
    /// Inverse of the parent frame's world placement, for mapping world
    /// deltas into the local frame.
    pub parent_inverse: Affine3A,
    /// World placement at gesture start.
    pub world: Affine3A,
    /// Own pivot (bounds center) in the local frame.
    pub local_center: Vec3,
    /// The selection's common pivot mapped into the local frame.
    pub common_center_local: Vec3,
    /// Snapshots retargeted at a materialized clone skip the transform
    /// command on apply; the spawn snapshot already carries their state.
    pub is_clone: bool,
}

pub struct ActiveTransform {
    pub mode: GizmoMode,
    pub axis: GizmoAxis,
    pub snapshots: Vec<ObjectSnapshot>,
    pub clone: CloneState,
    pub clone_sources: Vec<Entity>,
    pub clones: Vec<Entity>,
    pub start_cursor: Vec2,
    /// Gesture anchor on the unprojection plane.
    pub start_world: Vec3,
    /// Normal of the plane pointer positions unproject onto.
    pub plane_normal: Vec3,
    /// Screen directions of the three gizmo axes, captured at gesture start.
    pub axis_screen: [Option<Vec2>; 3],
    pub last_delta: Vec3,
}

#[derive(Resource, Default)]
pub struct TransformDragState {
    pub active: Option<ActiveTransform>,
    pub pivot: PivotMode,
}

// ---------------------------------------------------------------------------
// Gesture engine
// ---------------------------------------------------------------------------

/// Start a gesture over the current selection. Objects that don't support the
/// active mode, are locked, or whose transform is derived from another
/// selected object are left out. Returns false when nothing remains.
pub fn begin_transform(
    world: &mut World,
    view: &PickView,
    cursor: Vec2,
    axis: GizmoAxis,
    clone_requested: bool,
) -> bool {
    let mode = world.resource::<GizmoState>().mode;
    if mode == GizmoMode::Disabled {
        return false;
    }
    let rotation = world.resource::<GizmoState>().rotation;

    let items: Vec<Selectable> = world.resource::<Selection>().items().to_vec();
    if items.is_empty() {
        return false;
    }

    // Drop unsupported, locked, and derived members.
    let eligible: Vec<Selectable> = items
        .iter()
        .copied()
        .filter(|item| item.exists(world) && item.supports(mode) && !item.is_locked(world))
        .filter(|item| {
            !items
                .iter()
                .any(|other| other != item && item.depends_on(world, other))
        })
        .collect();
    if eligible.is_empty() {
        return false;
    }

    let Some(anchor) = world
        .resource::<Selection>()
        .primary()
        .and_then(|primary| primary.world_affine(world))
        .map(|affine| affine.to_scale_rotation_translation().2)
    else {
        return false;
    };

    // Common pivot: the shared bounds center.
    let common_center =
        world.resource_scope(|world, mut selection: Mut<Selection>| {
            let registry = world.resource::<ProxyRegistry>();
            selection
                .bounds(world, registry)
                .map(|bounds| bounds.center())
                .unwrap_or(anchor)
        });

    let mut snapshots = Vec::with_capacity(eligible.len());
    for item in &eligible {
        let Some(original) = item.local_transform(world) else {
            continue;
        };
        let Some(world_affine) = item.world_affine(world) else {
            continue;
        };
        let local_center = world
            .resource::<ProxyRegistry>()
            .local_bounds(item)
            .map(|bounds| bounds.center())
            .unwrap_or(Vec3::ZERO);
        snapshots.push(ObjectSnapshot {
            target: *item,
            original,
            parent_inverse: item.parent_affine(world).inverse(),
            world: world_affine,
            local_center,
            common_center_local: world_affine.inverse().transform_point3(common_center),
            is_clone: false,
        });
    }
    if snapshots.is_empty() {
        return false;
    }

    // Screen directions of the gizmo axes, for rotation math and for picking
    // the unprojection plane least degenerate from this viewpoint.
    let axis_screen = [
        view.screen_axis(anchor, rotation * Vec3::X),
        view.screen_axis(anchor, rotation * Vec3::Y),
        view.screen_axis(anchor, rotation * Vec3::Z),
    ];

    let plane_normal = match axis {
        GizmoAxis::X | GizmoAxis::Y | GizmoAxis::Z => {
            single_axis_plane(axis, rotation, &axis_screen, view)
        }
        GizmoAxis::XY | GizmoAxis::XZ | GizmoAxis::YZ => {
            rotation * axis.plane_normal().unwrap_or(Vec3::Y)
        }
        GizmoAxis::Uniform => view_forward(view),
    };

    let start_world = view
        .ray(cursor)
        .and_then(|(origin, dir)| intersect_plane(origin, dir, anchor, plane_normal))
        .unwrap_or(anchor);

    let clone = if clone_requested && mode == GizmoMode::Translate {
        CloneState::NeedsClone
    } else {
        CloneState::None
    };

    world.resource_mut::<TransformDragState>().active = Some(ActiveTransform {
        mode,
        axis,
        snapshots,
        clone,
        clone_sources: Vec::new(),
        clones: Vec::new(),
        start_cursor: cursor,
        start_world,
        plane_normal,
        axis_screen,
        last_delta: Vec3::ZERO,
    });
    world.resource_mut::<GizmoState>().active_axis = Some(axis);
    true
}

/// Choose, for a single-axis move, the coordinate plane containing the axis
/// whose screen-space area is largest — the one least edge-on to the view.
fn single_axis_plane(
    axis: GizmoAxis,
    rotation: Quat,
    axis_screen: &[Option<Vec2>; 3],
    view: &PickView,
) -> Vec3 {
    let (own, candidates) = match axis {
        GizmoAxis::X => (0, [(1, Vec3::Z), (2, Vec3::Y)]),
        GizmoAxis::Y => (1, [(0, Vec3::Z), (2, Vec3::X)]),
        _ => (2, [(0, Vec3::Y), (1, Vec3::X)]),
    };
    let Some(own_screen) = axis_screen[own] else {
        return view_forward(view);
    };

    let mut best: Option<(f32, Vec3)> = None;
    for (other, normal) in candidates {
        let Some(other_screen) = axis_screen[other] else {
            continue;
        };
        let area = (own_screen.x * other_screen.y - own_screen.y * other_screen.x).abs();
        if best.is_none_or(|(current, _)| area > current) {
            best = Some((area, rotation * normal));
        }
    }
    best.map(|(_, normal)| normal)
        .unwrap_or_else(|| view_forward(view))
}

fn view_forward(view: &PickView) -> Vec3 {
    -view.world_from_view.transform_vector3(Vec3::Z).normalize_or_zero()
}

fn intersect_plane(origin: Vec3, dir: Vec3, anchor: Vec3, normal: Vec3) -> Option<Vec3> {
    let denom = normal.dot(dir);
    if denom.abs() < 1e-6 {
        return None;
    }
    let t = normal.dot(anchor - origin) / denom;
    (t >= 0.0).then(|| origin + dir * t)
}

/// Pointer-driven move update: unprojects the cursor onto the gesture plane
/// and delegates to [`move_to`].
pub fn update_move(world: &mut World, view: &PickView, cursor: Vec2, ctrl: bool) -> Option<Vec3> {
    let (anchor, normal) = {
        let drag = world.resource::<TransformDragState>();
        let active = drag.active.as_ref()?;
        if active.mode != GizmoMode::Translate {
            return None;
        }
        (active.start_world, active.plane_normal)
    };
    let (origin, dir) = view.ray(cursor)?;
    let target = intersect_plane(origin, dir, anchor, normal)?;
    move_to(world, target, ctrl)
}

/// Apply a move gesture toward a world-space target point. Returns the
/// effective (constrained, snapped) world delta.
pub fn move_to(world: &mut World, new_world_pos: Vec3, ctrl: bool) -> Option<Vec3> {
    let snap = world.resource::<SnapSettings>().clone();
    let rotation = world.resource::<GizmoState>().rotation;

    world.resource_scope(|world, mut drag: Mut<TransformDragState>| {
        let active = drag.active.as_mut()?;
        if active.mode != GizmoMode::Translate {
            return None;
        }

        let mut delta = new_world_pos - active.start_world;
        match active.axis {
            GizmoAxis::X | GizmoAxis::Y | GizmoAxis::Z => {
                let dir = rotation * active.axis.unit().unwrap();
                delta = dir * delta.dot(dir);
            }
            GizmoAxis::XY | GizmoAxis::XZ | GizmoAxis::YZ => {
                let normal = rotation * active.axis.plane_normal().unwrap();
                delta -= normal * delta.dot(normal);
            }
            GizmoAxis::Uniform => {}
        }
        delta = snap.snap_translate_vec3_if(delta, ctrl);

        if active.clone == CloneState::NeedsClone && delta.length() > CLONE_DEADZONE {
            materialize_clones(world, active);
        }

        let mut readout: Option<Vec3> = None;
        for snapshot in &active.snapshots {
            let mut object_delta = delta;
            if snap.terrain_snap {
                let start = Vec3::from(snapshot.world.translation);
                let target = start + delta;
                let probe_from = Vec3::new(target.x, TERRAIN_PROBE_SPAN, target.z);
                let probe_to = Vec3::new(target.x, -TERRAIN_PROBE_SPAN, target.z);
                let registry = world.resource::<ProxyRegistry>();
                if let Some(hit) = registry.terrain_ray_test(probe_from, probe_to) {
                    object_delta.y = hit.point.y - start.y;
                    readout.get_or_insert(hit.point);
                }
                // No terrain in the scene: the snap step is skipped and the
                // move proceeds unmodified.
            }
            let local_offset = snapshot.parent_inverse.transform_vector3(object_delta);
            let mut transform = snapshot.original;
            transform.translation += local_offset;
            snapshot.target.set_local_transform(world, transform);
        }

        if let Some(point) = readout {
            world
                .resource_mut::<Messages<TerrainHeightReadout>>()
                .write(TerrainHeightReadout { point });
        }

        active.last_delta = delta;
        Some(delta)
    })
}

/// Pointer-driven rotate update. The angle comes from screen motion along the
/// 2D normal of the rotation axis' screen direction.
pub fn update_rotate(world: &mut World, cursor: Vec2, ctrl: bool) {
    let snap = world.resource::<SnapSettings>().clone();
    let sensitivity = world.resource::<EditorConfig>().rotate_sensitivity;
    let rotation = world.resource::<GizmoState>().rotation;

    world.resource_scope(|world, mut drag: Mut<TransformDragState>| {
        let pivot = drag.pivot;
        let Some(active) = drag.active.as_mut() else {
            return;
        };
        if active.mode != GizmoMode::Rotate {
            return;
        }
        let Some(unit) = active.axis.unit() else {
            return;
        };
        let axis_index = match active.axis {
            GizmoAxis::X => 0,
            GizmoAxis::Y => 1,
            _ => 2,
        };
        let screen_dir = active.axis_screen[axis_index].unwrap_or(Vec2::X);
        let screen_normal = Vec2::new(-screen_dir.y, screen_dir.x);

        let screen_delta = cursor - active.start_cursor;
        let raw_angle = -screen_delta.dot(screen_normal) / sensitivity;
        let angle = snap.snap_rotate_if(raw_angle, ctrl);

        let axis_world = rotation * unit;
        for snapshot in &active.snapshots {
            let axis_local = snapshot
                .world
                .inverse()
                .transform_vector3(axis_world)
                .normalize_or_zero();
            if axis_local == Vec3::ZERO {
                continue;
            }
            let pivot_local = match pivot {
                PivotMode::ObjectCenter => snapshot.local_center,
                PivotMode::CommonCenter => snapshot.common_center_local,
            };
            let pivoted = snapshot.original.compute_affine()
                * Affine3A::from_translation(pivot_local)
                * Affine3A::from_quat(Quat::from_axis_angle(axis_local, angle))
                * Affine3A::from_translation(-pivot_local);
            apply_affine(world, snapshot, pivoted);
        }
    });
}

/// Pointer-driven uniform-scale update from vertical screen motion.
pub fn update_scale(world: &mut World, cursor: Vec2, ctrl: bool) {
    let snap = world.resource::<SnapSettings>().clone();
    let sensitivity = world.resource::<EditorConfig>().scale_sensitivity;

    world.resource_scope(|world, mut drag: Mut<TransformDragState>| {
        let pivot = drag.pivot;
        let Some(active) = drag.active.as_mut() else {
            return;
        };
        if active.mode != GizmoMode::Scale {
            return;
        }

        let vertical = cursor.y - active.start_cursor.y;
        // Clamped non-negative; the epsilon keeps the affine decomposable.
        let raw_factor = (1.0 - vertical / sensitivity).max(1e-4);
        let factor = snap.snap_scale_if(raw_factor, ctrl).max(1e-4);

        for snapshot in &active.snapshots {
            let pivot_local = match pivot {
                PivotMode::ObjectCenter => snapshot.local_center,
                PivotMode::CommonCenter => snapshot.common_center_local,
            };
            let pivoted = snapshot.original.compute_affine()
                * Affine3A::from_translation(pivot_local)
                * Affine3A::from_scale(Vec3::splat(factor))
                * Affine3A::from_translation(-pivot_local);
            apply_affine(world, snapshot, pivoted);
        }
    });
}

fn apply_affine(world: &mut World, snapshot: &ObjectSnapshot, affine: Affine3A) {
    let (scale, rotation, translation) = affine.to_scale_rotation_translation();
    snapshot.target.set_local_transform(
        world,
        Transform {
            translation,
            rotation,
            scale,
        },
    );
}

/// Finish the gesture: one transform command per object that actually moved,
/// plus spawn records for materialized clones, grouped into one undo entry.
pub fn apply_transform(world: &mut World) {
    let Some(active) = world.resource_mut::<TransformDragState>().active.take() else {
        return;
    };
    world.resource_mut::<GizmoState>().active_axis = None;

    let mut cmds: Vec<Box<dyn EditorCommand>> = Vec::new();
    for clone in &active.clones {
        if world.get_entity(*clone).is_ok() {
            cmds.push(Box::new(SpawnSnapshot::from_world(world, *clone, "Clone")));
        }
    }
    for snapshot in &active.snapshots {
        if snapshot.is_clone {
            continue;
        }
        let Some(current) = snapshot.target.local_transform(world) else {
            continue;
        };
        if current != snapshot.original {
            cmds.push(Box::new(SetTransform {
                target: snapshot.target,
                old_transform: snapshot.original,
                new_transform: current,
            }));
        }
    }

    let label = match (active.clone, active.mode) {
        (CloneState::Done, _) => "Clone objects",
        (_, GizmoMode::Rotate) => "Rotate objects",
        (_, GizmoMode::Scale) => "Scale objects",
        _ => "Move objects",
    };
    world.resource_scope(|_, mut history: Mut<CommandHistory>| {
        push_batch(&mut history, cmds, label);
    });

    if active.clone == CloneState::Done {
        world
            .resource_mut::<Messages<CloneCompleted>>()
            .write(CloneCompleted {
                sources: active.clone_sources,
                clones: active.clones,
            });
    }
}

/// Abandon the gesture: restore every original, drop any materialized clones,
/// submit nothing.
pub fn cancel_transform(world: &mut World) {
    let Some(active) = world.resource_mut::<TransformDragState>().active.take() else {
        return;
    };
    world.resource_mut::<GizmoState>().active_axis = None;

    for snapshot in &active.snapshots {
        if !snapshot.is_clone {
            snapshot.target.set_local_transform(world, snapshot.original);
        }
    }

    if active.clone == CloneState::Done {
        // Clones vanish; the originals were already restored when the clones
        // materialized. Re-select the sources.
        for clone in &active.clones {
            if let Ok(entity_mut) = world.get_entity_mut(*clone) {
                entity_mut.despawn();
            }
        }
        let sources = active.clone_sources.clone();
        reselect_nodes(world, &sources);
    }
}

/// Swap the dragged originals for fresh copies: originals go back to their
/// pre-drag transform, the copies take over the gesture and the selection.
fn materialize_clones(world: &mut World, active: &mut ActiveTransform) {
    active.clone = CloneState::Done;

    for snapshot in &active.snapshots {
        snapshot.target.set_local_transform(world, snapshot.original);
    }

    let mut sources = Vec::new();
    let mut clones = Vec::new();
    for snapshot in &mut active.snapshots {
        let Selectable::Node(source) = snapshot.target else {
            // Sub-objects can't be cloned; they keep dragging in place.
            continue;
        };
        let Some(clone) = clone_subtree(world, source) else {
            continue;
        };
        sources.push(source);
        clones.push(clone);
        snapshot.target = Selectable::Node(clone);
        snapshot.is_clone = true;
    }

    reselect_nodes(world, &clones);
    active.clone_sources = sources;
    active.clones = clones;
}

fn reselect_nodes(world: &mut World, entities: &[Entity]) {
    let items: Vec<Selectable> = entities
        .iter()
        .filter(|entity| world.get_entity(**entity).is_ok())
        .map(|entity| Selectable::Node(*entity))
        .collect();
    let mut queue = bevy::ecs::world::CommandQueue::default();
    world.resource_scope(|world, mut selection: Mut<Selection>| {
        let mut commands = Commands::new(&mut queue, world);
        selection.select_multiple(&mut commands, &items);
    });
    queue.apply(world);
}

// ---------------------------------------------------------------------------
// Frame driver
// ---------------------------------------------------------------------------

fn drive_transform_drag(world: &mut World) {
    let mouse = world.resource::<ButtonInput<MouseButton>>();
    let left_just_pressed = mouse.just_pressed(MouseButton::Left);
    let left_pressed = mouse.pressed(MouseButton::Left);
    let left_released = mouse.just_released(MouseButton::Left);
    let keyboard = world.resource::<ButtonInput<KeyCode>>();
    let escape = keyboard.just_pressed(KeyCode::Escape);
    let alt = keyboard.any_pressed([KeyCode::AltLeft, KeyCode::AltRight]);
    let ctrl = keyboard.any_pressed([KeyCode::ControlLeft, KeyCode::ControlRight]);

    let pointer = world.resource::<PointerState>();
    let view = pointer.view;
    let cursor = pointer.viewport_cursor;

    let gesture_active = world.resource::<TransformDragState>().active.is_some();

    if !gesture_active {
        let gizmo = world.resource::<GizmoState>();
        let hovered = gizmo.hovered_axis;
        let interactive = gizmo.interactive();
        if left_just_pressed && interactive {
            if let (Some(axis), Some(view), Some(cursor)) = (hovered, view, cursor) {
                begin_transform(world, &view, cursor, axis, alt);
            }
        }
        return;
    }

    if escape {
        cancel_transform(world);
        return;
    }

    if left_released {
        apply_transform(world);
        return;
    }

    if left_pressed {
        let (Some(view), Some(cursor)) = (view, cursor) else {
            return;
        };
        let mode = world
            .resource::<TransformDragState>()
            .active
            .as_ref()
            .map(|active| active.mode);
        match mode {
            Some(GizmoMode::Translate) => {
                update_move(world, &view, cursor, ctrl);
            }
            Some(GizmoMode::Rotate) => update_rotate(world, cursor, ctrl),
            Some(GizmoMode::Scale) => update_scale(world, cursor, ctrl),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gizmos::GizmoState;
    use crate::proxy::ProxyRegistry;
    use crate::selectable::Waypoint;
    use crate::terrain::Terrain;
    use crate::test_utils::{drain_proxies, select, test_app};
    use bevy::mesh::{Indices, PrimitiveTopology};

    fn spawn_waypoint(world: &mut World, pos: Vec3) -> Entity {
        let entity = world
            .spawn((
                Waypoint,
                Transform::from_translation(pos),
                GlobalTransform::from(Transform::from_translation(pos)),
            ))
            .id();
        world
            .resource_mut::<ProxyRegistry>()
            .request_add(Selectable::Node(entity));
        entity
    }

    fn view() -> PickView {
        PickView::looking_at(Vec3::new(0.0, 5.0, 10.0), Vec3::ZERO, Vec2::new(800.0, 600.0))
    }

    fn gesture_start(world: &World) -> (Vec3, Vec2) {
        let drag = world.resource::<TransformDragState>();
        let active = drag.active.as_ref().unwrap();
        (active.start_world, active.start_cursor)
    }

    #[test]
    fn begin_requires_selection() {
        let mut app = test_app();
        let world = app.world_mut();
        let v = view();
        assert!(!begin_transform(world, &v, Vec2::new(400.0, 300.0), GizmoAxis::X, false));
    }

    #[test]
    fn move_x_by_five_then_undo() {
        let mut app = test_app();
        let world = app.world_mut();
        let entity = spawn_waypoint(world, Vec3::ZERO);
        drain_proxies(world);
        select(world, &[Selectable::Node(entity)]);

        let v = view();
        let cursor = v.world_to_viewport(Vec3::ZERO).unwrap();
        assert!(begin_transform(world, &v, cursor, GizmoAxis::X, false));

        let (start, _) = gesture_start(world);
        let delta = move_to(world, start + Vec3::new(5.0, 0.0, 0.0), false).unwrap();
        assert!((delta - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-4);
        apply_transform(world);

        // A single-axis X move leaves local Y and Z untouched.
        let moved = world.get::<Transform>(entity).unwrap().translation;
        assert!((moved - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-4);

        world.resource_scope(|world, mut history: Mut<CommandHistory>| {
            history.undo(world);
        });
        assert_eq!(world.get::<Transform>(entity).unwrap().translation, Vec3::ZERO);
    }

    #[test]
    fn off_axis_target_is_projected_onto_the_axis() {
        let mut app = test_app();
        let world = app.world_mut();
        let entity = spawn_waypoint(world, Vec3::ZERO);
        drain_proxies(world);
        select(world, &[Selectable::Node(entity)]);

        let v = view();
        let cursor = v.world_to_viewport(Vec3::ZERO).unwrap();
        assert!(begin_transform(world, &v, cursor, GizmoAxis::X, false));

        let (start, _) = gesture_start(world);
        // The pointer wanders off the axis; only the X component survives.
        move_to(world, start + Vec3::new(2.0, 7.0, -3.0), false);

        let moved = world.get::<Transform>(entity).unwrap().translation;
        assert!((moved - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn cancel_restores_originals_and_submits_nothing() {
        let mut app = test_app();
        let world = app.world_mut();
        let entity = spawn_waypoint(world, Vec3::new(1.0, 0.0, 0.0));
        drain_proxies(world);
        select(world, &[Selectable::Node(entity)]);

        let v = view();
        let cursor = v.world_to_viewport(Vec3::new(1.0, 0.0, 0.0)).unwrap();
        assert!(begin_transform(world, &v, cursor, GizmoAxis::X, false));
        let (start, _) = gesture_start(world);
        move_to(world, start + Vec3::new(4.0, 0.0, 0.0), false);
        cancel_transform(world);

        assert_eq!(
            world.get::<Transform>(entity).unwrap().translation,
            Vec3::new(1.0, 0.0, 0.0)
        );
        assert!(world.resource::<CommandHistory>().undo_stack.is_empty());
    }

    #[test]
    fn derived_members_are_excluded_from_the_gesture() {
        let mut app = test_app();
        let world = app.world_mut();
        let parent = spawn_waypoint(world, Vec3::ZERO);
        let child = world
            .spawn((
                Waypoint,
                Transform::from_xyz(1.0, 0.0, 0.0),
                GlobalTransform::from(Transform::from_xyz(1.0, 0.0, 0.0)),
                ChildOf(parent),
            ))
            .id();
        world
            .resource_mut::<ProxyRegistry>()
            .request_add(Selectable::Node(child));
        drain_proxies(world);
        select(world, &[Selectable::Node(parent), Selectable::Node(child)]);

        let v = view();
        let cursor = v.world_to_viewport(Vec3::ZERO).unwrap();
        assert!(begin_transform(world, &v, cursor, GizmoAxis::X, false));
        {
            let drag = world.resource::<TransformDragState>();
            assert_eq!(drag.active.as_ref().unwrap().snapshots.len(), 1);
        }

        let (start, _) = gesture_start(world);
        move_to(world, start + Vec3::new(2.0, 0.0, 0.0), false);
        // The child rides along with its parent; its own local stays put.
        assert_eq!(
            world.get::<Transform>(child).unwrap().translation,
            Vec3::new(1.0, 0.0, 0.0)
        );
    }

    #[test]
    fn clone_drag_leaves_original_and_spawns_copy() {
        let mut app = test_app();
        let world = app.world_mut();
        let original = spawn_waypoint(world, Vec3::ZERO);
        drain_proxies(world);
        select(world, &[Selectable::Node(original)]);

        let v = view();
        let cursor = v.world_to_viewport(Vec3::ZERO).unwrap();
        assert!(begin_transform(world, &v, cursor, GizmoAxis::X, true));
        let (start, _) = gesture_start(world);
        move_to(world, start + Vec3::new(3.0, 0.0, 0.0), false);
        apply_transform(world);

        // Original keeps its pre-drag transform.
        assert_eq!(world.get::<Transform>(original).unwrap().translation, Vec3::ZERO);

        // Exactly one copy exists, at the dragged-to transform, and is now
        // the selection.
        let mut waypoints = world.query_filtered::<(Entity, &Transform), With<Waypoint>>();
        let all: Vec<(Entity, Vec3)> = waypoints
            .iter(world)
            .map(|(entity, transform)| (entity, transform.translation))
            .collect();
        assert_eq!(all.len(), 2);
        let (clone, clone_pos) = *all.iter().find(|(entity, _)| *entity != original).unwrap();
        assert!((clone_pos - Vec3::new(3.0, 0.0, 0.0)).length() < 1e-4);
        assert_eq!(
            world.resource::<Selection>().primary(),
            Some(Selectable::Node(clone))
        );

        let completed: Vec<CloneCompleted> = world
            .resource_mut::<Messages<CloneCompleted>>()
            .drain()
            .collect();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].clones, vec![clone]);

        // Undo removes the copy again.
        world.resource_scope(|world, mut history: Mut<CommandHistory>| {
            history.undo(world);
        });
        let mut waypoints = world.query_filtered::<Entity, With<Waypoint>>();
        assert_eq!(waypoints.iter(world).count(), 1);
    }

    #[test]
    fn cancelled_clone_drag_despawns_the_copy() {
        let mut app = test_app();
        let world = app.world_mut();
        let original = spawn_waypoint(world, Vec3::ZERO);
        drain_proxies(world);
        select(world, &[Selectable::Node(original)]);

        let v = view();
        let cursor = v.world_to_viewport(Vec3::ZERO).unwrap();
        assert!(begin_transform(world, &v, cursor, GizmoAxis::X, true));
        let (start, _) = gesture_start(world);
        move_to(world, start + Vec3::new(3.0, 0.0, 0.0), false);
        cancel_transform(world);

        let mut waypoints = world.query_filtered::<Entity, With<Waypoint>>();
        assert_eq!(waypoints.iter(world).count(), 1);
        assert_eq!(
            world.resource::<Selection>().primary(),
            Some(Selectable::Node(original))
        );
    }

    #[test]
    fn terrain_snap_overrides_vertical_component() {
        let mut app = test_app();
        let world = app.world_mut();
        let terrain = world
            .spawn((
                Terrain::flat(16, 16, 1.0, 2.0),
                Transform::default(),
                GlobalTransform::default(),
            ))
            .id();
        world
            .resource_mut::<ProxyRegistry>()
            .request_add(Selectable::Node(terrain));
        let entity = spawn_waypoint(world, Vec3::ZERO);
        drain_proxies(world);
        select(world, &[Selectable::Node(entity)]);
        world.resource_mut::<crate::snapping::SnapSettings>().terrain_snap = true;

        let v = view();
        let cursor = v.world_to_viewport(Vec3::ZERO).unwrap();
        assert!(begin_transform(world, &v, cursor, GizmoAxis::X, false));
        let (start, _) = gesture_start(world);
        // The unsnapped target's height is irrelevant; X is the only input.
        move_to(world, start + Vec3::new(3.0, 7.0, 0.0), false);

        let moved = world.get::<Transform>(entity).unwrap().translation;
        assert!((moved.x - 3.0).abs() < 1e-4);
        assert!((moved.y - 2.0).abs() < 1e-3);
        assert!(moved.z.abs() < 1e-4);

        let readouts: Vec<TerrainHeightReadout> = world
            .resource_mut::<Messages<TerrainHeightReadout>>()
            .drain()
            .collect();
        assert!(!readouts.is_empty());
    }

    #[test]
    fn rotate_about_own_center_keeps_world_bounds_center() {
        let mut app = test_app();
        let world = app.world_mut();

        // A quad whose geometry is offset from its pivot: local center (1,0,0).
        let handle = {
            let mut meshes = world.resource_mut::<Assets<Mesh>>();
            let mut mesh = Mesh::new(PrimitiveTopology::TriangleList, default());
            mesh.insert_attribute(
                Mesh::ATTRIBUTE_POSITION,
                vec![
                    [0.5, -0.5, 0.0],
                    [1.5, -0.5, 0.0],
                    [1.5, 0.5, 0.0],
                    [0.5, 0.5, 0.0],
                ],
            );
            mesh.insert_indices(Indices::U32(vec![0, 1, 2, 0, 2, 3]));
            meshes.add(mesh)
        };
        let entity = world
            .spawn((
                Mesh3d(handle),
                Transform::from_xyz(2.0, 0.0, 0.0),
                GlobalTransform::from(Transform::from_xyz(2.0, 0.0, 0.0)),
            ))
            .id();
        world
            .resource_mut::<ProxyRegistry>()
            .request_add(Selectable::Node(entity));
        drain_proxies(world);
        select(world, &[Selectable::Node(entity)]);

        let item = Selectable::Node(entity);
        let local_center = world
            .resource::<ProxyRegistry>()
            .local_bounds(&item)
            .unwrap()
            .center();
        assert!((local_center - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-4);

        world.resource_mut::<GizmoState>().mode = GizmoMode::Rotate;
        let v = view();
        let cursor = v.world_to_viewport(Vec3::new(2.0, 0.0, 0.0)).unwrap();
        assert!(begin_transform(world, &v, cursor, GizmoAxis::Y, false));
        update_rotate(world, cursor + Vec2::new(60.0, 0.0), false);

        let transform = world.get::<Transform>(entity).unwrap();
        // Something actually rotated.
        assert!(transform.rotation.angle_between(Quat::IDENTITY) > 1e-3);
        // The world position of the bounds center is pinned.
        let world_center = transform.compute_affine().transform_point3(local_center);
        assert!((world_center - Vec3::new(3.0, 0.0, 0.0)).length() < 1e-3);
    }

    #[test]
    fn common_center_scale_preserves_distance_ratios() {
        let mut app = test_app();
        let world = app.world_mut();
        let a = spawn_waypoint(world, Vec3::new(1.0, 0.0, 0.0));
        let b = spawn_waypoint(world, Vec3::new(3.0, 0.0, 0.0));
        drain_proxies(world);
        select(world, &[Selectable::Node(a), Selectable::Node(b)]);
        world.resource_mut::<TransformDragState>().pivot = PivotMode::CommonCenter;
        world.resource_mut::<GizmoState>().mode = GizmoMode::Scale;

        let v = view();
        let cursor = v.world_to_viewport(Vec3::new(2.0, 0.0, 0.0)).unwrap();
        assert!(begin_transform(world, &v, cursor, GizmoAxis::Uniform, false));
        // 100 px up with the default 200 px sensitivity: factor 1.5.
        update_scale(world, cursor + Vec2::new(0.0, -100.0), false);

        let pa = world.get::<Transform>(a).unwrap().translation;
        let pb = world.get::<Transform>(b).unwrap().translation;
        let distance = pa.distance(pb);
        assert!((distance - 3.0).abs() < 1e-3);

        // Scale factors below zero clamp instead of mirroring.
        update_scale(world, cursor + Vec2::new(0.0, 500.0), false);
        let pa = world.get::<Transform>(a).unwrap().translation;
        let pb = world.get::<Transform>(b).unwrap().translation;
        assert!(pa.distance(pb) < 1e-3);
    }

    #[test]
    fn gesture_skips_unsupported_modes_silently() {
        let mut app = test_app();
        let world = app.world_mut();
        let effect = world
            .spawn((
                crate::effect::ParticleEffect {
                    forces: vec![crate::effect::ForceSlot::default()],
                    ..default()
                },
                Transform::default(),
                GlobalTransform::default(),
            ))
            .id();
        world
            .resource_mut::<ProxyRegistry>()
            .request_add(Selectable::Node(effect));
        drain_proxies(world);
        // A force slot only supports translation; a scale gesture over it
        // finds nothing eligible and quietly refuses.
        select(world, &[Selectable::Force { effect, index: 0 }]);
        world.resource_mut::<GizmoState>().mode = GizmoMode::Scale;

        let v = view();
        assert!(!begin_transform(
            world,
            &v,
            Vec2::new(400.0, 300.0),
            GizmoAxis::Uniform,
            false
        ));
        assert!(world.resource::<TransformDragState>().active.is_none());
    }
}
