use bevy::prelude::*;

use crate::commands::{
    BakePivot, CommandHistory, DespawnEntity, EditorCommand, SetLockedFlag, SetTransform,
    SpawnSnapshot, push_batch, snapshot_entity, snapshot_rebuild,
};
use crate::gizmos::{GizmoAxis, GizmoMode};
use crate::proxy::{ProxyRegistry, hierarchy_bounds_local};
use crate::selectable::{Locked, Selectable};
use crate::selection::{Selected, Selection};
use crate::transform_drag::{TERRAIN_PROBE_SPAN, TransformDragState};
use crate::EditorEntity;

pub struct EntityOpsPlugin;

impl Plugin for EntityOpsPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, handle_entity_keys);
    }
}

// ---------------------------------------------------------------------------
// Clone / duplicate
// ---------------------------------------------------------------------------

/// Copy an entity and its descendants through a scene snapshot, preserving
/// the parent link. Returns the new root.
pub fn clone_subtree(world: &mut World, entity: Entity) -> Option<Entity> {
    if world.get_entity(entity).is_err() || world.get::<EditorEntity>(entity).is_some() {
        return None;
    }

    let scene = snapshot_rebuild(&snapshot_entity(world, entity));
    let mut entity_map = Default::default();
    if scene.write_to_world(world, &mut entity_map).is_err() {
        warn!("cloning entity {entity} failed");
        return None;
    }
    let &new_root = entity_map.get(&entity)?;

    // Rename to "<name> (Copy)"
    if let Some(name) = world.get::<Name>(new_root) {
        let new_name = format!("{} (Copy)", name.as_str());
        world.entity_mut(new_root).insert(Name::new(new_name));
    }

    // Preserve parent relationship from original
    let parent = world.get::<ChildOf>(entity).map(|c| c.0);
    if let Some(parent) = parent {
        world.entity_mut(new_root).insert(ChildOf(parent));
    } else {
        world.entity_mut(new_root).remove::<ChildOf>();
    }
    // The copy never inherits the selection marker.
    world.entity_mut(new_root).remove::<Selected>();

    Some(new_root)
}

/// Ctrl+D: copy the selected nodes next to their originals, select the
/// copies, record one undo entry.
pub fn duplicate_selected(world: &mut World) {
    let sources: Vec<Entity> = world.resource::<Selection>().nodes().collect();
    if sources.is_empty() {
        return;
    }

    let mut cmds: Vec<Box<dyn EditorCommand>> = Vec::new();
    let mut clones = Vec::new();
    for source in sources {
        let Some(clone) = clone_subtree(world, source) else {
            continue;
        };
        if let Some(mut transform) = world.get_mut::<Transform>(clone) {
            transform.translation += Vec3::new(0.5, 0.0, 0.5);
        }
        cmds.push(Box::new(SpawnSnapshot::from_world(world, clone, "Duplicate")));
        clones.push(clone);
    }
    if clones.is_empty() {
        return;
    }

    reselect(world, &clones);
    world.resource_scope(|_, mut history: Mut<CommandHistory>| {
        push_batch(&mut history, cmds, "Duplicate entities");
    });
}

fn reselect(world: &mut World, entities: &[Entity]) {
    let items: Vec<Selectable> = entities.iter().map(|e| Selectable::Node(*e)).collect();
    let mut queue = bevy::ecs::world::CommandQueue::default();
    world.resource_scope(|world, mut selection: Mut<Selection>| {
        let mut commands = Commands::new(&mut queue, world);
        selection.select_multiple(&mut commands, &items);
    });
    queue.apply(world);
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

pub fn delete_selected(world: &mut World) {
    let entities: Vec<Entity> = world.resource::<Selection>().nodes().collect();
    if entities.is_empty() {
        return;
    }

    // Build commands for each entity
    let mut cmds: Vec<Box<dyn EditorCommand>> = Vec::new();
    for &entity in &entities {
        if world.get_entity(entity).is_err() {
            continue;
        }
        if world.get::<EditorEntity>(entity).is_some() {
            continue;
        }
        cmds.push(Box::new(DespawnEntity::from_world(world, entity)));
    }

    // Execute all despawn commands
    for cmd in &cmds {
        cmd.execute(world);
    }

    world.resource_scope(|_, mut history: Mut<CommandHistory>| {
        push_batch(&mut history, cmds, "Delete entities");
    });
}

// ---------------------------------------------------------------------------
// Numeric entry
// ---------------------------------------------------------------------------

fn axis_mask(axis: GizmoAxis) -> (bool, bool, bool) {
    match axis {
        GizmoAxis::X => (true, false, false),
        GizmoAxis::Y => (false, true, false),
        GizmoAxis::Z => (false, false, true),
        GizmoAxis::XY => (true, true, false),
        GizmoAxis::XZ => (true, false, true),
        GizmoAxis::YZ => (false, true, true),
        GizmoAxis::Uniform => (true, true, true),
    }
}

/// Non-gestural absolute or relative entry of transform values along the
/// masked axes, submitted as one undo entry.
pub fn apply_axis_values(
    world: &mut World,
    mode: GizmoMode,
    axis: GizmoAxis,
    value: Vec3,
    relative: bool,
) {
    let items: Vec<Selectable> = world.resource::<Selection>().items().to_vec();
    if items.is_empty() || mode == GizmoMode::Disabled {
        return;
    }
    let mask = axis_mask(axis);

    let mut cmds: Vec<Box<dyn EditorCommand>> = Vec::new();
    for item in items {
        if !item.supports(mode) || item.is_locked(world) {
            continue;
        }
        let Some(old_transform) = item.local_transform(world) else {
            continue;
        };
        let mut new_transform = old_transform;

        match mode {
            GizmoMode::Translate => {
                let mut t = new_transform.translation;
                apply_masked(&mut t, value, mask, relative);
                new_transform.translation = t;
            }
            GizmoMode::Rotate => {
                let (x, y, z) = new_transform.rotation.to_euler(EulerRot::XYZ);
                let mut angles = Vec3::new(x, y, z);
                apply_masked(&mut angles, value, mask, relative);
                new_transform.rotation =
                    Quat::from_euler(EulerRot::XYZ, angles.x, angles.y, angles.z);
            }
            GizmoMode::Scale => {
                let mut s = new_transform.scale;
                apply_masked(&mut s, value, mask, relative);
                new_transform.scale = s.max(Vec3::splat(0.001));
            }
            GizmoMode::Disabled => unreachable!(),
        }

        if new_transform == old_transform {
            continue;
        }
        let cmd = SetTransform {
            target: item,
            old_transform,
            new_transform,
        };
        cmd.execute(world);
        cmds.push(Box::new(cmd));
    }

    world.resource_scope(|_, mut history: Mut<CommandHistory>| {
        push_batch(&mut history, cmds, "Set transform values");
    });
}

fn apply_masked(out: &mut Vec3, value: Vec3, mask: (bool, bool, bool), relative: bool) {
    if mask.0 {
        out.x = if relative { out.x + value.x } else { value.x };
    }
    if mask.1 {
        out.y = if relative { out.y + value.y } else { value.y };
    }
    if mask.2 {
        out.z = if relative { out.z + value.z } else { value.z };
    }
}

// ---------------------------------------------------------------------------
// One-shot transform utilities
// ---------------------------------------------------------------------------

/// Reset every selected item to the identity transform.
pub fn reset_transform_selected(world: &mut World) {
    let items: Vec<Selectable> = world.resource::<Selection>().items().to_vec();

    let mut cmds: Vec<Box<dyn EditorCommand>> = Vec::new();
    for item in items {
        if item.is_locked(world) {
            continue;
        }
        let Some(old_transform) = item.local_transform(world) else {
            continue;
        };
        if old_transform == Transform::IDENTITY {
            continue;
        }
        let cmd = SetTransform {
            target: item,
            old_transform,
            new_transform: Transform::IDENTITY,
        };
        cmd.execute(world);
        cmds.push(Box::new(cmd));
    }

    world.resource_scope(|_, mut history: Mut<CommandHistory>| {
        push_batch(&mut history, cmds, "Reset transform");
    });
}

/// Drop every selected node vertically onto the terrain under it. Nodes with
/// no terrain below them stay put.
pub fn place_on_terrain_selected(world: &mut World) {
    let items: Vec<Selectable> = world.resource::<Selection>().items().to_vec();

    let mut cmds: Vec<Box<dyn EditorCommand>> = Vec::new();
    for item in items {
        if !item.is_node() || item.is_locked(world) {
            continue;
        }
        let Some(old_transform) = item.local_transform(world) else {
            continue;
        };
        let Some(world_affine) = item.world_affine(world) else {
            continue;
        };
        let position = Vec3::from(world_affine.translation);

        let hit = {
            let registry = world.resource::<ProxyRegistry>();
            registry.terrain_ray_test(
                Vec3::new(position.x, TERRAIN_PROBE_SPAN, position.z),
                Vec3::new(position.x, -TERRAIN_PROBE_SPAN, position.z),
            )
        };
        let Some(hit) = hit else {
            continue;
        };

        let delta = Vec3::new(0.0, hit.point.y - position.y, 0.0);
        let local_offset = item.parent_affine(world).inverse().transform_vector3(delta);
        let mut new_transform = old_transform;
        new_transform.translation += local_offset;
        if new_transform == old_transform {
            continue;
        }

        let cmd = SetTransform {
            target: item,
            old_transform,
            new_transform,
        };
        cmd.execute(world);
        cmds.push(Box::new(cmd));
    }

    world.resource_scope(|_, mut history: Mut<CommandHistory>| {
        push_batch(&mut history, cmds, "Place on terrain");
    });
}

/// Re-home each selected node's pivot to its hierarchy bounds center. The
/// visible scene does not move.
pub fn move_pivot_center_selected(world: &mut World) {
    let nodes: Vec<Entity> = world.resource::<Selection>().nodes().collect();

    let mut cmds: Vec<Box<dyn EditorCommand>> = Vec::new();
    for entity in nodes {
        let offset = {
            let registry = world.resource::<ProxyRegistry>();
            hierarchy_bounds_local(world, registry, entity).map(|bounds| bounds.center())
        };
        let Some(offset) = offset else {
            continue;
        };
        if offset.length_squared() < 1e-10 {
            continue;
        }
        let cmd = BakePivot { entity, offset };
        cmd.execute(world);
        cmds.push(Box::new(cmd));
    }

    world.resource_scope(|_, mut history: Mut<CommandHistory>| {
        push_batch(&mut history, cmds, "Center pivot");
    });
}

/// Move each selected node's pivot onto its parent frame's origin, leaving
/// the visible scene unchanged.
pub fn move_pivot_zero_selected(world: &mut World) {
    let nodes: Vec<Entity> = world.resource::<Selection>().nodes().collect();

    let mut cmds: Vec<Box<dyn EditorCommand>> = Vec::new();
    for entity in nodes {
        let Some(transform) = world.get::<Transform>(entity).copied() else {
            continue;
        };
        if transform.translation.length_squared() < 1e-10 {
            continue;
        }
        let affine = transform.compute_affine();
        // Solve local * T(offset) for zero translation.
        let offset = -(affine.matrix3.inverse() * bevy::math::Vec3A::from(transform.translation));
        let cmd = BakePivot {
            entity,
            offset: Vec3::from(offset),
        };
        cmd.execute(world);
        cmds.push(Box::new(cmd));
    }

    world.resource_scope(|_, mut history: Mut<CommandHistory>| {
        push_batch(&mut history, cmds, "Zero pivot");
    });
}

/// Toggle the transform lock on the selection, propagating through each
/// hierarchy. Locks everything unless every selected host is already locked.
pub fn lock_selected(world: &mut World) {
    let hosts: Vec<Entity> = world
        .resource::<Selection>()
        .items()
        .iter()
        .map(|item| item.host())
        .collect();
    if hosts.is_empty() {
        return;
    }
    let lock = !hosts
        .iter()
        .all(|&entity| world.get::<Locked>(entity).is_some());

    let mut cmds: Vec<Box<dyn EditorCommand>> = Vec::new();
    for entity in hosts {
        if world.get_entity(entity).is_err() {
            continue;
        }
        let cmd = SetLockedFlag::for_hierarchy(world, entity, lock);
        cmd.execute(world);
        cmds.push(Box::new(cmd));
    }

    world.resource_scope(|_, mut history: Mut<CommandHistory>| {
        push_batch(&mut history, cmds, if lock { "Lock" } else { "Unlock" });
    });
}

// ---------------------------------------------------------------------------
// Camera focus
// ---------------------------------------------------------------------------

/// Glide the fly camera to frame the selection bounds.
pub fn focus_selected(world: &mut World) {
    let bounds = world.resource_scope(|world, mut selection: Mut<Selection>| {
        let registry = world.resource::<ProxyRegistry>();
        selection.bounds(world, registry)
    });
    let Some(bounds) = bounds else {
        return;
    };
    let target = bounds.center();
    let distance = (bounds.half_extents().length() * 3.0).max(5.0);

    let mut cameras =
        world.query_filtered::<Entity, With<magpie_camera::MagpieCameraSettings>>();
    let cameras: Vec<Entity> = cameras.iter(world).collect();
    for camera in cameras {
        world
            .entity_mut(camera)
            .insert(magpie_camera::FocusGlide::new(target, distance));
    }
}

// ---------------------------------------------------------------------------
// Keyboard shortcuts
// ---------------------------------------------------------------------------

fn handle_entity_keys(world: &mut World) {
    // Entity operations never fire mid-gesture
    if world.resource::<TransformDragState>().active.is_some() {
        return;
    }

    let keyboard = world.resource::<ButtonInput<KeyCode>>();
    let ctrl = keyboard.any_pressed([KeyCode::ControlLeft, KeyCode::ControlRight]);
    let alt = keyboard.any_pressed([KeyCode::AltLeft, KeyCode::AltRight]);
    let delete_pressed =
        keyboard.just_pressed(KeyCode::Delete) || keyboard.just_pressed(KeyCode::Backspace);
    let d_pressed = keyboard.just_pressed(KeyCode::KeyD);
    let g_pressed = keyboard.just_pressed(KeyCode::KeyG);
    let l_pressed = keyboard.just_pressed(KeyCode::KeyL);
    let t_pressed = keyboard.just_pressed(KeyCode::KeyT);
    let f_pressed = keyboard.just_pressed(KeyCode::KeyF);

    if delete_pressed {
        delete_selected(world);
    } else if ctrl && d_pressed {
        duplicate_selected(world);
    } else if alt && g_pressed {
        reset_transform_selected(world);
    } else if l_pressed && !ctrl && !alt {
        lock_selected(world);
    } else if t_pressed && !ctrl && !alt {
        place_on_terrain_selected(world);
    } else if f_pressed && !ctrl && !alt {
        focus_selected(world);
    }
}
