use bevy::math::Affine3A;
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::effect::ParticleEffect;
use crate::gizmos::GizmoMode;
use crate::terrain::Terrain;

// ---------------------------------------------------------------------------
// Pick-related marker components
// ---------------------------------------------------------------------------

/// Excludes an entity from picking and from transform gestures. Applied and
/// cleared through the undoable lock command so it participates in history.
#[derive(Component, Reflect, Default, Clone, Copy)]
#[reflect(Component)]
pub struct Locked;

/// Marks an entity as an atomic pick unit: clicks on any descendant select
/// this entity instead (GLTF sub-meshes, prefab internals).
#[derive(Component, Reflect, Default, Clone, Copy)]
#[reflect(Component)]
pub struct SolidPick;

/// The scene camera currently driving the viewport. Never pickable while
/// active — selecting the camera you are looking through deadlocks the view.
#[derive(Component, Default, Clone, Copy)]
pub struct ActiveViewCamera;

/// A navigation waypoint placed in the scene.
#[derive(Component, Reflect, Default, Clone, Copy)]
#[reflect(Component)]
pub struct Waypoint;

/// A user-placed annotation marker.
#[derive(Component, Reflect, Default, Clone, Copy)]
#[reflect(Component)]
pub struct MarkerPoint;

// ---------------------------------------------------------------------------
// Object kinds
// ---------------------------------------------------------------------------

/// Coarse classification used to choose pick-shape policy and to filter picks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Mesh,
    Terrain,
    Camera,
    Light,
    Effect,
    Waypoint,
    Marker,
    Empty,
}

pub fn object_kind(world: &World, entity: Entity) -> ObjectKind {
    if world.get::<Terrain>(entity).is_some() {
        ObjectKind::Terrain
    } else if world.get::<Camera3d>(entity).is_some() {
        ObjectKind::Camera
    } else if world.get::<PointLight>(entity).is_some()
        || world.get::<DirectionalLight>(entity).is_some()
        || world.get::<SpotLight>(entity).is_some()
    {
        ObjectKind::Light
    } else if world.get::<ParticleEffect>(entity).is_some() {
        ObjectKind::Effect
    } else if world.get::<Mesh3d>(entity).is_some() {
        ObjectKind::Mesh
    } else if world.get::<Waypoint>(entity).is_some() {
        ObjectKind::Waypoint
    } else if world.get::<MarkerPoint>(entity).is_some() {
        ObjectKind::Marker
    } else {
        ObjectKind::Empty
    }
}

// ---------------------------------------------------------------------------
// Selectable
// ---------------------------------------------------------------------------

/// A non-owning handle to anything the editor can pick or transform: a scene
/// node, or one of a particle effect's emitter/force slots. Each variant
/// carries its own small capability table below — an exhaustive match instead
/// of a downcast chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Selectable {
    Node(Entity),
    Emitter { effect: Entity, index: usize },
    Force { effect: Entity, index: usize },
}

impl Selectable {
    /// The scene entity hosting this item.
    pub fn host(&self) -> Entity {
        match *self {
            Selectable::Node(entity) => entity,
            Selectable::Emitter { effect, .. } | Selectable::Force { effect, .. } => effect,
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Selectable::Node(_))
    }

    /// Whether the handle still points at live scene data.
    pub fn exists(&self, world: &World) -> bool {
        match *self {
            Selectable::Node(entity) => world.get_entity(entity).is_ok(),
            Selectable::Emitter { effect, index } => world
                .get::<ParticleEffect>(effect)
                .is_some_and(|fx| index < fx.emitters.len()),
            Selectable::Force { effect, index } => world
                .get::<ParticleEffect>(effect)
                .is_some_and(|fx| index < fx.forces.len()),
        }
    }

    /// World placement, including the host chain for sub-objects.
    pub fn world_affine(&self, world: &World) -> Option<Affine3A> {
        let host_affine = world.get::<GlobalTransform>(self.host())?.affine();
        match *self {
            Selectable::Node(_) => Some(host_affine),
            Selectable::Emitter { effect, index } => {
                let fx = world.get::<ParticleEffect>(effect)?;
                Some(host_affine * fx.emitter(index)?.transform.compute_affine())
            }
            Selectable::Force { effect, index } => {
                let fx = world.get::<ParticleEffect>(effect)?;
                Some(host_affine * fx.force(index)?.transform.compute_affine())
            }
        }
    }

    /// The world placement of the frame this item's local transform lives in:
    /// the parent entity for nodes, the owning effect for sub-objects.
    pub fn parent_affine(&self, world: &World) -> Affine3A {
        match *self {
            Selectable::Node(entity) => world
                .get::<ChildOf>(entity)
                .and_then(|child_of| world.get::<GlobalTransform>(child_of.0))
                .map(|tf| tf.affine())
                .unwrap_or(Affine3A::IDENTITY),
            Selectable::Emitter { effect, .. } | Selectable::Force { effect, .. } => world
                .get::<GlobalTransform>(effect)
                .map(|tf| tf.affine())
                .unwrap_or(Affine3A::IDENTITY),
        }
    }

    pub fn local_transform(&self, world: &World) -> Option<Transform> {
        match *self {
            Selectable::Node(entity) => world.get::<Transform>(entity).copied(),
            Selectable::Emitter { effect, index } => world
                .get::<ParticleEffect>(effect)
                .and_then(|fx| fx.emitter(index))
                .map(|slot| slot.transform),
            Selectable::Force { effect, index } => world
                .get::<ParticleEffect>(effect)
                .and_then(|fx| fx.force(index))
                .map(|slot| slot.transform),
        }
    }

    pub fn set_local_transform(&self, world: &mut World, transform: Transform) -> bool {
        match *self {
            Selectable::Node(entity) => {
                let Some(mut current) = world.get_mut::<Transform>(entity) else {
                    return false;
                };
                *current = transform;
                true
            }
            Selectable::Emitter { effect, index } => {
                let Some(mut fx) = world.get_mut::<ParticleEffect>(effect) else {
                    return false;
                };
                let Some(slot) = fx.emitters.get_mut(index) else {
                    return false;
                };
                slot.transform = transform;
                true
            }
            Selectable::Force { effect, index } => {
                let Some(mut fx) = world.get_mut::<ParticleEffect>(effect) else {
                    return false;
                };
                let Some(slot) = fx.forces.get_mut(index) else {
                    return false;
                };
                slot.transform = transform;
                true
            }
        }
    }

    /// Which transform modes this item accepts. Emitters reorient but never
    /// scale; forces only move.
    pub fn supports(&self, mode: GizmoMode) -> bool {
        match *self {
            Selectable::Node(_) => !matches!(mode, GizmoMode::Disabled),
            Selectable::Emitter { .. } => {
                matches!(mode, GizmoMode::Translate | GizmoMode::Rotate)
            }
            Selectable::Force { .. } => matches!(mode, GizmoMode::Translate),
        }
    }

    pub fn is_locked(&self, world: &World) -> bool {
        world.get::<Locked>(self.host()).is_some()
    }

    /// True when this item's world transform is a function of `other`'s:
    /// `other` hosts it, or is an ancestor of its host. Used to drop
    /// double-applied members from multi-object gestures.
    pub fn depends_on(&self, world: &World, other: &Selectable) -> bool {
        let Selectable::Node(other_entity) = *other else {
            return false;
        };
        let host = self.host();
        if !self.is_node() && host == other_entity {
            return true;
        }
        let mut current = host;
        while let Some(child_of) = world.get::<ChildOf>(current) {
            if child_of.0 == other_entity {
                return true;
            }
            current = child_of.0;
        }
        false
    }
}

/// Redirect a pick to the nearest ancestor flagged [`SolidPick`], if any.
pub fn resolve_solid_ancestor(world: &World, entity: Entity) -> Entity {
    let mut current = entity;
    loop {
        if world.get::<SolidPick>(current).is_some() {
            return current;
        }
        match world.get::<ChildOf>(current) {
            Some(child_of) => current = child_of.0,
            None => return entity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_world() -> World {
        World::new()
    }

    #[test]
    fn emitter_world_affine_composes_with_host() {
        let mut world = test_world();
        let mut fx = ParticleEffect::default();
        fx.emitters.push(crate::effect::EmitterSlot {
            transform: Transform::from_xyz(1.0, 0.0, 0.0),
            ..default()
        });
        let effect = world
            .spawn((
                fx,
                Transform::from_xyz(0.0, 2.0, 0.0),
                GlobalTransform::from(Transform::from_xyz(0.0, 2.0, 0.0)),
            ))
            .id();

        let emitter = Selectable::Emitter { effect, index: 0 };
        let affine = emitter.world_affine(&world).unwrap();
        let pos = affine.transform_point3(Vec3::ZERO);
        assert!((pos - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn sub_object_depends_on_its_host() {
        let mut world = test_world();
        let effect = world
            .spawn((ParticleEffect::default(), Transform::default()))
            .id();
        let emitter = Selectable::Emitter { effect, index: 0 };
        assert!(emitter.depends_on(&world, &Selectable::Node(effect)));
        assert!(!Selectable::Node(effect).depends_on(&world, &emitter));
    }

    #[test]
    fn child_node_depends_on_selected_ancestor() {
        let mut world = test_world();
        let parent = world.spawn(Transform::default()).id();
        let child = world.spawn((Transform::default(), ChildOf(parent))).id();
        let grandchild = world.spawn((Transform::default(), ChildOf(child))).id();

        let handle = Selectable::Node(grandchild);
        assert!(handle.depends_on(&world, &Selectable::Node(parent)));
        assert!(handle.depends_on(&world, &Selectable::Node(child)));
        assert!(!handle.depends_on(&world, &Selectable::Node(grandchild)));
    }

    #[test]
    fn solid_ancestor_redirects_descendant_picks() {
        let mut world = test_world();
        let root = world.spawn((Transform::default(), SolidPick)).id();
        let child = world.spawn((Transform::default(), ChildOf(root))).id();
        let loose = world.spawn(Transform::default()).id();

        assert_eq!(resolve_solid_ancestor(&world, child), root);
        assert_eq!(resolve_solid_ancestor(&world, loose), loose);
    }
}
