use std::collections::{HashMap, HashSet};

use avian3d::parry::math::{Point, Real, Vector};
use avian3d::parry::na::DMatrix;
use avian3d::parry::query::{Ray, RayCast};
use avian3d::parry::shape::{Cuboid, HeightField, TriMesh};
use bevy::math::Affine3A;
use bevy::mesh::{Indices, VertexAttributeValues};
use bevy::prelude::*;
use bevy::transform::TransformSystems;

use crate::EditorEntity;
use crate::bounds::Bounds3;
use crate::effect::ParticleEffect;
use crate::selectable::{ObjectKind, Selectable, object_kind};
use crate::selection::Selection;
use crate::terrain::Terrain;

pub struct ProxyPlugin;

impl Plugin for ProxyPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(ProxyRegistry::new(ProxyPolicy::default()))
            .add_systems(
                PostUpdate,
                (
                    queue_new_objects,
                    queue_moved_objects,
                    queue_shape_changes,
                    drain_pending_proxies,
                )
                    .chain()
                    .after(TransformSystems::Propagate),
            )
            .add_observer(on_object_removed);
    }
}

// ---------------------------------------------------------------------------
// Shape policy
// ---------------------------------------------------------------------------

/// Per-kind pick-shape sizing, owned by the registry instead of living in a
/// static table. Kinds without real geometry get an oriented box so they stay
/// clickable in the viewport.
#[derive(Clone, Debug)]
pub struct ProxyPolicy {
    pub box_half_extents: HashMap<ObjectKind, Vec3>,
    /// Floor applied to every local box so degenerate geometry stays pickable.
    pub min_half_extent: f32,
    /// Hits closer than this are discarded — they are inside the manipulator's
    /// own decoration box, not the scene.
    pub min_pick_distance: f32,
}

impl Default for ProxyPolicy {
    fn default() -> Self {
        let mut box_half_extents = HashMap::new();
        box_half_extents.insert(ObjectKind::Camera, Vec3::new(0.4, 0.3, 0.5));
        box_half_extents.insert(ObjectKind::Light, Vec3::splat(0.3));
        box_half_extents.insert(ObjectKind::Effect, Vec3::splat(0.4));
        box_half_extents.insert(ObjectKind::Waypoint, Vec3::splat(0.25));
        box_half_extents.insert(ObjectKind::Marker, Vec3::splat(0.2));
        box_half_extents.insert(ObjectKind::Empty, Vec3::splat(0.25));
        // Fallbacks while mesh/height data has not arrived yet.
        box_half_extents.insert(ObjectKind::Mesh, Vec3::splat(0.5));
        box_half_extents.insert(ObjectKind::Terrain, Vec3::splat(0.5));
        Self {
            box_half_extents,
            min_half_extent: 0.05,
            min_pick_distance: 0.1,
        }
    }
}

impl ProxyPolicy {
    fn box_for(&self, kind: ObjectKind) -> Vec3 {
        self.box_half_extents
            .get(&kind)
            .copied()
            .unwrap_or(Vec3::splat(0.25))
    }
}

// ---------------------------------------------------------------------------
// Proxies
// ---------------------------------------------------------------------------

enum ProxyShape {
    Box(Cuboid),
    Mesh(TriMesh),
    Heightfield(HeightField),
}

impl ProxyShape {
    fn cast_local_ray(&self, ray: &Ray, max_toi: Real) -> Option<Real> {
        match self {
            ProxyShape::Box(shape) => shape.cast_local_ray(ray, max_toi, true),
            ProxyShape::Mesh(shape) => shape.cast_local_ray(ray, max_toi, true),
            ProxyShape::Heightfield(shape) => shape.cast_local_ray(ray, max_toi, true),
        }
    }
}

/// A pick-only shape mirroring one [`Selectable`]. Never part of a stepped
/// physics world.
pub struct CollisionProxy {
    shape: ProxyShape,
    local_bounds: Bounds3,
    world_from_local: Affine3A,
    kind: ObjectKind,
}

impl CollisionProxy {
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn local_bounds(&self) -> Bounds3 {
        self.local_bounds
    }

    pub fn world_bounds(&self) -> Bounds3 {
        self.local_bounds.transformed_by(&self.world_from_local)
    }
}

/// A single ray intersection, in world units.
#[derive(Clone, Copy, Debug)]
pub struct RayHit {
    pub target: Selectable,
    pub distance: f32,
    pub point: Vec3,
}

/// A clipping half-space; points with `signed_distance >= 0` are inside.
#[derive(Clone, Copy, Debug)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }

    /// Plane through three points, normal oriented by winding.
    pub fn from_points(a: Vec3, b: Vec3, c: Vec3) -> Self {
        let normal = (b - a).cross(c - a).normalize_or_zero();
        Self {
            normal,
            d: -normal.dot(a),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One pickable shape per scene object, mirroring the scene graph.
///
/// Mutations are requested into three pending sets and committed by a single
/// drain per frame: removes apply before adds, so a remove+add requested for
/// the same object in one frame is a recreate, while an add immediately taken
/// back cancels out at request time. Repeated same-frame requests coalesce.
#[derive(Resource)]
pub struct ProxyRegistry {
    policy: ProxyPolicy,
    proxies: HashMap<Selectable, CollisionProxy>,
    pending_add: HashSet<Selectable>,
    pending_remove: HashSet<Selectable>,
    pending_refresh: HashSet<Selectable>,
}

impl ProxyRegistry {
    pub fn new(policy: ProxyPolicy) -> Self {
        Self {
            policy,
            proxies: HashMap::new(),
            pending_add: HashSet::new(),
            pending_remove: HashSet::new(),
            pending_refresh: HashSet::new(),
        }
    }

    pub fn policy(&self) -> &ProxyPolicy {
        &self.policy
    }

    pub fn contains(&self, item: &Selectable) -> bool {
        self.proxies.contains_key(item)
    }

    pub fn proxy(&self, item: &Selectable) -> Option<&CollisionProxy> {
        self.proxies.get(item)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn local_bounds(&self, item: &Selectable) -> Option<Bounds3> {
        self.proxies.get(item).map(|proxy| proxy.local_bounds)
    }

    // -- pending mutations --------------------------------------------------

    pub fn request_add(&mut self, item: Selectable) {
        self.pending_add.insert(item);
    }

    pub fn request_remove(&mut self, item: Selectable) {
        // An add requested earlier this frame for an object that never had a
        // proxy cancels instead of round-tripping through the map.
        if self.pending_add.remove(&item) && !self.proxies.contains_key(&item) {
            self.pending_refresh.remove(&item);
            return;
        }
        self.pending_refresh.remove(&item);
        self.pending_remove.insert(item);
    }

    pub fn request_refresh(&mut self, item: Selectable) {
        if self.pending_add.contains(&item) || self.pending_remove.contains(&item) {
            return;
        }
        self.pending_refresh.insert(item);
    }

    /// Re-evaluate an object and its nested sub-objects: shape-affecting
    /// changes recreate the whole sub-hierarchy, anything else only refreshes
    /// placements.
    pub fn request_update(&mut self, world: &World, entity: Entity, force_recreate: bool) {
        for item in enumerate_object(world, entity) {
            if force_recreate {
                self.request_remove(item);
                self.request_add(item);
            } else {
                self.request_refresh(item);
            }
        }
        if force_recreate {
            if let Some(children) = world.get::<Children>(entity) {
                let children: Vec<Entity> = children.iter().collect();
                for child in children {
                    self.request_update(world, child, true);
                }
            }
        }
    }

    /// Remove an object's proxies along with all descendants'.
    pub fn request_remove_hierarchy(&mut self, world: &World, entity: Entity) {
        for item in enumerate_object(world, entity) {
            self.request_remove(item);
        }
        if let Some(children) = world.get::<Children>(entity) {
            let children: Vec<Entity> = children.iter().collect();
            for child in children {
                self.request_remove_hierarchy(world, child);
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_add.is_empty()
            || !self.pending_remove.is_empty()
            || !self.pending_refresh.is_empty()
    }

    /// Commit all pending requests. Called once per frame; removes are applied
    /// before adds so recreates observe a clean slate.
    pub fn drain(&mut self, world: &World) {
        for item in std::mem::take(&mut self.pending_remove) {
            self.proxies.remove(&item);
            self.pending_refresh.remove(&item);
        }

        for item in std::mem::take(&mut self.pending_add) {
            if !item.exists(world) {
                continue;
            }
            self.build_proxy(world, item);
            // Adding an effect node also mirrors its sub-objects.
            if let Selectable::Node(entity) = item {
                for sub in enumerate_sub_objects(world, entity) {
                    self.build_proxy(world, sub);
                }
            }
            self.pending_refresh.remove(&item);
        }

        for item in std::mem::take(&mut self.pending_refresh) {
            let Some(affine) = item.world_affine(world) else {
                continue;
            };
            if let Some(proxy) = self.proxies.get_mut(&item) {
                proxy.world_from_local = affine;
            }
        }
    }

    fn build_proxy(&mut self, world: &World, item: Selectable) {
        let Some(world_from_local) = item.world_affine(world) else {
            return;
        };
        let proxy = match item {
            Selectable::Node(entity) => {
                let kind = object_kind(world, entity);
                let (shape, local_bounds) = self.node_shape(world, entity, kind);
                CollisionProxy {
                    shape,
                    local_bounds,
                    world_from_local,
                    kind,
                }
            }
            Selectable::Emitter { effect, index } => {
                let Some(radius) = world
                    .get::<ParticleEffect>(effect)
                    .and_then(|fx| fx.emitter(index))
                    .map(|slot| slot.radius)
                else {
                    return;
                };
                self.sub_object_proxy(radius, world_from_local)
            }
            Selectable::Force { effect, index } => {
                let Some(radius) = world
                    .get::<ParticleEffect>(effect)
                    .and_then(|fx| fx.force(index))
                    .map(|slot| slot.radius)
                else {
                    return;
                };
                self.sub_object_proxy(radius, world_from_local)
            }
        };
        self.proxies.insert(item, proxy);
    }

    fn sub_object_proxy(&self, radius: f32, world_from_local: Affine3A) -> CollisionProxy {
        let half = radius.max(self.policy.min_half_extent);
        CollisionProxy {
            shape: ProxyShape::Box(Cuboid::new(Vector::new(half, half, half))),
            local_bounds: Bounds3::from_half_extents(Vec3::splat(half)),
            world_from_local,
            kind: ObjectKind::Effect,
        }
    }

    fn node_shape(&self, world: &World, entity: Entity, kind: ObjectKind) -> (ProxyShape, Bounds3) {
        match kind {
            ObjectKind::Mesh => {
                if let Some((shape, bounds)) = mesh_shape(world, entity, &self.policy) {
                    return (shape, bounds);
                }
                self.policy_box(kind)
            }
            ObjectKind::Terrain => {
                let terrain = world
                    .get::<Terrain>(entity)
                    .expect("terrain kind implies terrain component");
                if terrain.has_heights() {
                    heightfield_shape(terrain)
                } else {
                    // No height data authored yet: keep the patch pickable.
                    self.policy_box(kind)
                }
            }
            _ => self.policy_box(kind),
        }
    }

    fn policy_box(&self, kind: ObjectKind) -> (ProxyShape, Bounds3) {
        let half = self
            .policy
            .box_for(kind)
            .max(Vec3::splat(self.policy.min_half_extent));
        (
            ProxyShape::Box(Cuboid::new(Vector::new(half.x, half.y, half.z))),
            Bounds3::from_half_extents(half),
        )
    }

    // -- queries ------------------------------------------------------------

    /// All non-terrain intersections along `from -> to`, strictly ordered by
    /// ascending distance, skipping anything inside the decoration threshold.
    pub fn ray_test(&self, from: Vec3, to: Vec3) -> Vec<RayHit> {
        let dir = to - from;
        let length = dir.length();
        if length <= f32::EPSILON {
            return Vec::new();
        }

        let mut hits = Vec::new();
        for (item, proxy) in &self.proxies {
            if proxy.kind == ObjectKind::Terrain {
                continue;
            }
            let Some(toi) = cast_proxy(proxy, from, dir) else {
                continue;
            };
            let distance = toi * length;
            if distance < self.policy.min_pick_distance {
                continue;
            }
            hits.push(RayHit {
                target: *item,
                distance,
                point: from + dir * toi,
            });
        }
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }

    /// Single intersection against the terrain shape only.
    pub fn terrain_ray_test(&self, from: Vec3, to: Vec3) -> Option<RayHit> {
        let dir = to - from;
        let length = dir.length();
        if length <= f32::EPSILON {
            return None;
        }

        let mut best: Option<RayHit> = None;
        for (item, proxy) in &self.proxies {
            if proxy.kind != ObjectKind::Terrain {
                continue;
            }
            let Some(toi) = cast_proxy(proxy, from, dir) else {
                continue;
            };
            let hit = RayHit {
                target: *item,
                distance: toi * length,
                point: from + dir * toi,
            };
            if best.is_none_or(|current| hit.distance < current.distance) {
                best = Some(hit);
            }
        }
        best
    }

    /// Everything not entirely behind any of the four planes. Boxes clip by
    /// their eight corners; meshes re-test per triangle and accept on the
    /// first one that survives. Terrain never box-selects.
    pub fn clip_to_frustum(&self, planes: &[Plane; 4]) -> Vec<Selectable> {
        let mut out = Vec::new();
        for (item, proxy) in &self.proxies {
            if proxy.kind == ObjectKind::Terrain {
                continue;
            }
            let corners = proxy
                .local_bounds
                .corners()
                .map(|c| proxy.world_from_local.transform_point3(c));
            if corners_survive(&corners, planes) {
                match &proxy.shape {
                    ProxyShape::Mesh(mesh) => {
                        if mesh_survives(mesh, &proxy.world_from_local, planes) {
                            out.push(*item);
                        }
                    }
                    _ => out.push(*item),
                }
            }
        }
        out
    }
}

fn cast_proxy(proxy: &CollisionProxy, from: Vec3, dir: Vec3) -> Option<f32> {
    let inverse = proxy.world_from_local.inverse();
    let origin = inverse.transform_point3(from);
    let direction = inverse.transform_vector3(dir);
    let ray = Ray::new(
        Point::new(origin.x, origin.y, origin.z),
        Vector::new(direction.x, direction.y, direction.z),
    );
    // The local direction keeps the segment parameterization, so toi stays in
    // [0, 1] over the world-space segment.
    proxy.shape.cast_local_ray(&ray, 1.0)
}

fn corners_survive(corners: &[Vec3; 8], planes: &[Plane; 4]) -> bool {
    for plane in planes {
        if corners
            .iter()
            .all(|&corner| plane.signed_distance(corner) < 0.0)
        {
            return false;
        }
    }
    true
}

fn mesh_survives(mesh: &TriMesh, world_from_local: &Affine3A, planes: &[Plane; 4]) -> bool {
    let vertices = mesh.vertices();
    for triangle in mesh.indices() {
        let points = (*triangle).map(|i| {
            let v = vertices[i as usize];
            world_from_local.transform_point3(Vec3::new(v.x, v.y, v.z))
        });
        let clipped = planes
            .iter()
            .any(|plane| points.iter().all(|&p| plane.signed_distance(p) < 0.0));
        if !clipped {
            return true;
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Shape building
// ---------------------------------------------------------------------------

fn mesh_shape(world: &World, entity: Entity, policy: &ProxyPolicy) -> Option<(ProxyShape, Bounds3)> {
    let handle = world.get::<Mesh3d>(entity)?;
    let meshes = world.get_resource::<Assets<Mesh>>()?;
    let mesh = meshes.get(&handle.0)?;

    let positions = mesh
        .attribute(Mesh::ATTRIBUTE_POSITION)
        .and_then(VertexAttributeValues::as_float3)?;
    let points: Vec<Point<Real>> = positions
        .iter()
        .map(|p| Point::new(p[0], p[1], p[2]))
        .collect();

    let bounds = Bounds3::from_points(positions.iter().map(|p| Vec3::from_array(*p)))?
        .with_min_half_extents(policy.min_half_extent);

    let indices: Vec<[u32; 3]> = match mesh.indices() {
        Some(Indices::U16(raw)) => raw
            .chunks_exact(3)
            .map(|c| [c[0] as u32, c[1] as u32, c[2] as u32])
            .collect(),
        Some(Indices::U32(raw)) => raw.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect(),
        None => (0..points.len() as u32 / 3)
            .map(|i| [i * 3, i * 3 + 1, i * 3 + 2])
            .collect(),
    };

    match TriMesh::new(points, indices) {
        Ok(trimesh) => Some((ProxyShape::Mesh(trimesh), bounds)),
        // Degenerate geometry still gets a pickable box around its extents.
        Err(_) => Some((
            ProxyShape::Box(Cuboid::new(Vector::new(
                bounds.half_extents().x,
                bounds.half_extents().y,
                bounds.half_extents().z,
            ))),
            bounds,
        )),
    }
}

fn heightfield_shape(terrain: &Terrain) -> (ProxyShape, Bounds3) {
    let heights = DMatrix::from_fn(terrain.rows, terrain.columns, |row, column| {
        terrain.sample(row, column)
    });
    let (min_h, max_h) = terrain
        .heights
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &h| {
            (lo.min(h), hi.max(h))
        });
    let width = terrain.width();
    let depth = terrain.depth();
    let field = HeightField::new(heights, Vector::new(width, 1.0, depth));
    (
        ProxyShape::Heightfield(field),
        Bounds3::new(
            Vec3::new(-width * 0.5, min_h, -depth * 0.5),
            Vec3::new(width * 0.5, max_h, depth * 0.5),
        ),
    )
}

// ---------------------------------------------------------------------------
// Object enumeration
// ---------------------------------------------------------------------------

/// The object's own handle plus its nested sub-object handles.
fn enumerate_object(world: &World, entity: Entity) -> Vec<Selectable> {
    let mut items = vec![Selectable::Node(entity)];
    items.extend(enumerate_sub_objects(world, entity));
    items
}

fn enumerate_sub_objects(world: &World, entity: Entity) -> Vec<Selectable> {
    let mut items = Vec::new();
    if let Some(fx) = world.get::<ParticleEffect>(entity) {
        for index in 0..fx.emitters.len() {
            items.push(Selectable::Emitter {
                effect: entity,
                index,
            });
        }
        for index in 0..fx.forces.len() {
            items.push(Selectable::Force {
                effect: entity,
                index,
            });
        }
    }
    items
}

// ---------------------------------------------------------------------------
// Hierarchy bounds
// ---------------------------------------------------------------------------

/// The object's local box recursively unioned with each child's box brought
/// into the object's frame.
pub fn hierarchy_bounds_local(
    world: &World,
    registry: &ProxyRegistry,
    entity: Entity,
) -> Option<Bounds3> {
    let mut bounds = registry.local_bounds(&Selectable::Node(entity));
    if let Some(children) = world.get::<Children>(entity) {
        for child in children.iter() {
            let Some(child_bounds) = hierarchy_bounds_local(world, registry, child) else {
                continue;
            };
            let child_local = world
                .get::<Transform>(child)
                .map(|t| t.compute_affine())
                .unwrap_or(Affine3A::IDENTITY);
            let in_parent = child_bounds.transformed_by(&child_local);
            bounds = Some(match bounds {
                Some(total) => total.union(&in_parent),
                None => in_parent,
            });
        }
    }
    bounds
}

/// World-space hierarchy bounds of any selectable item.
pub fn hierarchy_bounds(
    world: &World,
    registry: &ProxyRegistry,
    item: &Selectable,
) -> Option<Bounds3> {
    match *item {
        Selectable::Node(entity) => {
            let local = hierarchy_bounds_local(world, registry, entity)?;
            let affine = item.world_affine(world)?;
            Some(local.transformed_by(&affine))
        }
        _ => {
            let local = registry.local_bounds(item)?;
            let affine = item.world_affine(world)?;
            Some(local.transformed_by(&affine))
        }
    }
}

// ---------------------------------------------------------------------------
// Frame systems — dirty notifications feeding the pending sets
// ---------------------------------------------------------------------------

fn queue_new_objects(
    new_objects: Query<Entity, (Added<Transform>, Without<EditorEntity>)>,
    mut registry: ResMut<ProxyRegistry>,
) {
    for entity in &new_objects {
        registry.request_add(Selectable::Node(entity));
    }
}

fn queue_moved_objects(
    moved: Query<Entity, (Changed<GlobalTransform>, Without<EditorEntity>)>,
    effects: Query<&ParticleEffect>,
    selected: Query<(), With<crate::selection::Selected>>,
    mut registry: ResMut<ProxyRegistry>,
    mut selection: ResMut<Selection>,
) {
    let mut any_selected_moved = false;
    for entity in &moved {
        registry.request_refresh(Selectable::Node(entity));
        if let Ok(fx) = effects.get(entity) {
            for index in 0..fx.emitters.len() {
                registry.request_refresh(Selectable::Emitter {
                    effect: entity,
                    index,
                });
            }
            for index in 0..fx.forces.len() {
                registry.request_refresh(Selectable::Force {
                    effect: entity,
                    index,
                });
            }
        }
        if selected.contains(entity) {
            any_selected_moved = true;
        }
    }
    if any_selected_moved {
        // Membership didn't change; don't ping selection observers.
        selection.bypass_change_detection().invalidate_bounds();
    }
}

fn queue_shape_changes(
    mut mesh_events: MessageReader<AssetEvent<Mesh>>,
    mesh_entities: Query<(Entity, &Mesh3d), Without<EditorEntity>>,
    changed_terrains: Query<Entity, (Changed<Terrain>, Without<EditorEntity>)>,
    changed_effects: Query<Entity, (Changed<ParticleEffect>, Without<EditorEntity>)>,
    children: Query<&Children>,
    effects: Query<&ParticleEffect>,
    mut registry: ResMut<ProxyRegistry>,
) {
    // Mesh asset edits invalidate every proxy built from that mesh.
    let modified: Vec<AssetId<Mesh>> = mesh_events
        .read()
        .filter_map(|event| match event {
            AssetEvent::Modified { id } => Some(*id),
            _ => None,
        })
        .collect();

    let mut recreate: Vec<Entity> = Vec::new();
    if !modified.is_empty() {
        for (entity, mesh) in &mesh_entities {
            if modified.contains(&mesh.0.id()) {
                recreate.push(entity);
            }
        }
    }

    // Terrain height edits and effect slot edits rebuild their sub-hierarchy.
    recreate.extend(&changed_terrains);
    recreate.extend(&changed_effects);

    for entity in recreate {
        recreate_hierarchy(&mut registry, entity, &children, &effects);
    }
}

fn recreate_hierarchy(
    registry: &mut ProxyRegistry,
    entity: Entity,
    children: &Query<&Children>,
    effects: &Query<&ParticleEffect>,
) {
    registry.request_remove(Selectable::Node(entity));
    registry.request_add(Selectable::Node(entity));
    if let Ok(fx) = effects.get(entity) {
        for index in 0..fx.emitters.len() {
            let item = Selectable::Emitter {
                effect: entity,
                index,
            };
            registry.request_remove(item);
            registry.request_add(item);
        }
        for index in 0..fx.forces.len() {
            let item = Selectable::Force {
                effect: entity,
                index,
            };
            registry.request_remove(item);
            registry.request_add(item);
        }
    }
    if let Ok(kids) = children.get(entity) {
        for child in kids.iter() {
            recreate_hierarchy(registry, child, children, effects);
        }
    }
}

fn drain_pending_proxies(world: &mut World) {
    world.resource_scope(|world, mut registry: Mut<ProxyRegistry>| {
        if registry.has_pending() {
            registry.drain(world);
        }
    });
}

fn on_object_removed(
    trigger: On<Remove, Transform>,
    editor_entities: Query<(), With<EditorEntity>>,
    effects: Query<&ParticleEffect>,
    mut registry: ResMut<ProxyRegistry>,
) {
    let entity = trigger.event_target();
    if editor_entities.contains(entity) {
        return;
    }
    registry.request_remove(Selectable::Node(entity));
    if let Ok(fx) = effects.get(entity) {
        for index in 0..fx.emitters.len() {
            registry.request_remove(Selectable::Emitter {
                effect: entity,
                index,
            });
        }
        for index in 0..fx.forces.len() {
            registry.request_remove(Selectable::Force {
                effect: entity,
                index,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selectable::Waypoint;

    fn spawn_at(world: &mut World, pos: Vec3) -> Entity {
        world
            .spawn((
                Waypoint,
                Transform::from_translation(pos),
                GlobalTransform::from(Transform::from_translation(pos)),
            ))
            .id()
    }

    fn registry() -> ProxyRegistry {
        ProxyRegistry::new(ProxyPolicy::default())
    }

    #[test]
    fn add_then_remove_before_drain_cancels() {
        let mut world = World::new();
        let entity = spawn_at(&mut world, Vec3::ZERO);
        let item = Selectable::Node(entity);

        let mut registry = registry();
        registry.request_add(item);
        registry.request_remove(item);
        registry.drain(&world);
        assert!(!registry.contains(&item));
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_then_add_recreates() {
        let mut world = World::new();
        let entity = spawn_at(&mut world, Vec3::ZERO);
        let item = Selectable::Node(entity);

        let mut registry = registry();
        registry.request_add(item);
        registry.drain(&world);
        assert!(registry.contains(&item));

        registry.request_remove(item);
        registry.request_add(item);
        registry.drain(&world);
        assert!(registry.contains(&item));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn repeated_requests_are_idempotent() {
        let mut world = World::new();
        let entity = spawn_at(&mut world, Vec3::ZERO);
        let item = Selectable::Node(entity);

        let mut registry = registry();
        for _ in 0..4 {
            registry.request_add(item);
            registry.request_refresh(item);
        }
        registry.drain(&world);
        assert_eq!(registry.len(), 1);
        assert!(!registry.has_pending());
    }

    #[test]
    fn update_without_recreate_only_refreshes_placement() {
        let mut world = World::new();
        let entity = spawn_at(&mut world, Vec3::ZERO);
        let item = Selectable::Node(entity);

        let mut registry = registry();
        registry.request_add(item);
        registry.drain(&world);

        // The object moved; a plain update refreshes the proxy in place.
        world
            .entity_mut(entity)
            .insert(GlobalTransform::from(Transform::from_xyz(4.0, 0.0, 0.0)));
        registry.request_update(&world, entity, false);
        registry.drain(&world);

        let hits = registry.ray_test(Vec3::new(4.0, 0.0, 10.0), Vec3::new(4.0, 0.0, -10.0));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].target, item);

        // Force-recreate goes through remove+add and still lands once.
        registry.request_update(&world, entity, true);
        registry.drain(&world);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn ray_hits_sorted_ascending_and_thresholded() {
        let mut world = World::new();
        let near = spawn_at(&mut world, Vec3::new(0.0, 0.0, -2.0));
        let far = spawn_at(&mut world, Vec3::new(0.0, 0.0, -6.0));
        // Inside the decoration threshold once the box surface is this close.
        let too_close = spawn_at(&mut world, Vec3::new(0.0, 0.0, -0.05));

        let mut registry = registry();
        registry.request_add(Selectable::Node(near));
        registry.request_add(Selectable::Node(far));
        registry.request_add(Selectable::Node(too_close));
        registry.drain(&world);

        let hits = registry.ray_test(Vec3::ZERO, Vec3::new(0.0, 0.0, -20.0));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].target, Selectable::Node(near));
        assert_eq!(hits[1].target, Selectable::Node(far));
        assert!(hits[0].distance < hits[1].distance);
    }

    #[test]
    fn ray_ignores_terrain_but_terrain_ray_finds_it() {
        let mut world = World::new();
        let terrain = world
            .spawn((
                Terrain::flat(8, 8, 1.0, 1.5),
                Transform::default(),
                GlobalTransform::default(),
            ))
            .id();

        let mut registry = registry();
        registry.request_add(Selectable::Node(terrain));
        registry.drain(&world);

        let from = Vec3::new(0.0, 10.0, 0.0);
        let to = Vec3::new(0.0, -10.0, 0.0);
        assert!(registry.ray_test(from, to).is_empty());

        let hit = registry.terrain_ray_test(from, to).unwrap();
        assert_eq!(hit.target, Selectable::Node(terrain));
        assert!((hit.point.y - 1.5).abs() < 1e-3);
    }

    #[test]
    fn frustum_clip_accepts_inside_and_is_idempotent() {
        let mut world = World::new();
        let inside = spawn_at(&mut world, Vec3::ZERO);
        let outside = spawn_at(&mut world, Vec3::new(10.0, 0.0, 0.0));

        let mut registry = registry();
        registry.request_add(Selectable::Node(inside));
        registry.request_add(Selectable::Node(outside));
        registry.drain(&world);

        // An axis-aligned column around the origin.
        let planes = [
            Plane { normal: Vec3::X, d: 1.0 },
            Plane { normal: -Vec3::X, d: 1.0 },
            Plane { normal: Vec3::Y, d: 1.0 },
            Plane { normal: -Vec3::Y, d: 1.0 },
        ];
        let first = registry.clip_to_frustum(&planes);
        assert_eq!(first, vec![Selectable::Node(inside)]);

        let second = registry.clip_to_frustum(&planes);
        assert_eq!(first, second);
    }

    #[test]
    fn effect_add_mirrors_sub_objects() {
        let mut world = World::new();
        let mut fx = ParticleEffect::default();
        fx.emitters.push(crate::effect::EmitterSlot::default());
        fx.forces.push(crate::effect::ForceSlot::default());
        let effect = world
            .spawn((fx, Transform::default(), GlobalTransform::default()))
            .id();

        let mut registry = registry();
        registry.request_add(Selectable::Node(effect));
        registry.drain(&world);

        assert_eq!(registry.len(), 3);
        assert!(registry.contains(&Selectable::Emitter { effect, index: 0 }));
        assert!(registry.contains(&Selectable::Force { effect, index: 0 }));
    }

    #[test]
    fn hierarchy_bounds_union_children() {
        let mut world = World::new();
        let parent = spawn_at(&mut world, Vec3::ZERO);
        let child = world
            .spawn((
                Waypoint,
                Transform::from_xyz(3.0, 0.0, 0.0),
                GlobalTransform::from(Transform::from_xyz(3.0, 0.0, 0.0)),
                ChildOf(parent),
            ))
            .id();

        let mut registry = registry();
        registry.request_add(Selectable::Node(parent));
        registry.request_add(Selectable::Node(child));
        registry.drain(&world);

        let bounds = hierarchy_bounds(&world, &registry, &Selectable::Node(parent)).unwrap();
        // Parent box plus the child box shifted +3 on X.
        assert!(bounds.max.x > 3.0);
        assert!(bounds.min.x < 0.0);
    }
}
