use std::sync::Mutex;

use bevy::prelude::*;

use crate::EditorEntity;
use crate::selectable::{Locked, Selectable};

pub struct CommandHistoryPlugin;

impl Plugin for CommandHistoryPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(CommandHistory::default())
            .add_systems(Update, handle_undo_redo_keys);
    }
}

// ---------------------------------------------------------------------------
// EditorCommand trait
// ---------------------------------------------------------------------------

pub trait EditorCommand: Send + Sync + 'static {
    fn execute(&self, world: &mut World);
    fn undo(&self, world: &mut World);
    fn description(&self) -> &str;
}

// ---------------------------------------------------------------------------
// CommandHistory resource
// ---------------------------------------------------------------------------

/// The undo-log sink. Gestures and tools never mutate history state directly;
/// they submit reversible commands here.
#[derive(Resource, Default)]
pub struct CommandHistory {
    pub undo_stack: Vec<Box<dyn EditorCommand>>,
    pub redo_stack: Vec<Box<dyn EditorCommand>>,
}

impl CommandHistory {
    pub fn execute(&mut self, command: Box<dyn EditorCommand>, world: &mut World) {
        command.execute(world);
        self.undo_stack.push(command);
        self.redo_stack.clear();
    }

    /// Record a command whose effect is already present in the world (live
    /// gesture edits push their final state this way).
    pub fn push_applied(&mut self, command: Box<dyn EditorCommand>) {
        self.undo_stack.push(command);
        self.redo_stack.clear();
    }

    pub fn undo(&mut self, world: &mut World) {
        if let Some(command) = self.undo_stack.pop() {
            command.undo(world);
            self.redo_stack.push(command);
        }
    }

    pub fn redo(&mut self, world: &mut World) {
        if let Some(command) = self.redo_stack.pop() {
            command.execute(world);
            self.undo_stack.push(command);
        }
    }
}

// ---------------------------------------------------------------------------
// CommandGroup — atomic multi-step command
// ---------------------------------------------------------------------------

pub struct CommandGroup {
    pub commands: Vec<Box<dyn EditorCommand>>,
    pub label: String,
}

impl EditorCommand for CommandGroup {
    fn execute(&self, world: &mut World) {
        for cmd in &self.commands {
            cmd.execute(world);
        }
    }

    fn undo(&self, world: &mut World) {
        for cmd in self.commands.iter().rev() {
            cmd.undo(world);
        }
    }

    fn description(&self) -> &str {
        &self.label
    }
}

/// Push a batch as one undo entry: single commands go in bare, several are
/// grouped so undo reverts them together.
pub fn push_batch(history: &mut CommandHistory, mut cmds: Vec<Box<dyn EditorCommand>>, label: &str) {
    match cmds.len() {
        0 => {}
        1 => history.push_applied(cmds.pop().unwrap()),
        _ => history.push_applied(Box::new(CommandGroup {
            commands: cmds,
            label: label.to_string(),
        })),
    }
}

// ---------------------------------------------------------------------------
// SetTransform
// ---------------------------------------------------------------------------

pub struct SetTransform {
    pub target: Selectable,
    pub old_transform: Transform,
    pub new_transform: Transform,
}

impl EditorCommand for SetTransform {
    fn execute(&self, world: &mut World) {
        self.target.set_local_transform(world, self.new_transform);
    }

    fn undo(&self, world: &mut World) {
        self.target.set_local_transform(world, self.old_transform);
    }

    fn description(&self) -> &str {
        "Set transform"
    }
}

// ---------------------------------------------------------------------------
// SetLockedFlag — propagates the pick/transform lock
// ---------------------------------------------------------------------------

pub struct SetLockedFlag {
    pub locked: bool,
    /// Per-entity previous state, so undo restores a mixed hierarchy exactly.
    pub previous: Vec<(Entity, bool)>,
}

impl SetLockedFlag {
    /// Capture `entity` and all descendants.
    pub fn for_hierarchy(world: &World, entity: Entity, locked: bool) -> Self {
        let mut previous = Vec::new();
        collect_lock_states(world, entity, &mut previous);
        Self { locked, previous }
    }
}

fn collect_lock_states(world: &World, entity: Entity, out: &mut Vec<(Entity, bool)>) {
    out.push((entity, world.get::<Locked>(entity).is_some()));
    if let Some(children) = world.get::<Children>(entity) {
        let children: Vec<Entity> = children.iter().collect();
        for child in children {
            collect_lock_states(world, child, out);
        }
    }
}

impl EditorCommand for SetLockedFlag {
    fn execute(&self, world: &mut World) {
        for &(entity, _) in &self.previous {
            let Ok(mut entity_mut) = world.get_entity_mut(entity) else {
                continue;
            };
            if self.locked {
                entity_mut.insert(Locked);
            } else {
                entity_mut.remove::<Locked>();
            }
        }
    }

    fn undo(&self, world: &mut World) {
        for &(entity, was_locked) in &self.previous {
            let Ok(mut entity_mut) = world.get_entity_mut(entity) else {
                continue;
            };
            if was_locked {
                entity_mut.insert(Locked);
            } else {
                entity_mut.remove::<Locked>();
            }
        }
    }

    fn description(&self) -> &str {
        if self.locked { "Lock transform" } else { "Unlock transform" }
    }
}

// ---------------------------------------------------------------------------
// BakePivot — move a node's pivot without moving anything visible
// ---------------------------------------------------------------------------

/// Shifts the node's pivot by `offset` (in its local frame): the node's local
/// transform absorbs the offset while mesh vertices and child transforms are
/// compensated the opposite way.
pub struct BakePivot {
    pub entity: Entity,
    pub offset: Vec3,
}

impl EditorCommand for BakePivot {
    fn execute(&self, world: &mut World) {
        bake_pivot_offset(world, self.entity, self.offset);
    }

    fn undo(&self, world: &mut World) {
        bake_pivot_offset(world, self.entity, -self.offset);
    }

    fn description(&self) -> &str {
        "Move pivot"
    }
}

fn bake_pivot_offset(world: &mut World, entity: Entity, offset: Vec3) {
    if let Some(mut transform) = world.get_mut::<Transform>(entity) {
        let shifted = *transform * Transform::from_translation(offset);
        *transform = shifted;
    }

    let children: Vec<Entity> = world
        .get::<Children>(entity)
        .map(|children| children.iter().collect())
        .unwrap_or_default();
    for child in children {
        if let Some(mut transform) = world.get_mut::<Transform>(child) {
            transform.translation -= offset;
        }
    }

    // Bake the compensation into render geometry when the node has any; a
    // node without a mesh is covered by the child adjustment alone.
    let mesh_handle = world.get::<Mesh3d>(entity).map(|mesh| mesh.0.clone());
    if let Some(handle) = mesh_handle {
        world.resource_scope(|_, mut meshes: Mut<Assets<Mesh>>| {
            let Some(mesh) = meshes.get_mut(&handle) else {
                return;
            };
            use bevy::mesh::VertexAttributeValues;
            if let Some(VertexAttributeValues::Float32x3(positions)) =
                mesh.attribute_mut(Mesh::ATTRIBUTE_POSITION)
            {
                for p in positions.iter_mut() {
                    p[0] -= offset.x;
                    p[1] -= offset.y;
                    p[2] -= offset.z;
                }
            }
        });
    }
}

// ---------------------------------------------------------------------------
// SpawnSnapshot — re-insertable record of a cloned subtree
// ---------------------------------------------------------------------------

/// Undo support for clone/duplicate: holds a scene snapshot of the spawned
/// subtree. Undo despawns it; redo writes the snapshot back as a fresh
/// subtree.
pub struct SpawnSnapshot {
    scene_snapshot: DynamicScene,
    root: Entity,
    parent: Option<Entity>,
    label: String,
    /// The currently live root for this snapshot, if any.
    live_root: Mutex<Option<Entity>>,
}

impl SpawnSnapshot {
    /// Snapshot an already-spawned subtree, typically right after cloning.
    pub fn from_world(world: &World, root: Entity, label: &str) -> Self {
        let parent = world.get::<ChildOf>(root).map(|child_of| child_of.0);
        Self {
            scene_snapshot: snapshot_entity(world, root),
            root,
            parent,
            label: label.to_string(),
            live_root: Mutex::new(Some(root)),
        }
    }
}

impl EditorCommand for SpawnSnapshot {
    fn execute(&self, world: &mut World) {
        let scene = snapshot_rebuild(&self.scene_snapshot);
        let mut entity_map = Default::default();
        if scene.write_to_world(world, &mut entity_map).is_err() {
            warn!("failed to respawn snapshot '{}'", self.label);
            return;
        }
        let Some(&new_root) = entity_map.get(&self.root) else {
            return;
        };
        match self.parent {
            Some(parent) if world.get_entity(parent).is_ok() => {
                world.entity_mut(new_root).insert(ChildOf(parent));
            }
            _ => {
                world.entity_mut(new_root).remove::<ChildOf>();
            }
        }
        *self.live_root.lock().unwrap() = Some(new_root);
    }

    fn undo(&self, world: &mut World) {
        if let Some(root) = self.live_root.lock().unwrap().take() {
            if let Ok(entity_mut) = world.get_entity_mut(root) {
                entity_mut.despawn();
            }
        }
    }

    fn description(&self) -> &str {
        &self.label
    }
}

// ---------------------------------------------------------------------------
// DespawnEntity — snapshots entity state via DynamicScene for undo
// ---------------------------------------------------------------------------

pub struct DespawnEntity {
    pub entity: Entity,
    pub scene_snapshot: DynamicScene,
    pub parent: Option<Entity>,
    pub label: String,
}

impl DespawnEntity {
    pub fn from_world(world: &World, entity: Entity) -> Self {
        let parent = world.get::<ChildOf>(entity).map(|c| c.0);
        let scene = snapshot_entity(world, entity);
        Self {
            entity,
            scene_snapshot: scene,
            parent,
            label: format!("Despawn entity {entity}"),
        }
    }
}

impl EditorCommand for DespawnEntity {
    fn execute(&self, world: &mut World) {
        if let Ok(entity_mut) = world.get_entity_mut(self.entity) {
            entity_mut.despawn();
        }
    }

    fn undo(&self, world: &mut World) {
        // Re-build the scene from scratch and write it back
        let scene = snapshot_rebuild(&self.scene_snapshot);
        let _result = scene.write_to_world(world, &mut Default::default());
    }

    fn description(&self) -> &str {
        &self.label
    }
}

/// Create a DynamicScene snapshot of a single entity and all its descendants.
pub(crate) fn snapshot_entity(world: &World, entity: Entity) -> DynamicScene {
    let mut entities = Vec::new();
    collect_entity_ids(world, entity, &mut entities);
    DynamicSceneBuilder::from_world(world)
        .extract_entities(entities.into_iter())
        .build()
}

pub fn collect_entity_ids(world: &World, entity: Entity, out: &mut Vec<Entity>) {
    out.push(entity);
    if let Some(children) = world.get::<Children>(entity) {
        for child in children.iter() {
            if world.get::<EditorEntity>(child).is_none() {
                collect_entity_ids(world, child, out);
            }
        }
    }
}

/// Rebuild a DynamicScene by copying its entity data (since DynamicScene doesn't impl Clone).
pub(crate) fn snapshot_rebuild(scene: &DynamicScene) -> DynamicScene {
    DynamicScene {
        resources: scene.resources.iter().map(|r| r.to_dynamic()).collect(),
        entities: scene
            .entities
            .iter()
            .map(|e| bevy::scene::DynamicEntity {
                entity: e.entity,
                components: e.components.iter().map(|c| c.to_dynamic()).collect(),
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Keyboard shortcut system
// ---------------------------------------------------------------------------

fn handle_undo_redo_keys(world: &mut World) {
    let keyboard = world.resource::<ButtonInput<KeyCode>>();
    let ctrl = keyboard.any_pressed([KeyCode::ControlLeft, KeyCode::ControlRight]);
    let shift = keyboard.any_pressed([KeyCode::ShiftLeft, KeyCode::ShiftRight]);
    let z_pressed = keyboard.just_pressed(KeyCode::KeyZ);

    if !ctrl || !z_pressed {
        return;
    }

    let mut history = world.resource_mut::<CommandHistory>();
    // Take ownership to avoid borrow conflict with world
    let command = if shift {
        history.redo_stack.pop()
    } else {
        history.undo_stack.pop()
    };

    if let Some(command) = command {
        if shift {
            command.execute(world);
            world
                .resource_mut::<CommandHistory>()
                .undo_stack
                .push(command);
        } else {
            command.undo(world);
            world
                .resource_mut::<CommandHistory>()
                .redo_stack
                .push(command);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_transform_round_trips() {
        let mut world = World::new();
        let entity = world.spawn(Transform::default()).id();
        let target = Selectable::Node(entity);

        let cmd = SetTransform {
            target,
            old_transform: Transform::default(),
            new_transform: Transform::from_xyz(5.0, 0.0, 0.0),
        };

        let mut history = CommandHistory::default();
        history.execute(Box::new(cmd), &mut world);
        assert_eq!(
            world.get::<Transform>(entity).unwrap().translation,
            Vec3::new(5.0, 0.0, 0.0)
        );

        history.undo(&mut world);
        assert_eq!(world.get::<Transform>(entity).unwrap().translation, Vec3::ZERO);

        history.redo(&mut world);
        assert_eq!(
            world.get::<Transform>(entity).unwrap().translation,
            Vec3::new(5.0, 0.0, 0.0)
        );
    }

    #[test]
    fn group_undoes_in_reverse() {
        let mut world = World::new();
        let a = world.spawn(Transform::default()).id();
        let b = world.spawn(Transform::default()).id();

        let group = CommandGroup {
            label: "Move both".to_string(),
            commands: vec![
                Box::new(SetTransform {
                    target: Selectable::Node(a),
                    old_transform: Transform::default(),
                    new_transform: Transform::from_xyz(1.0, 0.0, 0.0),
                }),
                Box::new(SetTransform {
                    target: Selectable::Node(b),
                    old_transform: Transform::default(),
                    new_transform: Transform::from_xyz(0.0, 2.0, 0.0),
                }),
            ],
        };

        let mut history = CommandHistory::default();
        history.execute(Box::new(group), &mut world);
        history.undo(&mut world);
        assert_eq!(world.get::<Transform>(a).unwrap().translation, Vec3::ZERO);
        assert_eq!(world.get::<Transform>(b).unwrap().translation, Vec3::ZERO);
    }

    #[test]
    fn lock_flag_restores_mixed_state() {
        let mut world = World::new();
        let parent = world.spawn(Transform::default()).id();
        let child = world.spawn((Transform::default(), ChildOf(parent), Locked)).id();

        let cmd = SetLockedFlag::for_hierarchy(&world, parent, true);
        let mut history = CommandHistory::default();
        history.execute(Box::new(cmd), &mut world);
        assert!(world.get::<Locked>(parent).is_some());
        assert!(world.get::<Locked>(child).is_some());

        history.undo(&mut world);
        assert!(world.get::<Locked>(parent).is_none());
        // The child was locked before and stays locked.
        assert!(world.get::<Locked>(child).is_some());
    }

    #[test]
    fn bake_pivot_keeps_children_in_place() {
        let mut world = World::new();
        let parent = world.spawn(Transform::from_xyz(1.0, 0.0, 0.0)).id();
        let child = world
            .spawn((Transform::from_xyz(0.5, 0.0, 0.0), ChildOf(parent)))
            .id();

        let offset = Vec3::new(2.0, 0.0, 0.0);
        let cmd = BakePivot { entity: parent, offset };
        let mut history = CommandHistory::default();
        history.execute(Box::new(cmd), &mut world);

        // Parent origin moved, child compensated: parent-frame position of the
        // child's content is unchanged.
        assert_eq!(
            world.get::<Transform>(parent).unwrap().translation,
            Vec3::new(3.0, 0.0, 0.0)
        );
        assert_eq!(
            world.get::<Transform>(child).unwrap().translation,
            Vec3::new(-1.5, 0.0, 0.0)
        );

        history.undo(&mut world);
        assert_eq!(
            world.get::<Transform>(parent).unwrap().translation,
            Vec3::new(1.0, 0.0, 0.0)
        );
        assert_eq!(
            world.get::<Transform>(child).unwrap().translation,
            Vec3::new(0.5, 0.0, 0.0)
        );
    }
}
