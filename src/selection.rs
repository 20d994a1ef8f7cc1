use std::sync::atomic::{AtomicU32, Ordering};

use bevy::prelude::*;

use crate::bounds::Bounds3;
use crate::proxy::{ProxyRegistry, hierarchy_bounds};
use crate::selectable::Selectable;

pub struct SelectionPlugin;

impl Plugin for SelectionPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(Selection::default())
            .add_message::<SelectionChanged>()
            .add_systems(PostUpdate, notify_selection_changed)
            .add_observer(on_selected_removed);
    }
}

/// Marker component placed on the host entity of every selected item.
#[derive(Component)]
pub struct Selected;

/// Broadcast after any frame in which the selection set changed.
#[derive(Message, Default)]
pub struct SelectionChanged;

/// How a resolved pick combines with the existing selection.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Combine {
    #[default]
    Replace,
    Add,
    Remove,
}

/// Resource tracking the full selection state: an ordered, duplicate-free
/// list of [`Selectable`] handles plus a lazily rebuilt aggregate bounds.
///
/// The view-lock counter is a re-entrancy guard, not a thread lock: while a
/// typed view handed out by [`Selection::nodes`] is alive, mutation is a
/// caller bug and is rejected.
#[derive(Resource, Default)]
pub struct Selection {
    items: Vec<Selectable>,
    cached_bounds: Option<Bounds3>,
    view_locks: AtomicU32,
}

impl Selection {
    pub fn items(&self) -> &[Selectable] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Get the primary (last) selected item.
    pub fn primary(&self) -> Option<Selectable> {
        self.items.last().copied()
    }

    pub fn is_selected(&self, item: &Selectable) -> bool {
        self.items.contains(item)
    }

    /// Iterate the node entities in the selection. The returned view holds
    /// the re-entrancy lock until dropped.
    pub fn nodes(&self) -> NodeView<'_> {
        self.view_locks.fetch_add(1, Ordering::Relaxed);
        NodeView {
            selection: self,
            index: 0,
        }
    }

    fn locked_for_views(&self) -> bool {
        self.view_locks.load(Ordering::Relaxed) > 0
    }

    fn guard_mutation(&self) -> bool {
        let locked = self.locked_for_views();
        debug_assert!(!locked, "selection mutated while a typed view is held");
        !locked
    }

    /// Select a single item, clearing all others.
    pub fn select_single(&mut self, commands: &mut Commands, item: Selectable) {
        if !self.guard_mutation() {
            return;
        }
        for existing in &self.items {
            if *existing != item {
                if let Ok(mut ec) = commands.get_entity(existing.host()) {
                    ec.remove::<Selected>();
                }
            }
        }
        self.items.clear();
        self.items.push(item);
        self.cached_bounds = None;
        commands.entity(item.host()).insert(Selected);
    }

    /// Toggle membership of an item (Ctrl+Click behavior).
    pub fn toggle(&mut self, commands: &mut Commands, item: Selectable) {
        if !self.guard_mutation() {
            return;
        }
        if let Some(pos) = self.items.iter().position(|existing| *existing == item) {
            self.items.remove(pos);
            self.cached_bounds = None;
            // Another selected item may share the host (an effect and one of
            // its emitters); only drop the marker once the host is gone.
            if !self.items.iter().any(|other| other.host() == item.host()) {
                if let Ok(mut ec) = commands.get_entity(item.host()) {
                    ec.remove::<Selected>();
                }
            }
        } else {
            self.items.push(item);
            self.cached_bounds = None;
            commands.entity(item.host()).insert(Selected);
        }
    }

    /// Extend selection to include an item (without removing others).
    pub fn extend(&mut self, commands: &mut Commands, item: Selectable) {
        if !self.guard_mutation() {
            return;
        }
        if !self.items.contains(&item) {
            self.items.push(item);
            self.cached_bounds = None;
            commands.entity(item.host()).insert(Selected);
        }
    }

    pub fn remove(&mut self, commands: &mut Commands, item: &Selectable) {
        if !self.guard_mutation() {
            return;
        }
        if let Some(pos) = self.items.iter().position(|existing| existing == item) {
            self.items.remove(pos);
            self.cached_bounds = None;
            if !self.items.iter().any(|other| other.host() == item.host()) {
                if let Ok(mut ec) = commands.get_entity(item.host()) {
                    ec.remove::<Selected>();
                }
            }
        }
    }

    /// Clear all selection.
    pub fn clear(&mut self, commands: &mut Commands) {
        if !self.guard_mutation() {
            return;
        }
        for item in &self.items {
            if let Ok(mut ec) = commands.get_entity(item.host()) {
                ec.remove::<Selected>();
            }
        }
        self.items.clear();
        self.cached_bounds = None;
    }

    /// Replace the whole selection at once (box select).
    pub fn select_multiple(&mut self, commands: &mut Commands, items: &[Selectable]) {
        self.clear(commands);
        for &item in items {
            self.extend(commands, item);
        }
    }

    /// Apply a box-select result with the given combine mode.
    pub fn apply_combine(&mut self, commands: &mut Commands, mode: Combine, items: &[Selectable]) {
        match mode {
            Combine::Replace => self.select_multiple(commands, items),
            Combine::Add => {
                for &item in items {
                    self.extend(commands, item);
                }
            }
            Combine::Remove => {
                for item in items {
                    self.remove(commands, item);
                }
            }
        }
    }

    /// Drop the cached aggregate bounds; the next [`Selection::bounds`] call
    /// rebuilds it. Called when selection membership or member transforms
    /// change.
    pub fn invalidate_bounds(&mut self) {
        self.cached_bounds = None;
    }

    /// The world-space bounds of the whole selection, rebuilt on demand from
    /// the proxy registry's per-object hierarchy bounds.
    pub fn bounds(&mut self, world: &World, registry: &ProxyRegistry) -> Option<Bounds3> {
        if let Some(cached) = self.cached_bounds {
            return Some(cached);
        }
        let mut aggregate: Option<Bounds3> = None;
        for item in &self.items {
            let Some(item_bounds) = hierarchy_bounds(world, registry, item) else {
                continue;
            };
            aggregate = Some(match aggregate {
                Some(total) => total.union(&item_bounds),
                None => item_bounds,
            });
        }
        self.cached_bounds = aggregate;
        aggregate
    }

    /// Drop handles whose host entity is gone.
    fn purge_host(&mut self, entity: Entity) {
        if !self.guard_mutation() {
            return;
        }
        self.items.retain(|item| item.host() != entity);
        self.cached_bounds = None;
    }
}

/// Iterator over the node entities of the selection; holds the view lock.
pub struct NodeView<'a> {
    selection: &'a Selection,
    index: usize,
}

impl Iterator for NodeView<'_> {
    type Item = Entity;

    fn next(&mut self) -> Option<Entity> {
        while self.index < self.selection.items.len() {
            let item = self.selection.items[self.index];
            self.index += 1;
            if let Selectable::Node(entity) = item {
                return Some(entity);
            }
        }
        None
    }
}

impl Drop for NodeView<'_> {
    fn drop(&mut self) {
        self.selection.view_locks.fetch_sub(1, Ordering::Relaxed);
    }
}

fn notify_selection_changed(
    selection: Res<Selection>,
    mut changed: MessageWriter<SelectionChanged>,
) {
    if selection.is_changed() && !selection.is_added() {
        changed.write(SelectionChanged);
    }
}

/// Clean up the Selection resource when a Selected component is removed
/// (e.g., entity despawned).
fn on_selected_removed(trigger: On<Remove, Selected>, mut selection: ResMut<Selection>) {
    let entity = trigger.event_target();
    selection.purge_host(entity);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(world: &mut World, f: impl FnOnce(&mut Selection, &mut Commands)) {
        let mut queue = bevy::ecs::world::CommandQueue::default();
        world.resource_scope(|world, mut selection: Mut<Selection>| {
            let mut commands = Commands::new(&mut queue, world);
            f(&mut selection, &mut commands);
        });
        queue.apply(world);
    }

    fn world_with_selection() -> World {
        let mut world = World::new();
        world.insert_resource(Selection::default());
        world
    }

    #[test]
    fn add_then_remove_clears_membership() {
        let mut world = world_with_selection();
        let entity = world.spawn(Transform::default()).id();
        let item = Selectable::Node(entity);

        apply(&mut world, |sel, cmd| sel.extend(cmd, item));
        assert!(world.resource::<Selection>().is_selected(&item));
        assert!(world.get::<Selected>(entity).is_some());

        apply(&mut world, |sel, cmd| sel.remove(cmd, &item));
        assert!(!world.resource::<Selection>().is_selected(&item));
        assert!(world.get::<Selected>(entity).is_none());
    }

    #[test]
    fn no_duplicate_handles() {
        let mut world = world_with_selection();
        let entity = world.spawn(Transform::default()).id();
        let item = Selectable::Node(entity);

        apply(&mut world, |sel, cmd| {
            sel.extend(cmd, item);
            sel.extend(cmd, item);
        });
        assert_eq!(world.resource::<Selection>().len(), 1);
    }

    #[test]
    fn combine_modes_apply_set_algebra() {
        let mut world = world_with_selection();
        let a = Selectable::Node(world.spawn(Transform::default()).id());
        let b = Selectable::Node(world.spawn(Transform::default()).id());
        let c = Selectable::Node(world.spawn(Transform::default()).id());

        // Replace over {} -> {A, B}
        apply(&mut world, |sel, cmd| {
            sel.apply_combine(cmd, Combine::Replace, &[a, b]);
        });
        assert_eq!(world.resource::<Selection>().items(), &[a, b]);

        // Add over pre-existing {C} -> {C, A, B}
        apply(&mut world, |sel, cmd| {
            sel.select_multiple(cmd, &[c]);
            sel.apply_combine(cmd, Combine::Add, &[a, b]);
        });
        assert_eq!(world.resource::<Selection>().items(), &[c, a, b]);

        // Remove {A, B} from pre-existing {A, C} -> {C}
        apply(&mut world, |sel, cmd| {
            sel.select_multiple(cmd, &[a, c]);
            sel.apply_combine(cmd, Combine::Remove, &[a, b]);
        });
        assert_eq!(world.resource::<Selection>().items(), &[c]);
    }

    #[test]
    fn node_view_skips_sub_objects() {
        let mut world = world_with_selection();
        let node = world.spawn(Transform::default()).id();
        let effect = world.spawn(Transform::default()).id();

        apply(&mut world, |sel, cmd| {
            sel.extend(cmd, Selectable::Node(node));
            sel.extend(cmd, Selectable::Emitter { effect, index: 0 });
        });

        let selection = world.resource::<Selection>();
        let nodes: Vec<Entity> = selection.nodes().collect();
        assert_eq!(nodes, vec![node]);
        assert!(!selection.locked_for_views());
    }

    #[test]
    fn primary_is_last_added() {
        let mut world = world_with_selection();
        let a = Selectable::Node(world.spawn(Transform::default()).id());
        let b = Selectable::Node(world.spawn(Transform::default()).id());

        apply(&mut world, |sel, cmd| {
            sel.extend(cmd, a);
            sel.extend(cmd, b);
        });
        assert_eq!(world.resource::<Selection>().primary(), Some(b));
    }
}
