//! Headless test harness: `MinimalPlugins` plus the editor's own plugins,
//! without a window, renderer, or gizmo drawing backend.

use bevy::prelude::*;

use crate::commands::CommandHistoryPlugin;
use crate::config::EditorConfig;
use crate::proxy::{ProxyPlugin, ProxyRegistry};
use crate::selectable::Selectable;
use crate::selection::{Selection, SelectionPlugin};
use crate::snapping::SnappingPlugin;
use crate::transform_drag::{CloneCompleted, TerrainHeightReadout, TransformDragState};

/// Build an app with everything gesture and proxy tests need. The gizmo
/// drawing and viewport plugins are left out on purpose: `Gizmos` needs the
/// render backend, and tests drive the engine functions directly with
/// synthetic views instead of a real camera.
pub(crate) fn test_app() -> App {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins);
    app.add_plugins(bevy::input::InputPlugin);
    app.add_plugins(AssetPlugin::default());
    app.init_asset::<Mesh>();
    app.add_plugins(TransformPlugin);
    app.add_plugins((
        SelectionPlugin,
        ProxyPlugin,
        CommandHistoryPlugin,
        SnappingPlugin,
    ));
    app.insert_resource(EditorConfig::default());
    app.init_resource::<TransformDragState>();
    app.init_resource::<crate::gizmos::GizmoState>();
    app.add_message::<CloneCompleted>();
    app.add_message::<TerrainHeightReadout>();
    app.register_type::<Transform>();
    app.register_type::<Name>();
    app.register_type::<crate::terrain::Terrain>();
    app.register_type::<crate::effect::ParticleEffect>();
    app.register_type::<crate::selectable::Locked>();
    app.register_type::<crate::selectable::SolidPick>();
    app.register_type::<crate::selectable::Waypoint>();
    app.register_type::<crate::selectable::MarkerPoint>();
    // One update to initialize schedules and change-detection state.
    app.update();
    app
}

/// Replace the selection with the given items, applying markers through a
/// command queue the way the interactive tools do.
pub(crate) fn select(world: &mut World, items: &[Selectable]) {
    let mut queue = bevy::ecs::world::CommandQueue::default();
    world.resource_scope(|world, mut selection: Mut<Selection>| {
        let mut commands = Commands::new(&mut queue, world);
        selection.select_multiple(&mut commands, items);
    });
    queue.apply(world);
}

/// Flush pending proxy work without running the full schedule.
pub(crate) fn drain_proxies(world: &mut World) {
    world.resource_scope(|world, mut registry: Mut<ProxyRegistry>| {
        registry.drain(world);
    });
}
