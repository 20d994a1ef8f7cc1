pub mod bounds;
pub mod commands;
pub mod config;
pub mod effect;
pub mod entity_ops;
pub mod gizmos;
pub mod proxy;
pub mod select_tool;
pub mod selectable;
pub mod selection;
pub mod snapping;
pub mod terrain;
pub mod transform_drag;
pub mod viewport;
pub mod viewport_overlays;

#[cfg(test)]
pub(crate) mod test_utils;

use bevy::prelude::*;

/// Tag for entities that belong to the editor itself (camera, UI) rather than
/// the scene being edited. They never receive pick proxies and never appear
/// in selections.
#[derive(Component, Default)]
pub struct EditorEntity;

pub struct EditorPlugin;

impl Plugin for EditorPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(config::EditorConfig::default())
            .register_type::<terrain::Terrain>()
            .register_type::<effect::ParticleEffect>()
            .register_type::<selectable::Locked>()
            .register_type::<selectable::SolidPick>()
            .register_type::<selectable::Waypoint>()
            .register_type::<selectable::MarkerPoint>()
            .add_plugins((
                selection::SelectionPlugin,
                proxy::ProxyPlugin,
                commands::CommandHistoryPlugin,
                snapping::SnappingPlugin,
                viewport::ViewportPlugin,
                gizmos::TransformGizmosPlugin,
                transform_drag::TransformDragPlugin,
                select_tool::SelectToolPlugin,
                entity_ops::EntityOpsPlugin,
                viewport_overlays::ViewportOverlaysPlugin,
                magpie_camera::MagpieCameraPlugin,
            ));
    }
}
