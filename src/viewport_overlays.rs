use bevy::math::Affine3A;
use bevy::prelude::*;

use crate::effect::ParticleEffect;
use crate::proxy::ProxyRegistry;
use crate::selectable::Selectable;
use crate::selection::Selection;

pub struct ViewportOverlaysPlugin;

impl Plugin for ViewportOverlaysPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<OverlaySettings>()
            .add_systems(Update, (draw_selection_bounding_boxes, draw_coordinate_indicator));
    }
}

#[derive(Resource)]
pub struct OverlaySettings {
    pub show_bounding_boxes: bool,
    pub show_coordinate_indicator: bool,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            show_bounding_boxes: true,
            show_coordinate_indicator: true,
        }
    }
}

/// Draw wireframe boxes around everything selected, using the pick proxies'
/// local bounds so outlines match what the mouse can actually hit.
fn draw_selection_bounding_boxes(
    mut gizmos: Gizmos,
    settings: Res<OverlaySettings>,
    registry: Res<ProxyRegistry>,
    selection: Res<Selection>,
    transforms: Query<&GlobalTransform>,
    effects: Query<&ParticleEffect>,
) {
    if !settings.show_bounding_boxes {
        return;
    }

    for item in selection.items() {
        let Some(local) = registry.local_bounds(item) else {
            continue;
        };
        let Ok(host_tf) = transforms.get(item.host()) else {
            continue;
        };
        let affine = match *item {
            Selectable::Node(_) => host_tf.affine(),
            Selectable::Emitter { effect, index } => {
                let Some(slot) = effects.get(effect).ok().and_then(|fx| fx.emitter(index)) else {
                    continue;
                };
                host_tf.affine() * slot.transform.compute_affine()
            }
            Selectable::Force { effect, index } => {
                let Some(slot) = effects.get(effect).ok().and_then(|fx| fx.force(index)) else {
                    continue;
                };
                host_tf.affine() * slot.transform.compute_affine()
            }
        };
        draw_wireframe_box(&mut gizmos, &affine, local.corners(), Color::srgba(1.0, 1.0, 0.0, 0.5));
    }
}

fn draw_wireframe_box(gizmos: &mut Gizmos, affine: &Affine3A, corners: [Vec3; 8], color: Color) {
    let c: Vec<Vec3> = corners
        .iter()
        .map(|corner| affine.transform_point3(*corner))
        .collect();
    // Bounds3::corners orders by x, then y, then z bit flags.
    let edges = [
        (0, 1),
        (2, 3),
        (4, 5),
        (6, 7),
        (0, 2),
        (1, 3),
        (4, 6),
        (5, 7),
        (0, 4),
        (1, 5),
        (2, 6),
        (3, 7),
    ];
    for (a, b) in edges {
        gizmos.line(c[a], c[b], color);
    }
}

/// Draw a small coordinate indicator showing camera orientation.
fn draw_coordinate_indicator(
    mut gizmos: Gizmos,
    settings: Res<OverlaySettings>,
    camera_query: Query<&GlobalTransform, With<Camera3d>>,
) {
    if !settings.show_coordinate_indicator {
        return;
    }

    let Ok(cam_tf) = camera_query.single() else {
        return;
    };

    let cam_pos = cam_tf.translation();
    let cam_forward = cam_tf.forward().as_vec3();

    // Place the indicator in front of the camera, offset to bottom-left
    let indicator_pos = cam_pos
        + cam_forward * 2.0
        + cam_tf.right().as_vec3() * -0.8
        + cam_tf.up().as_vec3() * -0.5;
    let size = 0.1;

    gizmos.line(indicator_pos, indicator_pos + Vec3::X * size, Color::srgb(1.0, 0.2, 0.2));
    gizmos.line(indicator_pos, indicator_pos + Vec3::Y * size, Color::srgb(0.2, 1.0, 0.2));
    gizmos.line(indicator_pos, indicator_pos + Vec3::Z * size, Color::srgb(0.2, 0.4, 1.0));
}
