use avian3d::parry::math::{Point, Vector};
use avian3d::parry::query::{Ray, RayCast};
use avian3d::parry::shape::{Capsule, Cuboid};
use bevy::math::Affine3A;
use bevy::prelude::*;

use crate::selectable::Selectable;
use crate::selection::Selection;
use crate::transform_drag::TransformDragState;
use crate::viewport::PointerState;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const AXIS_LENGTH: f32 = 1.5;
const AXIS_TIP_LENGTH: f32 = 0.3;
const AXIS_GRAB_RADIUS: f32 = 0.12;
const ROTATE_RING_RADIUS: f32 = 1.2;
const RING_GRAB_TOLERANCE: f32 = 0.15;
const PLANE_HANDLE_OFFSET: f32 = 0.55;
const PLANE_HANDLE_HALF: f32 = 0.22;
const SCALE_CUBE_SIZE: f32 = 0.15;
const CENTER_HANDLE_HALF: f32 = 0.25;
/// World size per unit of camera distance, keeping the gizmo's screen size
/// roughly constant.
const DISTANCE_SCALE: f32 = 0.12;

const COLOR_X: Color = Color::srgb(1.0, 0.2, 0.2);
const COLOR_Y: Color = Color::srgb(0.2, 1.0, 0.2);
const COLOR_Z: Color = Color::srgb(0.2, 0.4, 1.0);
const COLOR_X_BRIGHT: Color = Color::srgb(1.0, 0.5, 0.5);
const COLOR_Y_BRIGHT: Color = Color::srgb(0.5, 1.0, 0.5);
const COLOR_Z_BRIGHT: Color = Color::srgb(0.5, 0.7, 1.0);
const COLOR_CENTER: Color = Color::srgb(0.85, 0.85, 0.85);

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Default, PartialEq, Eq, Clone, Copy, Debug)]
pub enum GizmoMode {
    Disabled,
    #[default]
    Translate,
    Rotate,
    Scale,
}

#[derive(Default, PartialEq, Eq, Clone, Copy, Debug)]
pub enum GizmoSpace {
    #[default]
    World,
    Local,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum GizmoAxis {
    X,
    Y,
    Z,
    /// Plane handle: free movement in the two named axes.
    XY,
    XZ,
    YZ,
    /// Center handle: uniform scale.
    Uniform,
}

impl GizmoAxis {
    /// The single-axis direction, for X/Y/Z.
    pub fn unit(self) -> Option<Vec3> {
        match self {
            GizmoAxis::X => Some(Vec3::X),
            GizmoAxis::Y => Some(Vec3::Y),
            GizmoAxis::Z => Some(Vec3::Z),
            _ => None,
        }
    }

    /// The normal of a plane handle, for XY/XZ/YZ.
    pub fn plane_normal(self) -> Option<Vec3> {
        match self {
            GizmoAxis::XY => Some(Vec3::Z),
            GizmoAxis::XZ => Some(Vec3::Y),
            GizmoAxis::YZ => Some(Vec3::X),
            _ => None,
        }
    }
}

/// Manipulator state exposed to the host UI: what's shown, where, and which
/// handle is hot.
#[derive(Resource)]
pub struct GizmoState {
    pub mode: GizmoMode,
    pub space: GizmoSpace,
    pub visible: bool,
    /// Externally imposed lock; a locked gizmo draws but ignores input.
    pub locked: bool,
    pub hovered_axis: Option<GizmoAxis>,
    /// Axis of the gesture in flight, if any.
    pub active_axis: Option<GizmoAxis>,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: f32,
}

impl Default for GizmoState {
    fn default() -> Self {
        Self {
            mode: GizmoMode::default(),
            space: GizmoSpace::default(),
            visible: false,
            locked: false,
            hovered_axis: None,
            active_axis: None,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: 1.0,
        }
    }
}

impl GizmoState {
    pub fn interactive(&self) -> bool {
        self.visible && !self.locked && self.mode != GizmoMode::Disabled
    }

    /// Gizmo-local -> world, including the screen-constant scale.
    pub fn affine(&self) -> Affine3A {
        Affine3A::from_scale_rotation_translation(
            Vec3::splat(self.scale),
            self.rotation,
            self.position,
        )
    }

    /// The world direction of a single-axis handle.
    pub fn axis_dir(&self, axis: GizmoAxis) -> Option<Vec3> {
        axis.unit().map(|unit| self.rotation * unit)
    }

    /// The world normal of a plane handle.
    pub fn plane_dir(&self, axis: GizmoAxis) -> Option<Vec3> {
        axis.plane_normal().map(|normal| self.rotation * normal)
    }
}

/// Broadcast when the handle under the cursor changes.
#[derive(Message)]
pub struct GizmoHoverChanged {
    pub axis: Option<GizmoAxis>,
}

// ---------------------------------------------------------------------------
// Handle index
// ---------------------------------------------------------------------------

enum HandleShape {
    /// Arrow stem, in gizmo-local coordinates.
    Capsule(Capsule),
    /// Offset box (plane quads, center cube).
    Box { half: Vec3, center: Vec3 },
    /// Rotation ring around `normal`.
    Ring { radius: f32, tolerance: f32, normal: Vec3 },
}

struct GizmoHandle {
    axis: GizmoAxis,
    shape: HandleShape,
}

impl GizmoHandle {
    fn cast_local_ray(&self, origin: Vec3, dir: Vec3) -> Option<f32> {
        match &self.shape {
            HandleShape::Capsule(capsule) => {
                let ray = Ray::new(
                    Point::new(origin.x, origin.y, origin.z),
                    Vector::new(dir.x, dir.y, dir.z),
                );
                capsule.cast_local_ray(&ray, f32::MAX, true)
            }
            HandleShape::Box { half, center } => {
                let shifted = origin - *center;
                let ray = Ray::new(
                    Point::new(shifted.x, shifted.y, shifted.z),
                    Vector::new(dir.x, dir.y, dir.z),
                );
                Cuboid::new(Vector::new(half.x, half.y, half.z)).cast_local_ray(&ray, f32::MAX, true)
            }
            HandleShape::Ring { radius, tolerance, normal } => {
                let denom = normal.dot(dir);
                if denom.abs() < 1e-6 {
                    return None;
                }
                let t = -normal.dot(origin) / denom;
                if t < 0.0 {
                    return None;
                }
                let hit = origin + dir * t;
                ((hit.length() - radius).abs() <= *tolerance).then_some(t)
            }
        }
    }
}

/// The manipulator's own tiny spatial index: a handful of handle shapes in
/// gizmo-local space, swapped wholesale when the mode changes.
#[derive(Resource, Default)]
pub struct GizmoHandles {
    handles: Vec<GizmoHandle>,
    mode: GizmoMode,
}

impl GizmoHandles {
    pub fn rebuild(&mut self, mode: GizmoMode) {
        self.mode = mode;
        self.handles.clear();
        match mode {
            GizmoMode::Disabled => {}
            GizmoMode::Translate => {
                for (axis, dir) in [
                    (GizmoAxis::X, Vec3::X),
                    (GizmoAxis::Y, Vec3::Y),
                    (GizmoAxis::Z, Vec3::Z),
                ] {
                    let a = dir * 0.2;
                    let b = dir * (AXIS_LENGTH + AXIS_TIP_LENGTH);
                    self.handles.push(GizmoHandle {
                        axis,
                        shape: HandleShape::Capsule(Capsule::new(
                            Point::new(a.x, a.y, a.z),
                            Point::new(b.x, b.y, b.z),
                            AXIS_GRAB_RADIUS,
                        )),
                    });
                }
                for (axis, center, half) in [
                    (
                        GizmoAxis::XY,
                        Vec3::new(PLANE_HANDLE_OFFSET, PLANE_HANDLE_OFFSET, 0.0),
                        Vec3::new(PLANE_HANDLE_HALF, PLANE_HANDLE_HALF, 0.04),
                    ),
                    (
                        GizmoAxis::XZ,
                        Vec3::new(PLANE_HANDLE_OFFSET, 0.0, PLANE_HANDLE_OFFSET),
                        Vec3::new(PLANE_HANDLE_HALF, 0.04, PLANE_HANDLE_HALF),
                    ),
                    (
                        GizmoAxis::YZ,
                        Vec3::new(0.0, PLANE_HANDLE_OFFSET, PLANE_HANDLE_OFFSET),
                        Vec3::new(0.04, PLANE_HANDLE_HALF, PLANE_HANDLE_HALF),
                    ),
                ] {
                    self.handles.push(GizmoHandle {
                        axis,
                        shape: HandleShape::Box { half, center },
                    });
                }
            }
            GizmoMode::Rotate => {
                for (axis, normal) in [
                    (GizmoAxis::X, Vec3::X),
                    (GizmoAxis::Y, Vec3::Y),
                    (GizmoAxis::Z, Vec3::Z),
                ] {
                    self.handles.push(GizmoHandle {
                        axis,
                        shape: HandleShape::Ring {
                            radius: ROTATE_RING_RADIUS,
                            tolerance: RING_GRAB_TOLERANCE,
                            normal,
                        },
                    });
                }
            }
            GizmoMode::Scale => {
                self.handles.push(GizmoHandle {
                    axis: GizmoAxis::Uniform,
                    shape: HandleShape::Box {
                        half: Vec3::splat(CENTER_HANDLE_HALF),
                        center: Vec3::ZERO,
                    },
                });
            }
        }
    }

    /// Ray-test the handle set; returns the nearest handle's axis.
    pub fn hover_test(&self, state: &GizmoState, origin: Vec3, dir: Vec3) -> Option<GizmoAxis> {
        if self.handles.is_empty() {
            return None;
        }
        let inverse = state.affine().inverse();
        let local_origin = inverse.transform_point3(origin);
        let local_dir = inverse.transform_vector3(dir);

        let mut best: Option<(f32, GizmoAxis)> = None;
        for handle in &self.handles {
            let Some(t) = handle.cast_local_ray(local_origin, local_dir) else {
                continue;
            };
            if best.is_none_or(|(current, _)| t < current) {
                best = Some((t, handle.axis));
            }
        }
        best.map(|(_, axis)| axis)
    }
}

// ---------------------------------------------------------------------------
// Plugin
// ---------------------------------------------------------------------------

pub struct TransformGizmosPlugin;

/// Everything that has to settle before the frame's gesture driver runs.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct GizmoUpdateSet;

impl Plugin for TransformGizmosPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<GizmoState>()
            .init_resource::<GizmoHandles>()
            .add_message::<GizmoHoverChanged>()
            .add_systems(
                Update,
                (
                    handle_gizmo_mode_keys,
                    update_gizmo_placement,
                    handle_gizmo_hover,
                )
                    .chain()
                    .in_set(GizmoUpdateSet),
            )
            .add_systems(Update, draw_gizmos.after(GizmoUpdateSet));
    }
}

// ---------------------------------------------------------------------------
// Key bindings: W/E/R switch gizmo mode, Q disables, X toggles space
// ---------------------------------------------------------------------------

fn handle_gizmo_mode_keys(
    keyboard: Res<ButtonInput<KeyCode>>,
    mut state: ResMut<GizmoState>,
    drag: Res<TransformDragState>,
) {
    // Don't switch modes mid-gesture
    if drag.active.is_some() {
        return;
    }

    if keyboard.just_pressed(KeyCode::KeyQ) {
        state.mode = GizmoMode::Disabled;
    }
    if keyboard.just_pressed(KeyCode::KeyW) {
        state.mode = GizmoMode::Translate;
    }
    if keyboard.just_pressed(KeyCode::KeyE) {
        state.mode = GizmoMode::Rotate;
    }
    if keyboard.just_pressed(KeyCode::KeyR) {
        state.mode = GizmoMode::Scale;
    }
    if keyboard.just_pressed(KeyCode::KeyX) {
        state.space = match state.space {
            GizmoSpace::World => GizmoSpace::Local,
            GizmoSpace::Local => GizmoSpace::World,
        };
    }
}

// ---------------------------------------------------------------------------
// Placement: follow the primary selection, swap handle sets on mode change
// ---------------------------------------------------------------------------

fn update_gizmo_placement(world: &mut World) {
    world.resource_scope(|world, mut state: Mut<GizmoState>| {
        let selection = world.resource::<Selection>();
        let primary = selection.primary();
        let items: Vec<Selectable> = selection.items().to_vec();

        let Some(primary) = primary else {
            state.visible = false;
            return;
        };
        let Some(primary_affine) = primary.world_affine(world) else {
            state.visible = false;
            return;
        };

        state.visible = state.mode != GizmoMode::Disabled;
        let (_, primary_rotation, translation) =
            primary_affine.to_scale_rotation_translation();
        state.position = translation;

        state.rotation = match state.space {
            GizmoSpace::World => Quat::IDENTITY,
            GizmoSpace::Local => {
                let rotations: Vec<Quat> = items
                    .iter()
                    .filter_map(|item| item.world_affine(world))
                    .map(|affine| affine.to_scale_rotation_translation().1)
                    .collect();
                if rotations.is_empty() {
                    primary_rotation
                } else {
                    averaged_rotation(&rotations)
                }
            }
        };

        // Screen-constant sizing
        let mut cameras = world.query_filtered::<&GlobalTransform, (
            With<Camera3d>,
            With<crate::EditorEntity>,
        )>();
        if let Ok(cam_tf) = cameras.single(world) {
            let distance = (cam_tf.translation() - state.position).length();
            state.scale = (distance * DISTANCE_SCALE).max(0.1);
        }

        world.resource_scope(|_, mut handles: Mut<GizmoHandles>| {
            if handles.mode != state.mode {
                handles.rebuild(state.mode);
            }
        });
    });
}

/// Average a set of orientations, used when the manipulator aligns to the
/// selection's local axes rather than the world grid.
fn averaged_rotation(rotations: &[Quat]) -> Quat {
    let first = rotations[0];
    let mut sum = Vec4::ZERO;
    for rotation in rotations {
        let aligned = if rotation.dot(first) < 0.0 {
            -*rotation
        } else {
            *rotation
        };
        sum += Vec4::new(aligned.x, aligned.y, aligned.z, aligned.w);
    }
    if sum.length_squared() < 1e-10 {
        return first;
    }
    Quat::from_vec4(sum.normalize())
}

// ---------------------------------------------------------------------------
// Hover detection — ray-test the handle index
// ---------------------------------------------------------------------------

fn handle_gizmo_hover(
    pointer: Res<PointerState>,
    handles: Res<GizmoHandles>,
    drag: Res<TransformDragState>,
    mut state: ResMut<GizmoState>,
    mut hover_changed: MessageWriter<GizmoHoverChanged>,
) {
    let previous = state.hovered_axis;
    state.hovered_axis = None;

    if drag.active.is_none() && state.interactive() {
        if let Some((origin, dir)) = pointer.cursor_ray() {
            state.hovered_axis = handles.hover_test(&state, origin, dir);
        }
    }

    if state.hovered_axis != previous {
        hover_changed.write(GizmoHoverChanged {
            axis: state.hovered_axis,
        });
    }
}

// ---------------------------------------------------------------------------
// Drawing
// ---------------------------------------------------------------------------

fn draw_gizmos(mut gizmos: Gizmos, state: Res<GizmoState>) {
    if !state.visible || state.mode == GizmoMode::Disabled {
        return;
    }

    let pos = state.position;
    let scale = state.scale;
    let right = state.rotation * Vec3::X;
    let up = state.rotation * Vec3::Y;
    let forward = state.rotation * Vec3::Z;

    let active_axis = state.active_axis.or(state.hovered_axis);

    let x_color = axis_color(GizmoAxis::X, active_axis);
    let y_color = axis_color(GizmoAxis::Y, active_axis);
    let z_color = axis_color(GizmoAxis::Z, active_axis);

    match state.mode {
        GizmoMode::Disabled => {}
        GizmoMode::Translate => {
            gizmos
                .arrow(pos, pos + right * AXIS_LENGTH * scale, x_color)
                .with_tip_length(AXIS_TIP_LENGTH * scale);
            gizmos
                .arrow(pos, pos + up * AXIS_LENGTH * scale, y_color)
                .with_tip_length(AXIS_TIP_LENGTH * scale);
            gizmos
                .arrow(pos, pos + forward * AXIS_LENGTH * scale, z_color)
                .with_tip_length(AXIS_TIP_LENGTH * scale);

            for (axis, u, v) in [
                (GizmoAxis::XY, right, up),
                (GizmoAxis::XZ, right, forward),
                (GizmoAxis::YZ, up, forward),
            ] {
                let color = plane_color(axis, active_axis);
                let near = PLANE_HANDLE_OFFSET - PLANE_HANDLE_HALF;
                let far = PLANE_HANDLE_OFFSET + PLANE_HANDLE_HALF;
                let corners = [
                    pos + (u * near + v * near) * scale,
                    pos + (u * far + v * near) * scale,
                    pos + (u * far + v * far) * scale,
                    pos + (u * near + v * far) * scale,
                ];
                gizmos.line(corners[0], corners[1], color);
                gizmos.line(corners[1], corners[2], color);
                gizmos.line(corners[2], corners[3], color);
                gizmos.line(corners[3], corners[0], color);
            }
        }
        GizmoMode::Rotate => {
            gizmos.circle(
                Isometry3d::new(pos, Quat::from_rotation_arc(Vec3::Z, right)),
                ROTATE_RING_RADIUS * scale,
                x_color,
            );
            gizmos.circle(
                Isometry3d::new(pos, Quat::from_rotation_arc(Vec3::Z, up)),
                ROTATE_RING_RADIUS * scale,
                y_color,
            );
            gizmos.circle(
                Isometry3d::new(pos, Quat::from_rotation_arc(Vec3::Z, forward)),
                ROTATE_RING_RADIUS * scale,
                z_color,
            );
        }
        GizmoMode::Scale => {
            let center_color = if active_axis == Some(GizmoAxis::Uniform) {
                Color::WHITE
            } else {
                COLOR_CENTER
            };
            draw_wire_cube(&mut gizmos, pos, CENTER_HANDLE_HALF * scale, center_color);
            for (dir, color) in [(right, x_color), (up, y_color), (forward, z_color)] {
                let end = pos + dir * AXIS_LENGTH * scale;
                gizmos.line(pos, end, color);
                draw_wire_cube(&mut gizmos, end, SCALE_CUBE_SIZE * scale, color);
            }
        }
    }
}

fn draw_wire_cube(gizmos: &mut Gizmos, center: Vec3, half: f32, color: Color) {
    let x = Vec3::X * half;
    let y = Vec3::Y * half;
    let z = Vec3::Z * half;
    let corners = [
        center - x - y - z,
        center + x - y - z,
        center + x + y - z,
        center - x + y - z,
        center - x - y + z,
        center + x - y + z,
        center + x + y + z,
        center - x + y + z,
    ];
    // Bottom face
    gizmos.line(corners[0], corners[1], color);
    gizmos.line(corners[1], corners[2], color);
    gizmos.line(corners[2], corners[3], color);
    gizmos.line(corners[3], corners[0], color);
    // Top face
    gizmos.line(corners[4], corners[5], color);
    gizmos.line(corners[5], corners[6], color);
    gizmos.line(corners[6], corners[7], color);
    gizmos.line(corners[7], corners[4], color);
    // Verticals
    gizmos.line(corners[0], corners[4], color);
    gizmos.line(corners[1], corners[5], color);
    gizmos.line(corners[2], corners[6], color);
    gizmos.line(corners[3], corners[7], color);
}

fn axis_color(axis: GizmoAxis, active: Option<GizmoAxis>) -> Color {
    let is_active = active == Some(axis);
    match axis {
        GizmoAxis::X => {
            if is_active { COLOR_X_BRIGHT } else { COLOR_X }
        }
        GizmoAxis::Y => {
            if is_active { COLOR_Y_BRIGHT } else { COLOR_Y }
        }
        GizmoAxis::Z => {
            if is_active { COLOR_Z_BRIGHT } else { COLOR_Z }
        }
        _ => COLOR_CENTER,
    }
}

fn plane_color(axis: GizmoAxis, active: Option<GizmoAxis>) -> Color {
    let base = match axis {
        GizmoAxis::XY => COLOR_Z,
        GizmoAxis::XZ => COLOR_Y,
        GizmoAxis::YZ => COLOR_X,
        _ => COLOR_CENTER,
    };
    if active == Some(axis) {
        base.with_alpha(1.0)
    } else {
        base.with_alpha(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_at_origin(mode: GizmoMode) -> (GizmoState, GizmoHandles) {
        let mut state = GizmoState::default();
        state.mode = mode;
        state.visible = true;
        let mut handles = GizmoHandles::default();
        handles.rebuild(mode);
        (state, handles)
    }

    #[test]
    fn hover_finds_x_arrow() {
        let (state, handles) = state_at_origin(GizmoMode::Translate);
        // Ray from +Z aimed at a point on the X axis.
        let origin = Vec3::new(1.0, 0.0, 5.0);
        let dir = Vec3::NEG_Z;
        assert_eq!(handles.hover_test(&state, origin, dir), Some(GizmoAxis::X));
    }

    #[test]
    fn hover_finds_plane_handle() {
        let (state, handles) = state_at_origin(GizmoMode::Translate);
        let origin = Vec3::new(PLANE_HANDLE_OFFSET, PLANE_HANDLE_OFFSET, 5.0);
        let dir = Vec3::NEG_Z;
        assert_eq!(handles.hover_test(&state, origin, dir), Some(GizmoAxis::XY));
    }

    #[test]
    fn hover_misses_far_from_handles() {
        let (state, handles) = state_at_origin(GizmoMode::Translate);
        let origin = Vec3::new(10.0, 10.0, 5.0);
        let dir = Vec3::NEG_Z;
        assert_eq!(handles.hover_test(&state, origin, dir), None);
    }

    #[test]
    fn rotate_mode_hovers_ring_edge_not_center() {
        let (state, handles) = state_at_origin(GizmoMode::Rotate);
        // Straight down the Z ring's edge.
        let origin = Vec3::new(ROTATE_RING_RADIUS, 0.0, 5.0);
        let dir = Vec3::NEG_Z;
        assert_eq!(handles.hover_test(&state, origin, dir), Some(GizmoAxis::Z));

        // Dead center misses every ring.
        let center = handles.hover_test(&state, Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);
        assert_eq!(center, None);
    }

    #[test]
    fn mode_swap_repopulates_handles() {
        let (_, mut handles) = state_at_origin(GizmoMode::Translate);
        assert_eq!(handles.handles.len(), 6);
        handles.rebuild(GizmoMode::Rotate);
        assert_eq!(handles.handles.len(), 3);
        handles.rebuild(GizmoMode::Disabled);
        assert!(handles.handles.is_empty());
    }

    #[test]
    fn scaled_gizmo_still_hit_by_world_ray() {
        let (mut state, handles) = state_at_origin(GizmoMode::Translate);
        state.position = Vec3::new(10.0, 0.0, 0.0);
        state.scale = 3.0;
        // X arrow tip now reaches ~10 + 3*1.8 on world X.
        let origin = Vec3::new(14.0, 0.0, 5.0);
        assert_eq!(
            handles.hover_test(&state, origin, Vec3::NEG_Z),
            Some(GizmoAxis::X)
        );
    }
}
