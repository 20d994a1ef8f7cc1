use bevy::prelude::*;
use bevy::ui::UiGlobalTransform;

use crate::EditorEntity;
use crate::proxy::Plane;

/// Marker on the center-panel UI node that hosts the 3D viewport.
#[derive(Component)]
pub struct SceneViewport;

pub struct ViewportPlugin;

impl Plugin for ViewportPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<PointerState>()
            .add_systems(PreUpdate, update_pointer_state);
    }
}

// ---------------------------------------------------------------------------
// Pick view — camera math detached from render state
// ---------------------------------------------------------------------------

/// Snapshot of the viewing camera used for all screen/world conversions this
/// frame. Carrying plain matrices keeps every conversion runnable headless.
#[derive(Clone, Copy, Debug)]
pub struct PickView {
    pub world_from_view: Mat4,
    pub clip_from_view: Mat4,
    pub viewport_size: Vec2,
}

impl PickView {
    pub fn from_camera(camera: &Camera, cam_tf: &GlobalTransform) -> Option<Self> {
        let viewport_size = camera.logical_viewport_size()?;
        Some(Self {
            world_from_view: Mat4::from(cam_tf.affine()),
            clip_from_view: camera.clip_from_view(),
            viewport_size,
        })
    }

    /// A hand-built perspective view for tests and tools: camera at
    /// `position` looking at `target`.
    pub fn looking_at(position: Vec3, target: Vec3, viewport_size: Vec2) -> Self {
        let transform = Transform::from_translation(position).looking_at(target, Vec3::Y);
        Self {
            world_from_view: Mat4::from(transform.compute_affine()),
            clip_from_view: Mat4::perspective_infinite_reverse_rh(
                std::f32::consts::FRAC_PI_4,
                viewport_size.x / viewport_size.y,
                0.1,
            ),
            viewport_size,
        }
    }

    pub fn camera_position(&self) -> Vec3 {
        self.world_from_view.transform_point3(Vec3::ZERO)
    }

    fn cursor_to_ndc(&self, cursor: Vec2) -> Vec2 {
        Vec2::new(
            cursor.x / self.viewport_size.x * 2.0 - 1.0,
            1.0 - cursor.y / self.viewport_size.y * 2.0,
        )
    }

    /// World-space ray through a viewport cursor position.
    pub fn ray(&self, cursor: Vec2) -> Option<(Vec3, Vec3)> {
        let ndc = self.cursor_to_ndc(cursor);
        let world_from_clip = self.world_from_view * self.clip_from_view.inverse();
        // Two depths are enough to recover the ray; 0.5 stays finite under
        // the reverse-z infinite projection.
        let near = world_from_clip.project_point3(ndc.extend(1.0));
        let mid = world_from_clip.project_point3(ndc.extend(0.5));
        let dir = (mid - near).normalize_or_zero();
        (dir != Vec3::ZERO).then_some((near, dir))
    }

    /// Project a world point back to viewport coordinates.
    pub fn world_to_viewport(&self, world: Vec3) -> Option<Vec2> {
        let clip_from_world = self.clip_from_view * self.world_from_view.inverse();
        let clip = clip_from_world * world.extend(1.0);
        if clip.w <= 0.0 {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        Some(Vec2::new(
            (ndc.x + 1.0) * 0.5 * self.viewport_size.x,
            (1.0 - ndc.y) * 0.5 * self.viewport_size.y,
        ))
    }

    /// The screen-space direction of a world axis at a given world anchor.
    pub fn screen_axis(&self, anchor: Vec3, axis: Vec3) -> Option<Vec2> {
        let origin = self.world_to_viewport(anchor)?;
        let tip = self.world_to_viewport(anchor + axis)?;
        let dir = tip - origin;
        (dir.length_squared() > 1e-12).then(|| dir.normalize())
    }

    /// The four side planes of the sub-frustum through a screen rectangle,
    /// inward-facing.
    pub fn frustum_from_rect(&self, min: Vec2, max: Vec2) -> Option<[Plane; 4]> {
        let origin = self.camera_position();
        let (_, tl) = self.ray(Vec2::new(min.x, min.y))?;
        let (_, tr) = self.ray(Vec2::new(max.x, min.y))?;
        let (_, br) = self.ray(Vec2::new(max.x, max.y))?;
        let (_, bl) = self.ray(Vec2::new(min.x, max.y))?;
        let (_, center) = self.ray((min + max) * 0.5)?;
        let inside = origin + center;

        let plane_through = |a: Vec3, b: Vec3| {
            let mut plane = Plane::from_points(origin, origin + a, origin + b);
            if plane.signed_distance(inside) < 0.0 {
                plane.normal = -plane.normal;
                plane.d = -plane.d;
            }
            plane
        };

        Some([
            plane_through(tl, bl), // left
            plane_through(tr, br), // right
            plane_through(tl, tr), // top
            plane_through(bl, br), // bottom
        ])
    }
}

// ---------------------------------------------------------------------------
// Pointer state
// ---------------------------------------------------------------------------

/// Per-frame pointer context: the viewing camera snapshot and the cursor in
/// render-target coordinates (when inside the viewport).
#[derive(Resource, Default)]
pub struct PointerState {
    pub view: Option<PickView>,
    pub viewport_cursor: Option<Vec2>,
}

impl PointerState {
    pub fn cursor_ray(&self) -> Option<(Vec3, Vec3)> {
        let view = self.view?;
        view.ray(self.viewport_cursor?)
    }
}

fn update_pointer_state(
    windows: Query<&Window>,
    camera_query: Query<(&Camera, &GlobalTransform), (With<Camera3d>, With<EditorEntity>)>,
    viewport_query: Query<(&ComputedNode, &UiGlobalTransform), With<SceneViewport>>,
    mut pointer: ResMut<PointerState>,
) {
    pointer.view = None;
    pointer.viewport_cursor = None;

    let Ok((camera, cam_tf)) = camera_query.single() else {
        return;
    };
    pointer.view = PickView::from_camera(camera, cam_tf);

    let Ok(window) = windows.single() else {
        return;
    };
    let Some(cursor_pos) = window.cursor_position() else {
        return;
    };
    pointer.viewport_cursor = window_to_viewport_cursor(cursor_pos, camera, &viewport_query);
}

/// Convert a window cursor position to camera render-target coordinates,
/// rejecting positions outside the viewport node. Without a viewport node the
/// whole window is the viewport.
pub fn window_to_viewport_cursor(
    cursor_pos: Vec2,
    camera: &Camera,
    viewport_query: &Query<(&ComputedNode, &UiGlobalTransform), With<SceneViewport>>,
) -> Option<Vec2> {
    let Ok((computed, vp_transform)) = viewport_query.single() else {
        return Some(cursor_pos);
    };
    // Convert from physical pixels to logical pixels to match cursor_position()
    let scale = computed.inverse_scale_factor();
    let vp_pos = vp_transform.translation * scale;
    let vp_size = computed.size() * scale;
    // ComputedNode position is the center, convert to top-left
    let vp_top_left = vp_pos - vp_size / 2.0;
    let local = cursor_pos - vp_top_left;
    if local.x < 0.0 || local.y < 0.0 || local.x > vp_size.x || local.y > vp_size.y {
        return None;
    }
    // Remap from UI-logical space to camera render-target space
    let target_size = camera.logical_viewport_size().unwrap_or(vp_size);
    Some(local * target_size / vp_size)
}

/// Distance from a point to a line segment.
pub(crate) fn point_to_segment_dist(point: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let ap = point - a;
    let t = (ap.dot(ab) / ab.length_squared()).clamp(0.0, 1.0);
    let closest = a + ab * t;
    (point - closest).length()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> PickView {
        PickView::looking_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec2::new(800.0, 600.0))
    }

    #[test]
    fn center_ray_points_at_target() {
        let view = view();
        let (origin, dir) = view.ray(Vec2::new(400.0, 300.0)).unwrap();
        assert!((dir - Vec3::NEG_Z).length() < 1e-4);
        assert!(origin.z < 10.0 + 1e-3);
    }

    #[test]
    fn project_unproject_round_trip() {
        let view = view();
        let world = Vec3::new(1.0, 2.0, -3.0);
        let screen = view.world_to_viewport(world).unwrap();
        let (origin, dir) = view.ray(screen).unwrap();
        // The reprojected ray passes through the original point.
        let t = (world - origin).dot(dir);
        let closest = origin + dir * t;
        assert!((closest - world).length() < 1e-2);
    }

    #[test]
    fn rect_frustum_contains_center_excludes_outside() {
        let view = view();
        let planes = view
            .frustum_from_rect(Vec2::new(300.0, 200.0), Vec2::new(500.0, 400.0))
            .unwrap();
        // A point straight ahead sits inside all four planes.
        let inside = Vec3::new(0.0, 0.0, 0.0);
        assert!(planes.iter().all(|p| p.signed_distance(inside) > 0.0));
        // A point far off to the side fails at least one plane.
        let outside = Vec3::new(50.0, 0.0, 0.0);
        assert!(planes.iter().any(|p| p.signed_distance(outside) < 0.0));
    }

    #[test]
    fn point_segment_distance() {
        let d = point_to_segment_dist(Vec2::new(0.0, 1.0), Vec2::ZERO, Vec2::new(2.0, 0.0));
        assert!((d - 1.0).abs() < 1e-6);
    }
}
