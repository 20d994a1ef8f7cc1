use bevy::{
    input::mouse::{MouseMotion, MouseScrollUnit, MouseWheel},
    prelude::*,
};

pub struct MagpieCameraPlugin;

impl Plugin for MagpieCameraPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, (camera_system, focus_glide_system));
    }
}

/// Settings component placed on the camera entity to enable fly-camera controls.
///
/// Controls:
/// - Right-click + drag: look around (yaw/pitch)
/// - WASD: move forward/back/left/right (view-relative)
/// - Q / E: move up / down (world-space Y)
/// - Scroll wheel: move forward/back along view direction
/// - Right-click + scroll: adjust camera speed
/// - Shift (held): run speed multiplier
#[derive(Component)]
pub struct MagpieCameraSettings {
    /// Mouse look sensitivity (radians per pixel).
    pub sensitivity: f32,
    /// Base movement speed (units per second).
    pub speed: f32,
    /// Speed multiplier when Shift is held.
    pub run_multiplier: f32,
    /// Whether camera controls are enabled. Set to false during UI focus, etc.
    pub enabled: bool,
    /// Scroll movement speed (units per scroll line).
    pub scroll_speed: f32,
}

impl Default for MagpieCameraSettings {
    fn default() -> Self {
        Self {
            sensitivity: 0.003,
            speed: 5.0,
            run_multiplier: 2.0,
            enabled: true,
            scroll_speed: 1.0,
        }
    }
}

/// A non-blocking camera move: each frame the camera eases toward a framing
/// of `target` at `distance`, removing itself once it has converged.
#[derive(Component)]
pub struct FocusGlide {
    pub target: Vec3,
    pub distance: f32,
    /// Convergence rate, in halvings of the remaining distance per second.
    pub speed: f32,
}

impl FocusGlide {
    pub fn new(target: Vec3, distance: f32) -> Self {
        Self {
            target,
            distance,
            speed: 8.0,
        }
    }
}

fn focus_glide_system(
    mut commands: Commands,
    time: Res<Time>,
    mut cameras: Query<(Entity, &mut Transform, &FocusGlide)>,
) {
    for (entity, mut transform, glide) in &mut cameras {
        let forward = transform.forward().as_vec3();
        let goal = glide.target - forward * glide.distance;

        let t = 1.0 - (-glide.speed * time.delta_secs()).exp();
        transform.translation = transform.translation.lerp(goal, t);
        let look = transform.looking_at(glide.target, Vec3::Y);
        transform.rotation = transform.rotation.slerp(look.rotation, t);

        if transform.translation.distance(goal) < 0.01 {
            transform.translation = goal;
            transform.rotation = look.rotation;
            commands.entity(entity).remove::<FocusGlide>();
        }
    }
}

fn camera_system(
    keyboard: Res<ButtonInput<KeyCode>>,
    mouse: Res<ButtonInput<MouseButton>>,
    mut mouse_motion: MessageReader<MouseMotion>,
    mut scroll_events: MessageReader<MouseWheel>,
    time: Res<Time>,
    mut camera_query: Query<(&mut MagpieCameraSettings, &mut Transform)>,
) {
    for (mut settings, mut transform) in &mut camera_query {
        if !settings.enabled {
            mouse_motion.read().count();
            scroll_events.read().count();
            continue;
        }

        let shift = keyboard.any_pressed([KeyCode::ShiftLeft, KeyCode::ShiftRight]);
        let right_held = mouse.pressed(MouseButton::Right);

        // Mouse look (only while right-click held)
        if right_held {
            let mut mouse_delta = Vec2::ZERO;
            for motion in mouse_motion.read() {
                mouse_delta += motion.delta;
            }

            if mouse_delta != Vec2::ZERO {
                let (mut yaw, mut pitch, _) = transform.rotation.to_euler(EulerRot::YXZ);
                yaw -= mouse_delta.x * settings.sensitivity;
                pitch -= mouse_delta.y * settings.sensitivity;
                pitch = pitch.clamp(
                    -std::f32::consts::FRAC_PI_2 + 0.01,
                    std::f32::consts::FRAC_PI_2 - 0.01,
                );
                transform.rotation = Quat::from_euler(EulerRot::YXZ, yaw, pitch, 0.0);
            }
        } else {
            mouse_motion.read().count();
        }

        for event in scroll_events.read() {
            let delta = match event.unit {
                MouseScrollUnit::Line => event.y,
                MouseScrollUnit::Pixel => event.y * 0.01,
            };

            if right_held {
                // Right-click + scroll: adjust speed
                settings.speed = (settings.speed * (1.0 + delta * 0.1)).clamp(0.5, 100.0);
            } else {
                // Plain scroll: move forward/back along view direction
                let forward = transform.forward().as_vec3();
                transform.translation += forward * delta * settings.scroll_speed;
            }
        }

        // WASD + QE movement (always active, independent of right-click)
        let dt = time.delta_secs();
        let mut movement = Vec3::ZERO;

        if keyboard.pressed(KeyCode::KeyW) {
            movement += transform.forward().as_vec3();
        }
        if keyboard.pressed(KeyCode::KeyS) {
            movement -= transform.forward().as_vec3();
        }
        if keyboard.pressed(KeyCode::KeyA) {
            movement -= transform.right().as_vec3();
        }
        if keyboard.pressed(KeyCode::KeyD) {
            movement += transform.right().as_vec3();
        }
        if keyboard.pressed(KeyCode::KeyQ) {
            movement += Vec3::Y;
        }
        if keyboard.pressed(KeyCode::KeyE) {
            movement -= Vec3::Y;
        }

        if movement != Vec3::ZERO {
            let speed_mult = if shift { settings.run_multiplier } else { 1.0 };
            transform.translation += movement.normalize() * settings.speed * speed_mult * dt;
        }
    }
}
