use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::gizmos::{GizmoMode, GizmoState};

pub struct SnappingPlugin;

impl Plugin for SnappingPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SnapSettings>()
            .add_systems(Update, snap_toggle_keys);
    }
}

/// Period toggles the snap matching the active gizmo mode; Shift+Period
/// toggles terrain snapping.
fn snap_toggle_keys(
    keyboard: Res<ButtonInput<KeyCode>>,
    gizmo: Res<GizmoState>,
    mut snap_settings: ResMut<SnapSettings>,
) {
    if !keyboard.just_pressed(KeyCode::Period) {
        return;
    }
    let shift = keyboard.any_pressed([KeyCode::ShiftLeft, KeyCode::ShiftRight]);
    if shift {
        snap_settings.terrain_snap = !snap_settings.terrain_snap;
        return;
    }
    match gizmo.mode {
        GizmoMode::Translate => snap_settings.translate_snap = !snap_settings.translate_snap,
        GizmoMode::Rotate => snap_settings.rotate_snap = !snap_settings.rotate_snap,
        GizmoMode::Scale => snap_settings.scale_snap = !snap_settings.scale_snap,
        GizmoMode::Disabled => {}
    }
}

// ---------------------------------------------------------------------------
// Snap settings
// ---------------------------------------------------------------------------

#[derive(Resource, Clone, Serialize, Deserialize)]
pub struct SnapSettings {
    pub translate_snap: bool,
    pub translate_increment: f32,
    pub rotate_snap: bool,
    pub rotate_increment: f32,
    pub scale_snap: bool,
    pub scale_increment: f32,
    /// Constrain move gestures vertically to the sampled terrain height.
    pub terrain_snap: bool,
}

impl Default for SnapSettings {
    fn default() -> Self {
        Self {
            translate_snap: false,
            translate_increment: 0.25,
            rotate_snap: false,
            rotate_increment: 15.0_f32.to_radians(),
            scale_snap: false,
            scale_increment: 0.1,
            terrain_snap: false,
        }
    }
}

impl SnapSettings {
    /// Snap a translation value to the nearest increment.
    pub fn snap_translate(&self, value: f32) -> f32 {
        if self.translate_snap && self.translate_increment > 0.0 {
            (value / self.translate_increment).round() * self.translate_increment
        } else {
            value
        }
    }

    /// Snap a translation vector.
    pub fn snap_translate_vec3(&self, v: Vec3) -> Vec3 {
        Vec3::new(
            self.snap_translate(v.x),
            self.snap_translate(v.y),
            self.snap_translate(v.z),
        )
    }

    /// Snap a rotation angle to the nearest increment.
    pub fn snap_rotate(&self, angle: f32) -> f32 {
        if self.rotate_snap && self.rotate_increment > 0.0 {
            (angle / self.rotate_increment).round() * self.rotate_increment
        } else {
            angle
        }
    }

    /// Check if translate snapping should be active (Ctrl held = toggle snap).
    pub fn translate_active(&self, ctrl_held: bool) -> bool {
        self.translate_snap ^ ctrl_held
    }

    /// Check if rotate snapping should be active (Ctrl held = toggle snap).
    pub fn rotate_active(&self, ctrl_held: bool) -> bool {
        self.rotate_snap ^ ctrl_held
    }

    /// Check if scale snapping should be active (Ctrl held = toggle snap).
    pub fn scale_active(&self, ctrl_held: bool) -> bool {
        self.scale_snap ^ ctrl_held
    }

    /// Conditionally snap a translation vector based on Ctrl state.
    pub fn snap_translate_vec3_if(&self, v: Vec3, ctrl_held: bool) -> Vec3 {
        if self.translate_active(ctrl_held) && self.translate_increment > 0.0 {
            Vec3::new(
                (v.x / self.translate_increment).round() * self.translate_increment,
                (v.y / self.translate_increment).round() * self.translate_increment,
                (v.z / self.translate_increment).round() * self.translate_increment,
            )
        } else {
            v
        }
    }

    /// Conditionally snap a rotation angle based on Ctrl state.
    pub fn snap_rotate_if(&self, angle: f32, ctrl_held: bool) -> f32 {
        if self.rotate_active(ctrl_held) && self.rotate_increment > 0.0 {
            (angle / self.rotate_increment).round() * self.rotate_increment
        } else {
            angle
        }
    }

    /// Conditionally snap a uniform scale factor based on Ctrl state.
    pub fn snap_scale_if(&self, factor: f32, ctrl_held: bool) -> f32 {
        if self.scale_active(ctrl_held) && self.scale_increment > 0.0 {
            (factor / self.scale_increment).round() * self.scale_increment
        } else {
            factor
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_inverts_snap_toggle() {
        let mut settings = SnapSettings::default();
        settings.translate_snap = false;
        // Snap off, Ctrl held: snapping becomes active.
        let snapped = settings.snap_translate_vec3_if(Vec3::new(0.37, 0.0, 0.0), true);
        assert_eq!(snapped.x, 0.25);

        settings.translate_snap = true;
        // Snap on, Ctrl held: snapping suspends.
        let raw = settings.snap_translate_vec3_if(Vec3::new(0.37, 0.0, 0.0), true);
        assert_eq!(raw.x, 0.37);
    }

    #[test]
    fn rotate_snaps_to_increment() {
        let mut settings = SnapSettings::default();
        settings.rotate_snap = true;
        let snapped = settings.snap_rotate(0.3);
        assert!((snapped - 15.0_f32.to_radians()).abs() < 1e-5);
    }
}
