use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::selectable::ObjectKind;

/// Editor-session settings for picking and gestures. Loaded once at startup;
/// the inspector UI writes back through [`save_config`].
#[derive(Resource, Clone, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Resolve plain clicks on release (lets a drag escalate into box select
    /// without touching the selection) or immediately on press.
    pub select_on_release: bool,
    /// Repeated clicks at the same spot cycle through the stack of hits.
    pub sequential_select: bool,
    pub pick_filter: PickFilter,
    /// Screen pixels of drag before a click becomes a box select.
    pub drag_threshold: f32,
    /// Screen pixels per radian for rotate gestures.
    pub rotate_sensitivity: f32,
    /// Screen pixels per unit of scale factor.
    pub scale_sensitivity: f32,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            select_on_release: true,
            sequential_select: false,
            pick_filter: PickFilter::default(),
            drag_threshold: 5.0,
            rotate_sensitivity: 100.0,
            scale_sensitivity: 200.0,
        }
    }
}

/// Which object kinds respond to viewport picking.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct PickFilter {
    excluded: HashSet<ObjectKind>,
}

impl PickFilter {
    pub fn allows(&self, kind: ObjectKind) -> bool {
        !self.excluded.contains(&kind)
    }

    pub fn exclude(&mut self, kind: ObjectKind) {
        self.excluded.insert(kind);
    }

    pub fn include(&mut self, kind: ObjectKind) {
        self.excluded.remove(&kind);
    }
}

pub fn load_config(path: &Path) -> anyhow::Result<EditorConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading editor config from {}", path.display()))?;
    let config = serde_json::from_str(&raw)
        .with_context(|| format!("parsing editor config {}", path.display()))?;
    Ok(config)
}

pub fn save_config(path: &Path, config: &EditorConfig) -> anyhow::Result<()> {
    let raw = serde_json::to_string_pretty(config)?;
    std::fs::write(path, raw)
        .with_context(|| format!("writing editor config to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_defaults_to_everything() {
        let filter = PickFilter::default();
        assert!(filter.allows(ObjectKind::Mesh));
        assert!(filter.allows(ObjectKind::Camera));
    }

    #[test]
    fn excluded_kinds_stop_matching() {
        let mut filter = PickFilter::default();
        filter.exclude(ObjectKind::Light);
        assert!(!filter.allows(ObjectKind::Light));
        filter.include(ObjectKind::Light);
        assert!(filter.allows(ObjectKind::Light));
    }

    #[test]
    fn config_round_trips_through_json() {
        let dir = std::env::temp_dir().join("magpie_config_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("editor.json");

        let mut config = EditorConfig::default();
        config.sequential_select = true;
        config.pick_filter.exclude(ObjectKind::Camera);
        save_config(&path, &config).unwrap();

        let loaded = load_config(&path).unwrap();
        assert!(loaded.sequential_select);
        assert!(!loaded.pick_filter.allows(ObjectKind::Camera));
    }
}
