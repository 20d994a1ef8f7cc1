use bevy::prelude::*;

/// A placed particle effect. The visual editor for emitter/force parameters
/// lives elsewhere; this component only carries the sub-object slots the
/// picking and transform code needs to address.
#[derive(Component, Reflect, Clone, Default)]
#[reflect(Component)]
pub struct ParticleEffect {
    pub emitters: Vec<EmitterSlot>,
    pub forces: Vec<ForceSlot>,
}

/// An emitter placement inside a [`ParticleEffect`], local to the effect node.
#[derive(Reflect, Clone)]
pub struct EmitterSlot {
    pub name: String,
    pub transform: Transform,
    /// Influence radius, used to size the pick shape.
    pub radius: f32,
}

impl Default for EmitterSlot {
    fn default() -> Self {
        Self {
            name: "Emitter".to_string(),
            transform: Transform::default(),
            radius: 0.5,
        }
    }
}

/// A force-field placement inside a [`ParticleEffect`].
#[derive(Reflect, Clone)]
pub struct ForceSlot {
    pub name: String,
    pub transform: Transform,
    pub radius: f32,
}

impl Default for ForceSlot {
    fn default() -> Self {
        Self {
            name: "Force".to_string(),
            transform: Transform::default(),
            radius: 0.5,
        }
    }
}

impl ParticleEffect {
    pub fn emitter(&self, index: usize) -> Option<&EmitterSlot> {
        self.emitters.get(index)
    }

    pub fn force(&self, index: usize) -> Option<&ForceSlot> {
        self.forces.get(index)
    }
}
