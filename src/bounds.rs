use bevy::math::Affine3A;
use bevy::prelude::*;

/// Axis-aligned box in whatever frame the caller is working in.
///
/// Bevy's render `Aabb` is center/half-extent and lives behind the render
/// feature; picking wants plain min/max math that also runs headless.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds3 {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds3 {
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// A box centered at the origin with the given half extents.
    pub fn from_half_extents(half: Vec3) -> Self {
        Self { min: -half, max: half }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Self::new(first, first);
        for p in iter {
            bounds.min = bounds.min.min(p);
            bounds.max = bounds.max.max(p);
        }
        Some(bounds)
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn expand_to(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Grow every face outward so the box is at least `min_half` on each axis.
    pub fn with_min_half_extents(&self, min_half: f32) -> Self {
        let center = self.center();
        let half = self.half_extents().max(Vec3::splat(min_half));
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// The axis-aligned box enclosing this box mapped through `affine`.
    pub fn transformed_by(&self, affine: &Affine3A) -> Self {
        let mut corners = self.corners().into_iter();
        let first = affine.transform_point3(corners.next().unwrap());
        let mut out = Self::new(first, first);
        for c in corners {
            out.expand_to(affine.transform_point3(c));
        }
        out
    }
}
