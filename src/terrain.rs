use bevy::prelude::*;

/// A heightfield terrain patch, sampled on a regular grid centered on the
/// entity origin. Rows run along local Z, columns along local X — the same
/// layout the pick proxy's heightfield shape is built from, so ray tests and
/// direct sampling agree.
#[derive(Component, Reflect, Clone, Default)]
#[reflect(Component)]
pub struct Terrain {
    /// Row-major height samples, `rows * columns` entries. May be empty while
    /// height data is still being authored; the pick proxy falls back to a
    /// unit box in that case.
    pub heights: Vec<f32>,
    pub rows: usize,
    pub columns: usize,
    /// Spacing between neighboring samples, in local units.
    pub cell_size: f32,
}

impl Terrain {
    pub fn flat(rows: usize, columns: usize, cell_size: f32, height: f32) -> Self {
        Self {
            heights: vec![height; rows * columns],
            rows,
            columns,
            cell_size,
        }
    }

    pub fn has_heights(&self) -> bool {
        self.rows >= 2 && self.columns >= 2 && self.heights.len() == self.rows * self.columns
    }

    /// Total extent along local X.
    pub fn width(&self) -> f32 {
        (self.columns.max(1) - 1) as f32 * self.cell_size
    }

    /// Total extent along local Z.
    pub fn depth(&self) -> f32 {
        (self.rows.max(1) - 1) as f32 * self.cell_size
    }

    pub fn sample(&self, row: usize, column: usize) -> f32 {
        self.heights[row * self.columns + column]
    }

    /// Bilinear height at a local XZ position. Returns `None` outside the
    /// sampled area or when no height data is present.
    pub fn height_at(&self, x: f32, z: f32) -> Option<f32> {
        if !self.has_heights() {
            return None;
        }
        let u = (x + self.width() * 0.5) / self.cell_size;
        let v = (z + self.depth() * 0.5) / self.cell_size;
        if u < 0.0 || v < 0.0 || u > (self.columns - 1) as f32 || v > (self.rows - 1) as f32 {
            return None;
        }
        let (c0, r0) = (u.floor() as usize, v.floor() as usize);
        let c1 = (c0 + 1).min(self.columns - 1);
        let r1 = (r0 + 1).min(self.rows - 1);
        let (fu, fv) = (u.fract(), v.fract());

        let h00 = self.sample(r0, c0);
        let h01 = self.sample(r0, c1);
        let h10 = self.sample(r1, c0);
        let h11 = self.sample(r1, c1);
        let top = h00 + (h01 - h00) * fu;
        let bottom = h10 + (h11 - h10) * fu;
        Some(top + (bottom - top) * fv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_terrain_samples_everywhere() {
        let terrain = Terrain::flat(8, 8, 1.0, 2.5);
        assert_eq!(terrain.height_at(0.0, 0.0), Some(2.5));
        assert_eq!(terrain.height_at(-3.5, 3.5), Some(2.5));
        assert_eq!(terrain.height_at(100.0, 0.0), None);
    }

    #[test]
    fn bilinear_interpolates_between_samples() {
        let mut terrain = Terrain::flat(2, 2, 2.0, 0.0);
        // One raised corner: heights are (row, column) = (1, 1).
        terrain.heights[3] = 4.0;
        let mid = terrain.height_at(0.0, 0.0).unwrap();
        assert!((mid - 1.0).abs() < 1e-5);
        let corner = terrain.height_at(1.0, 1.0).unwrap();
        assert!((corner - 4.0).abs() < 1e-5);
    }

    #[test]
    fn empty_heightfield_has_no_samples() {
        let terrain = Terrain::default();
        assert!(!terrain.has_heights());
        assert_eq!(terrain.height_at(0.0, 0.0), None);
    }
}
