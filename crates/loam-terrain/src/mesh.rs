//! Regular grid triangulation and bounds shared by render and collision meshes.

use glam::{Vec2, Vec3};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// An inverted box that any point expands.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn from_points(points: &[Vec3]) -> Self {
        points.iter().fold(Self::EMPTY, |aabb, &p| Self {
            min: aabb.min.min(p),
            max: aabb.max.max(p),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Two triangles per cell of a `size × size` vertex grid (row-major, `x + size * y`):
/// `(x,y),(x,y+1),(x+1,y+1)` and `(x,y),(x+1,y+1),(x+1,y)`.
pub fn grid_triangle_indices(size: u32) -> Vec<u32> {
    let cells = size.saturating_sub(1) as usize;
    let mut indices = Vec::with_capacity(cells * cells * 6);
    for y in 0..size.saturating_sub(1) {
        for x in 0..size.saturating_sub(1) {
            let v = |dx: u32, dy: u32| (x + dx) + size * (y + dy);
            indices.extend_from_slice(&[v(0, 0), v(0, 1), v(1, 1)]);
            indices.extend_from_slice(&[v(0, 0), v(1, 1), v(1, 0)]);
        }
    }
    indices
}

/// Texture coordinates of a `size × size` interior grid inside an `(size+2)²` record,
/// sampling cell centers so the border never bleeds in.
pub fn grid_uvs(size: u32) -> Vec<Vec2> {
    let denom = (size + 2) as f32;
    let mut uvs = Vec::with_capacity((size * size) as usize);
    for y in 0..size {
        for x in 0..size {
            uvs.push(Vec2::new(
                (x as f32 + 1.5) / denom,
                (y as f32 + 1.5) / denom,
            ));
        }
    }
    uvs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_indices_count_and_range() {
        let indices = grid_triangle_indices(4);
        assert_eq!(indices.len(), 3 * 3 * 6);
        assert!(indices.iter().all(|&i| i < 16));
        assert!(grid_triangle_indices(1).is_empty());
    }

    #[test]
    fn test_grid_first_cell_layout() {
        let indices = grid_triangle_indices(3);
        assert_eq!(&indices[..6], &[0, 3, 4, 0, 4, 1]);
    }

    #[test]
    fn test_grid_winding_faces_up() {
        // Vertex (x, y) at world (x, 0, y); every triangle's normal must point +Y.
        let size = 3;
        let pos = |i: u32| Vec3::new((i % size) as f32, 0.0, (i / size) as f32);
        for tri in grid_triangle_indices(size).chunks(3) {
            let (a, b, c) = (pos(tri[0]), pos(tri[1]), pos(tri[2]));
            let normal = (b - a).cross(c - a);
            assert!(normal.y > 0.0, "triangle {tri:?} faces down");
        }
    }

    #[test]
    fn test_uvs_sample_cell_centers() {
        let uvs = grid_uvs(2);
        assert_eq!(uvs.len(), 4);
        assert_eq!(uvs[0], Vec2::new(1.5 / 4.0, 1.5 / 4.0));
        assert_eq!(uvs[3], Vec2::new(2.5 / 4.0, 2.5 / 4.0));
    }

    #[test]
    fn test_aabb_from_points() {
        let aabb = Aabb::from_points(&[Vec3::new(1.0, -2.0, 3.0), Vec3::new(-1.0, 4.0, 0.0)]);
        assert_eq!(aabb.min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 4.0, 3.0));
        assert_eq!(aabb.center(), Vec3::new(0.0, 1.0, 1.5));
        assert!(!aabb.is_empty());
        assert!(Aabb::from_points(&[]).is_empty());
    }
}
