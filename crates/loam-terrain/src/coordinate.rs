//! Integer tile coordinates on the XZ plane and the nearest-first loading circle.

use std::ops::Add;

use glam::Vec3;

/// Grid cell of a streamed tile. `y` runs along world Z.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TileCoordinate {
    pub x: i32,
    pub y: i32,
}

impl TileCoordinate {
    pub const ORIGIN: Self = Self { x: 0, y: 0 };

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Squared distance to the origin.
    pub fn distance_sq(self) -> i64 {
        let x = self.x as i64;
        let y = self.y as i64;
        x * x + y * y
    }

    /// Chebyshev (chessboard) distance between two cells.
    pub fn chebyshev(self, other: Self) -> u32 {
        let dx = (self.x as i64 - other.x as i64).unsigned_abs();
        let dy = (self.y as i64 - other.y as i64).unsigned_abs();
        dx.max(dy) as u32
    }

    /// The cell containing `position` on a grid of `tile_world_size` cells.
    ///
    /// `focus_offset` shifts the cell boundaries by a fraction of a tile:
    /// terrain tiles use `0.5` so the focus changes at tile edges, collision
    /// tiles use `0.0`.
    pub fn containing(position: Vec3, tile_world_size: f32, focus_offset: f32) -> Self {
        let shift = focus_offset as f64 * tile_world_size as f64;
        let size = tile_world_size as f64;
        Self {
            x: ((position.x as f64 + shift) / size).floor() as i32,
            y: ((position.z as f64 + shift) / size).floor() as i32,
        }
    }

    /// World position of the tile's first sample (its local origin).
    pub fn world_origin(self, tile_world_size: f32) -> Vec3 {
        Vec3::new(
            self.x as f32 * tile_world_size,
            0.0,
            self.y as f32 * tile_world_size,
        )
    }
}

impl Add for TileCoordinate {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Every offset in `[-radius, radius]²`, nearest first.
///
/// The sort is stable, so offsets at equal distance keep x-major grid order.
pub fn loading_circle(radius: u32) -> Vec<TileCoordinate> {
    let r = radius as i32;
    let mut circle = Vec::with_capacity(((2 * radius + 1) * (2 * radius + 1)) as usize);
    for x in -r..=r {
        for y in -r..=r {
            circle.push(TileCoordinate::new(x, y));
        }
    }
    circle.sort_by_key(|c| c.distance_sq());
    circle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loading_circle_radius_one() {
        let circle = loading_circle(1);
        assert_eq!(circle.len(), 9);
        assert_eq!(circle[0], TileCoordinate::ORIGIN);
        for c in &circle[1..5] {
            assert_eq!(c.distance_sq(), 1, "axis neighbours come second: {c}");
        }
        for c in &circle[5..] {
            assert_eq!(c.distance_sq(), 2, "diagonals come last: {c}");
        }
    }

    #[test]
    fn test_loading_circle_sorted_and_complete() {
        for radius in 0..6u32 {
            let circle = loading_circle(radius);
            let side = (2 * radius + 1) as usize;
            assert_eq!(circle.len(), side * side);
            assert!(
                circle
                    .windows(2)
                    .all(|w| w[0].distance_sq() <= w[1].distance_sq()),
                "radius {radius} not sorted"
            );
            let unique: std::collections::HashSet<_> = circle.iter().collect();
            assert_eq!(unique.len(), circle.len());
        }
    }

    #[test]
    fn test_loading_circle_ties_keep_grid_order() {
        let circle = loading_circle(1);
        assert_eq!(
            &circle[1..5],
            &[
                TileCoordinate::new(-1, 0),
                TileCoordinate::new(0, -1),
                TileCoordinate::new(0, 1),
                TileCoordinate::new(1, 0),
            ]
        );
    }

    #[test]
    fn test_chebyshev_distance() {
        let a = TileCoordinate::new(5, 5);
        assert_eq!(a.chebyshev(TileCoordinate::new(5, 5)), 0);
        assert_eq!(a.chebyshev(TileCoordinate::new(2, 6)), 3);
        assert_eq!(a.chebyshev(TileCoordinate::new(9, 1)), 4);
        assert_eq!(
            TileCoordinate::new(i32::MIN, 0).chebyshev(TileCoordinate::new(i32::MAX, 0)),
            u32::MAX
        );
    }

    #[test]
    fn test_containing_with_half_tile_offset() {
        // 64 m tiles: the focus switches to (1, 0) once x passes 32 m.
        assert_eq!(
            TileCoordinate::containing(Vec3::new(31.9, 0.0, 0.0), 64.0, 0.5),
            TileCoordinate::new(0, 0)
        );
        assert_eq!(
            TileCoordinate::containing(Vec3::new(32.0, 0.0, 0.0), 64.0, 0.5),
            TileCoordinate::new(1, 0)
        );
        assert_eq!(
            TileCoordinate::containing(Vec3::new(-32.1, 500.0, -0.1), 64.0, 0.5),
            TileCoordinate::new(-1, 0)
        );
    }

    #[test]
    fn test_containing_without_offset() {
        assert_eq!(
            TileCoordinate::containing(Vec3::new(-0.5, 0.0, 16.0), 16.0, 0.0),
            TileCoordinate::new(-1, 1)
        );
    }

    #[test]
    fn test_add_and_origin() {
        let c = TileCoordinate::new(2, -3) + TileCoordinate::new(-1, 1);
        assert_eq!(c, TileCoordinate::new(1, -2));
        assert_eq!(c.world_origin(10.0), Vec3::new(10.0, 0.0, -20.0));
    }
}
