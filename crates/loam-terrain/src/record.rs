//! Generated data of one terrain tile.

use glam::Vec3;

use crate::coordinate::TileCoordinate;
use crate::heightfield::HeightfieldSample;

/// `(N+2)²` samples of one tile, row-major, with a one-sample border.
///
/// Record cell `(i, j)` for `i, j` in `0..N+2`; interior sample `(x, y)` lives
/// at record cell `(x + 1, y + 1)`. Positions are relative to the tile origin.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainTileRecord {
    coordinate: TileCoordinate,
    tile_samples: u32,
    grid_size: f32,
    samples: Vec<HeightfieldSample>,
}

impl TerrainTileRecord {
    pub fn new(
        coordinate: TileCoordinate,
        tile_samples: u32,
        grid_size: f32,
        samples: Vec<HeightfieldSample>,
    ) -> Self {
        debug_assert_eq!(
            samples.len(),
            Self::sample_count(tile_samples),
            "record size mismatch"
        );
        Self {
            coordinate,
            tile_samples,
            grid_size,
            samples,
        }
    }

    /// Number of samples in a record with `tile_samples` interior samples per side.
    pub fn sample_count(tile_samples: u32) -> usize {
        let stride = tile_samples as usize + 2;
        stride * stride
    }

    pub fn coordinate(&self) -> TileCoordinate {
        self.coordinate
    }

    /// Interior samples per side (`N`).
    pub fn tile_samples(&self) -> u32 {
        self.tile_samples
    }

    pub fn grid_size(&self) -> f32 {
        self.grid_size
    }

    /// Samples per record row, border included.
    pub fn stride(&self) -> u32 {
        self.tile_samples + 2
    }

    pub fn samples(&self) -> &[HeightfieldSample] {
        &self.samples
    }

    /// Record cell `(i, j)`, border included.
    pub fn sample(&self, i: u32, j: u32) -> &HeightfieldSample {
        &self.samples[i as usize + self.stride() as usize * j as usize]
    }

    /// Interior sample `(x, y)`, `0..N` on both axes.
    pub fn interior(&self, x: u32, y: u32) -> &HeightfieldSample {
        self.sample(x + 1, y + 1)
    }

    pub fn tile_world_size(&self) -> f32 {
        self.tile_samples.saturating_sub(1) as f32 * self.grid_size
    }

    pub fn world_origin(&self) -> Vec3 {
        self.coordinate.world_origin(self.tile_world_size())
    }

    /// Lowest and highest interior height.
    pub fn height_range(&self) -> (f32, f32) {
        let mut range = (f32::INFINITY, f32::NEG_INFINITY);
        for y in 0..self.tile_samples {
            for x in 0..self.tile_samples {
                let h = self.interior(x, y).position.y;
                range.0 = range.0.min(h);
                range.1 = range.1.max(h);
            }
        }
        range
    }
}
