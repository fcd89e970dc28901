//! Layered-noise heightfield synthesis.
//!
//! Heights are a product/sum of seven Perlin layers, each remapped to `[0, 1]`
//! and raised to a power (powers above one flatten valleys into plateaus).
//! Biome weights follow from normalized height with noise-perturbed soft
//! thresholds, and tessellation strength from the normal and the dominant
//! materials.

use glam::{Vec2, Vec3, Vec4};
use loam_config::{GeneratorConfig, MaterialConfig, MaterialLayer, NoiseLayer};
use noise::{NoiseFn, Perlin};

use crate::coordinate::TileCoordinate;
use crate::record::TerrainTileRecord;

/// One synthesized grid point.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HeightfieldSample {
    /// World position for [`HeightfieldSynthesizer::sample`], tile-local inside a record.
    pub position: Vec3,
    /// Unit surface normal.
    pub normal: Vec3,
    /// Material weights (grass, dirt, sand, snow); each in `[0, 1]`, sum at most 1.
    pub splat: Vec4,
    pub tessellation_strength: f32,
}

/// `clamp01((x - offset) * factor + 0.5)`: a soft threshold around `offset`.
pub fn blend_splat(x: f64, factor: f64, offset: f64) -> f64 {
    ((x - offset) * factor + 0.5).clamp(0.0, 1.0)
}

/// Global sample index of record cell `(i, j)` (border included) along one axis.
pub fn global_sample_index(tile: i32, tile_samples: u32, record_index: u32) -> i64 {
    tile as i64 * (tile_samples as i64 - 1) + record_index as i64 - 1
}

/// Deterministic height/normal/splat/tessellation function of world position.
#[derive(Clone)]
pub struct HeightfieldSynthesizer {
    perlin: Perlin,
    generator: GeneratorConfig,
    materials: MaterialConfig,
    grid: f64,
    offset: [f64; 2],
    max_height: f64,
}

impl HeightfieldSynthesizer {
    pub fn new(generator: &GeneratorConfig, materials: &MaterialConfig) -> Self {
        Self {
            perlin: Perlin::new(generator.seed),
            generator: generator.clone(),
            materials: materials.clone(),
            grid: generator.grid_size as f64,
            offset: [generator.offset[0] as f64, generator.offset[1] as f64],
            max_height: generator.max_height() as f64,
        }
    }

    pub fn generator(&self) -> &GeneratorConfig {
        &self.generator
    }

    pub fn materials(&self) -> &MaterialConfig {
        &self.materials
    }

    pub fn grid_size(&self) -> f32 {
        self.generator.grid_size
    }

    fn noise(&self, x: f64, z: f64, scale: f64, power: f64) -> f64 {
        let value = self
            .perlin
            .get([x * scale + self.offset[0], z * scale + self.offset[1]]);
        (value * 0.5 + 0.5).clamp(0.0, 1.0).powf(power)
    }

    fn layer(&self, x: f64, z: f64, layer: NoiseLayer) -> f64 {
        self.noise(x, z, layer.scale as f64, layer.power as f64)
    }

    /// Terrain height at world `(x, z)`.
    pub fn height(&self, x: f64, z: f64) -> f64 {
        let g = &self.generator;
        let detail_scale = g.detail.scale as f64;
        let detail_power = g.detail.power as f64;

        let base = self.layer(x, z, g.base_a) * self.layer(x, z, g.base_b) * g.base_height as f64;
        let hills = self.layer(x, z, g.hills) * g.hills_height as f64;
        let detail = 0.5
            * (self.noise(x, z, detail_scale, detail_power)
                + self.noise(x, z, detail_scale * 2.0, detail_power))
            * g.detail_height as f64;
        let plateaus = self.layer(x, z, g.plateaus) * g.plateau_height as f64;

        let weight_b = g.modulation_b_weight as f64;
        let modulation_a = self.layer(x, z, g.modulation_a);
        let modulation_b = self.layer(x, z, g.modulation_b) * weight_b;
        let modulation =
            1.0 + (modulation_a + modulation_b) / (1.0 + weight_b) * g.modulation_strength as f64;

        (base + hills + detail + plateaus) * modulation
    }

    /// Biome weights at world `(x, z)` for a point at `height`.
    pub fn splat(&self, x: f64, z: f64, height: f64) -> Vec4 {
        let g = &self.generator;
        let normalized = if self.max_height > 0.0 {
            height / self.max_height
        } else {
            0.0
        };
        let perturb = self.noise(
            x,
            z,
            g.detail.scale as f64 * 2.0,
            g.detail.power as f64,
        );

        let sand = blend_splat(
            1.0 - normalized + perturb * g.sand_random as f64,
            g.sand_blend as f64,
            0.99,
        );
        let snow = (1.0 - sand)
            * blend_splat(
                normalized + perturb * g.snow_random as f64,
                g.snow_blend as f64,
                0.6,
            );

        let temperature_scale = g.temperature_scale as f64;
        let warmth = self.noise(x, z, temperature_scale, 1.0)
            * (1.0
                + (self.noise(x, z, temperature_scale * 20.0, 1.0) - 0.5)
                    * g.temperature_random as f64);
        let temperature = blend_splat(warmth, g.temperature_blend as f64, 0.5);

        let remaining = (1.0 - (snow + sand)).max(0.0);
        Vec4::new(
            (remaining * temperature) as f32,
            (remaining * (1.0 - temperature)) as f32,
            sand as f32,
            snow as f32,
        )
    }

    /// Tessellation strength for a surface with `normal` and material weights `splat`.
    ///
    /// Each material contributes its top/bottom limit weighted by the vertical
    /// triplanar weight and its side limit weighted by the horizontal ones; the
    /// strongest contribution wins.
    pub fn tessellation_strength(&self, normal: Vec3, splat: Vec4) -> f32 {
        let materials = &self.materials;
        let mut blend = (normal.abs() - Vec3::splat(materials.blend_offset))
            .max(Vec3::ZERO)
            .powf(materials.blend_exponent);
        let blend_sum = blend.x + blend.y + blend.z;
        if blend_sum > 0.0 {
            blend /= blend_sum;
        }

        let max_weight = splat.max_element();
        let splat = if max_weight > 0.0 {
            splat / max_weight
        } else {
            splat
        };

        let mut strength = 0.0f32;
        for (weight, layer) in splat.to_array().into_iter().zip(&materials.layers) {
            if weight <= 0.0 {
                continue;
            }
            strength = strength.max(layer_strength(layer, normal, blend) * weight);
        }
        strength
    }

    /// Full sample at an arbitrary world position; normals use neighbours one grid step away.
    pub fn sample(&self, world: Vec2) -> HeightfieldSample {
        let (x, z) = (world.x as f64, world.y as f64);
        let step = self.grid;
        self.assemble(
            x,
            z,
            self.height(x, z),
            [
                self.height(x - step, z),
                self.height(x + step, z),
                self.height(x, z - step),
                self.height(x, z + step),
            ],
        )
    }

    /// Full sample at global grid index `(gx, gz)`, in world space.
    ///
    /// Both generation backends address samples this way, so identical indices
    /// give bit-identical samples.
    pub fn sample_index(&self, gx: i64, gz: i64) -> HeightfieldSample {
        let h = |ix: i64, iz: i64| self.height(ix as f64 * self.grid, iz as f64 * self.grid);
        self.assemble(
            gx as f64 * self.grid,
            gz as f64 * self.grid,
            h(gx, gz),
            [h(gx - 1, gz), h(gx + 1, gz), h(gx, gz - 1), h(gx, gz + 1)],
        )
    }

    /// Synthesize the `(N+2)²` record of one tile, border included.
    pub fn generate_record(
        &self,
        coordinate: TileCoordinate,
        tile_samples: u32,
    ) -> TerrainTileRecord {
        let stride = tile_samples as usize + 2;
        // One extra ring of heights so border samples get central differences too.
        let cache_stride = stride + 2;
        let gx0 = global_sample_index(coordinate.x, tile_samples, 0) - 1;
        let gz0 = global_sample_index(coordinate.y, tile_samples, 0) - 1;

        let mut heights = Vec::with_capacity(cache_stride * cache_stride);
        for cz in 0..cache_stride as i64 {
            for cx in 0..cache_stride as i64 {
                let gx = gx0 + cx;
                let gz = gz0 + cz;
                heights.push(self.height(gx as f64 * self.grid, gz as f64 * self.grid));
            }
        }
        let cached = |cx: usize, cz: usize| heights[cx + cache_stride * cz];

        let mut samples = Vec::with_capacity(stride * stride);
        for j in 0..stride {
            for i in 0..stride {
                let (cx, cz) = (i + 1, j + 1);
                let gx = gx0 + cx as i64;
                let gz = gz0 + cz as i64;
                let mut sample = self.assemble(
                    gx as f64 * self.grid,
                    gz as f64 * self.grid,
                    cached(cx, cz),
                    [
                        cached(cx - 1, cz),
                        cached(cx + 1, cz),
                        cached(cx, cz - 1),
                        cached(cx, cz + 1),
                    ],
                );
                sample.position = local_position(i, j, sample.position.y, self.grid_size());
                samples.push(sample);
            }
        }

        TerrainTileRecord::new(coordinate, tile_samples, self.grid_size(), samples)
    }

    fn assemble(&self, x: f64, z: f64, height: f64, neighbours: [f64; 4]) -> HeightfieldSample {
        let [left, right, back, front] = neighbours;
        let normal = Vec3::new(
            -(right - left) as f32,
            (2.0 * self.grid) as f32,
            -(front - back) as f32,
        )
        .normalize_or(Vec3::Y);
        let splat = self.splat(x, z, height);
        HeightfieldSample {
            position: Vec3::new(x as f32, height as f32, z as f32),
            normal,
            splat,
            tessellation_strength: self.tessellation_strength(normal, splat),
        }
    }
}

/// Tile-local position of record cell `(i, j)`; the first interior sample sits at the origin.
pub fn local_position(i: usize, j: usize, height: f32, grid_size: f32) -> Vec3 {
    Vec3::new(
        (i as f32 - 1.0) * grid_size,
        height,
        (j as f32 - 1.0) * grid_size,
    )
}

fn layer_strength(layer: &MaterialLayer, normal: Vec3, blend: Vec3) -> f32 {
    let mut strength = 0.0f32;
    if blend.y != 0.0 {
        let vertical = if normal.y >= 0.0 { layer.top } else { layer.bottom };
        strength = strength.max(blend.y * vertical);
    }
    let horizontal = blend.x + blend.z;
    if horizontal != 0.0 {
        strength = strength.max(horizontal * layer.sides);
    }
    strength
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthesizer() -> HeightfieldSynthesizer {
        HeightfieldSynthesizer::new(&GeneratorConfig::default(), &MaterialConfig::default())
    }

    fn flat_generator() -> GeneratorConfig {
        GeneratorConfig {
            base_height: 0.0,
            hills_height: 0.0,
            detail_height: 0.0,
            plateau_height: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_blend_splat_is_a_clamped_ramp() {
        assert_eq!(blend_splat(0.5, 4.0, 0.5), 0.5);
        assert_eq!(blend_splat(10.0, 4.0, 0.5), 1.0);
        assert_eq!(blend_splat(-10.0, 4.0, 0.5), 0.0);
        assert!((blend_splat(0.6, 2.0, 0.5) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_sampling_is_deterministic() {
        let a = synthesizer();
        let b = synthesizer();
        for p in [Vec2::new(0.0, 0.0), Vec2::new(123.4, -987.6), Vec2::new(1e5, 3.3)] {
            let first = a.sample(p);
            assert_eq!(first, a.sample(p), "repeated call at {p}");
            assert_eq!(first, b.sample(p), "second instance at {p}");
        }
    }

    #[test]
    fn test_seed_changes_terrain() {
        let mut other = GeneratorConfig::default();
        other.seed += 1;
        let a = synthesizer();
        let b = HeightfieldSynthesizer::new(&other, &MaterialConfig::default());
        let differs = (0..16).any(|i| {
            let p = Vec2::new(i as f32 * 37.0, i as f32 * 11.0);
            a.sample(p).position.y != b.sample(p).position.y
        });
        assert!(differs);
    }

    #[test]
    fn test_samples_are_well_formed() {
        let synth = synthesizer();
        let max_height = synth.generator().max_height() * 2.0;
        for i in 0..200 {
            let p = Vec2::new((i * 53 % 997) as f32 * 3.1, (i * 31 % 463) as f32 * -7.7);
            let s = synth.sample(p);
            assert!((s.normal.length() - 1.0).abs() < 1e-5, "normal at {p}");
            assert!(s.normal.y > 0.0, "heightfield normals face up at {p}");
            assert!(s.position.y >= 0.0 && s.position.y <= max_height);
            assert!(s.splat.min_element() >= 0.0, "negative splat at {p}");
            assert!(s.splat.element_sum() <= 1.0 + 1e-5, "splat sum at {p}");
            assert!(s.tessellation_strength >= 0.0);
        }
    }

    #[test]
    fn test_flat_terrain_has_vertical_normals() {
        let synth = HeightfieldSynthesizer::new(&flat_generator(), &MaterialConfig::default());
        let s = synth.sample(Vec2::new(40.0, -12.0));
        assert_eq!(s.position.y, 0.0);
        assert_eq!(s.normal, Vec3::Y);
    }

    #[test]
    fn test_low_ground_is_sand() {
        // Height zero normalizes to 0; a steep sand ramp saturates it.
        let generator = GeneratorConfig {
            sand_blend: 100.0,
            ..flat_generator()
        };
        let synth = HeightfieldSynthesizer::new(&generator, &MaterialConfig::default());
        let s = synth.sample(Vec2::new(5.0, 5.0));
        assert_eq!(s.splat.z, 1.0);
        assert_eq!(s.splat.w, 0.0);
        assert_eq!(s.splat.x + s.splat.y, 0.0);
    }

    #[test]
    fn test_tessellation_strength_uses_orientation_limits() {
        let synth = synthesizer();
        let grass = Vec4::new(1.0, 0.0, 0.0, 0.0);
        let layer = MaterialConfig::default().layers[0];
        assert_eq!(synth.tessellation_strength(Vec3::Y, grass), layer.top);
        assert_eq!(synth.tessellation_strength(Vec3::NEG_Y, grass), layer.bottom);
        assert_eq!(synth.tessellation_strength(Vec3::X, grass), layer.sides);
        assert_eq!(synth.tessellation_strength(Vec3::NEG_Z, grass), layer.sides);
    }

    #[test]
    fn test_tessellation_strength_normalizes_splat() {
        let synth = synthesizer();
        // Half-weight grass counts as full weight once normalized by its maximum.
        let half = Vec4::new(0.5, 0.0, 0.0, 0.0);
        assert_eq!(
            synth.tessellation_strength(Vec3::Y, half),
            MaterialConfig::default().layers[0].top
        );
    }

    #[test]
    fn test_tessellation_strength_zero_splat() {
        let synth = synthesizer();
        assert_eq!(synth.tessellation_strength(Vec3::Y, Vec4::ZERO), 0.0);
    }

    #[test]
    fn test_tessellation_strength_picks_strongest_material() {
        let synth = synthesizer();
        let layers = MaterialConfig::default().layers;
        let mixed = Vec4::new(1.0, 1.0, 0.0, 0.0);
        assert_eq!(
            synth.tessellation_strength(Vec3::Y, mixed),
            layers[0].top.max(layers[1].top)
        );
    }

    #[test]
    fn test_record_matches_indexed_samples() {
        let synth = synthesizer();
        let coordinate = TileCoordinate::new(-2, 3);
        let n = 9;
        let record = synth.generate_record(coordinate, n);
        let stride = n as usize + 2;
        assert_eq!(record.samples().len(), stride * stride);

        for j in 0..stride as u32 {
            for i in 0..stride as u32 {
                let gx = global_sample_index(coordinate.x, n, i);
                let gz = global_sample_index(coordinate.y, n, j);
                let expected = synth.sample_index(gx, gz);
                let actual = record.sample(i, j);
                assert_eq!(actual.position.y, expected.position.y, "height at ({i}, {j})");
                assert_eq!(actual.normal, expected.normal, "normal at ({i}, {j})");
                assert_eq!(actual.splat, expected.splat, "splat at ({i}, {j})");
                assert_eq!(actual.tessellation_strength, expected.tessellation_strength);
                assert_eq!(
                    actual.position.x,
                    (i as f32 - 1.0) * synth.grid_size(),
                    "records are tile-local"
                );
            }
        }
    }

    #[test]
    fn test_neighbouring_records_share_edges() {
        let synth = synthesizer();
        let n = 5;
        let left = synth.generate_record(TileCoordinate::new(0, 0), n);
        let right = synth.generate_record(TileCoordinate::new(1, 0), n);
        for j in 1..=n {
            assert_eq!(
                left.interior(n - 1, j - 1).position.y,
                right.interior(0, j - 1).position.y,
                "shared edge row {j}"
            );
        }
    }
}
