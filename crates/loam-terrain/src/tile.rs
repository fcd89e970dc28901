//! A resident terrain tile: its generated record and the render mesh built from it.

use glam::{Vec2, Vec3};

use crate::coordinate::TileCoordinate;
use crate::mesh::{Aabb, grid_triangle_indices, grid_uvs};
use crate::record::TerrainTileRecord;

/// Build progress of a resident tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    /// Needs a generation request (new, recycled, or after a failed build).
    Unbuilt,
    /// Waiting for the outcome tagged `build_id`.
    Building { build_id: u64 },
    Built,
}

/// Interior `N×N` render mesh of one tile, in tile-local space.
#[derive(Debug, Clone, Default)]
pub struct TerrainMesh {
    vertices: Vec<Vec3>,
    normals: Vec<Vec3>,
    uvs: Vec<Vec2>,
    indices: Vec<u32>,
    bounds: Aabb,
    /// Grid size the indices and UVs were generated for.
    grid_size: u32,
}

impl TerrainMesh {
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    pub fn uvs(&self) -> &[Vec2] {
        &self.uvs
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Refill from `record`, reusing the existing allocations.
    fn fill(&mut self, record: &TerrainTileRecord) {
        let n = record.tile_samples();
        if self.grid_size != n {
            self.indices = grid_triangle_indices(n);
            self.uvs = grid_uvs(n);
            self.grid_size = n;
        }

        self.vertices.clear();
        self.normals.clear();
        for y in 0..n {
            for x in 0..n {
                let sample = record.interior(x, y);
                self.vertices.push(sample.position);
                self.normals.push(sample.normal);
            }
        }
        self.bounds = Aabb::from_points(&self.vertices);
    }
}

/// One streamed tile. Tile objects are recycled between coordinates.
#[derive(Debug, Clone)]
pub struct TerrainTile {
    coordinate: TileCoordinate,
    state: TileState,
    record: Option<TerrainTileRecord>,
    mesh: TerrainMesh,
    mesh_ready: bool,
    revision: Option<u64>,
}

impl TerrainTile {
    pub fn new(coordinate: TileCoordinate) -> Self {
        Self {
            coordinate,
            state: TileState::Unbuilt,
            record: None,
            mesh: TerrainMesh::default(),
            mesh_ready: false,
            revision: None,
        }
    }

    pub fn coordinate(&self) -> TileCoordinate {
        self.coordinate
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn is_built(&self) -> bool {
        self.state == TileState::Built
    }

    /// The build id an outcome must carry to be applied.
    pub fn expected_build(&self) -> Option<u64> {
        match self.state {
            TileState::Building { build_id } => Some(build_id),
            _ => None,
        }
    }

    /// The last applied record. Still present during a same-coordinate rebuild.
    pub fn record(&self) -> Option<&TerrainTileRecord> {
        self.record.as_ref()
    }

    /// Build id of the applied record. Changes whenever a new record lands.
    pub fn revision(&self) -> Option<u64> {
        self.revision
    }

    /// The render mesh, once one has been built for this coordinate.
    pub fn mesh(&self) -> Option<&TerrainMesh> {
        self.mesh_ready.then_some(&self.mesh)
    }

    /// World-space bounds of the current mesh.
    pub fn world_bounds(&self) -> Option<Aabb> {
        let record = self.record.as_ref()?;
        let mesh = self.mesh()?;
        let origin = record.world_origin();
        Some(Aabb {
            min: mesh.bounds.min + origin,
            max: mesh.bounds.max + origin,
        })
    }

    /// Reuse this tile for another coordinate. The old record and mesh are
    /// hidden immediately; their buffers are kept for the next build.
    pub fn retarget(&mut self, coordinate: TileCoordinate) {
        self.coordinate = coordinate;
        self.state = TileState::Unbuilt;
        self.record = None;
        self.mesh_ready = false;
        self.revision = None;
    }

    pub fn mark_building(&mut self, build_id: u64) {
        self.state = TileState::Building { build_id };
    }

    /// Return to `Unbuilt` after a failed build; any previous mesh stays visible.
    pub fn mark_unbuilt(&mut self) {
        self.state = TileState::Unbuilt;
    }

    /// Install a finished record and rebuild the mesh from it.
    pub fn apply(&mut self, record: TerrainTileRecord) {
        debug_assert_eq!(record.coordinate(), self.coordinate);
        self.mesh.fill(&record);
        self.mesh_ready = true;
        self.record = Some(record);
        self.revision = self.expected_build();
        self.state = TileState::Built;
    }
}

#[cfg(test)]
mod tests {
    use loam_config::{GeneratorConfig, MaterialConfig};

    use super::*;
    use crate::heightfield::HeightfieldSynthesizer;

    fn record(x: i32, y: i32, n: u32) -> TerrainTileRecord {
        HeightfieldSynthesizer::new(&GeneratorConfig::default(), &MaterialConfig::default())
            .generate_record(TileCoordinate::new(x, y), n)
    }

    #[test]
    fn test_new_tile_has_no_mesh() {
        let tile = TerrainTile::new(TileCoordinate::new(1, 1));
        assert_eq!(tile.state(), TileState::Unbuilt);
        assert!(tile.mesh().is_none());
        assert!(tile.record().is_none());
        assert_eq!(tile.expected_build(), None);
    }

    #[test]
    fn test_apply_builds_interior_mesh() {
        let mut tile = TerrainTile::new(TileCoordinate::new(2, -1));
        tile.mark_building(4);
        assert_eq!(tile.expected_build(), Some(4));

        let rec = record(2, -1, 5);
        tile.apply(rec.clone());
        assert!(tile.is_built());

        let mesh = tile.mesh().unwrap();
        assert_eq!(mesh.vertices().len(), 25);
        assert_eq!(mesh.normals().len(), 25);
        assert_eq!(mesh.uvs().len(), 25);
        assert_eq!(mesh.triangle_count(), 4 * 4 * 2);
        assert_eq!(mesh.vertices()[0], rec.interior(0, 0).position);
        assert_eq!(mesh.vertices()[0].x, 0.0);
        assert_eq!(mesh.vertices()[24], rec.interior(4, 4).position);
        assert_eq!(mesh.normals()[7], rec.interior(2, 1).normal);

        let (low, high) = rec.height_range();
        assert_eq!(mesh.bounds().min.y, low);
        assert_eq!(mesh.bounds().max.y, high);
        let world = tile.world_bounds().unwrap();
        assert_eq!(world.min.x, 2.0 * rec.tile_world_size());
    }

    #[test]
    fn test_revision_follows_applied_build() {
        let mut tile = TerrainTile::new(TileCoordinate::ORIGIN);
        assert_eq!(tile.revision(), None);
        tile.mark_building(2);
        tile.apply(record(0, 0, 5));
        assert_eq!(tile.revision(), Some(2));

        tile.mark_building(6);
        assert_eq!(tile.revision(), Some(2));
        tile.apply(record(0, 0, 5));
        assert_eq!(tile.revision(), Some(6));

        tile.retarget(TileCoordinate::new(1, 0));
        assert_eq!(tile.revision(), None);
    }

    #[test]
    fn test_same_coordinate_rebuild_keeps_mesh_visible() {
        let mut tile = TerrainTile::new(TileCoordinate::ORIGIN);
        tile.apply(record(0, 0, 5));
        tile.mark_building(9);
        assert!(tile.mesh().is_some());
        tile.mark_unbuilt();
        assert!(tile.mesh().is_some());
    }

    #[test]
    fn test_retarget_hides_mesh_and_reuses_buffers() {
        let mut tile = TerrainTile::new(TileCoordinate::ORIGIN);
        tile.apply(record(0, 0, 5));
        let capacity = tile.mesh.vertices.capacity();

        tile.retarget(TileCoordinate::new(7, 7));
        assert!(tile.mesh().is_none());
        assert!(tile.record().is_none());
        assert_eq!(tile.state(), TileState::Unbuilt);

        tile.apply(record(7, 7, 5));
        assert_eq!(tile.mesh.vertices.capacity(), capacity);
        assert_eq!(tile.coordinate(), TileCoordinate::new(7, 7));
    }

    #[test]
    fn test_grid_size_change_regenerates_indices() {
        let mut tile = TerrainTile::new(TileCoordinate::ORIGIN);
        tile.apply(record(0, 0, 5));
        assert_eq!(tile.mesh().unwrap().indices().len(), 4 * 4 * 6);
        tile.retarget(TileCoordinate::ORIGIN);
        tile.apply(record(0, 0, 9));
        let mesh = tile.mesh().unwrap();
        assert_eq!(mesh.indices().len(), 8 * 8 * 6);
        assert_eq!(mesh.uvs().len(), 81);
    }
}
