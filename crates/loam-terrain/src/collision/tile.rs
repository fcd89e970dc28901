//! Physics tiles and the terrain samples they are built from.

use glam::{Vec3, Vec4};

use super::tessellator::{SurfacePoint, TessellatedMesh};
use crate::coordinate::TileCoordinate;
use crate::manager::TileStreamingManager;
use crate::mesh::Aabb;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionTileState {
    Unbuilt,
    /// An overlapping terrain tile is not built yet; retried every tick.
    AwaitingTerrain,
    Displacing { build_id: u64 },
    Built,
}

/// Finished collider geometry of one tile, in tile-local space.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionTileRecord {
    coordinate: TileCoordinate,
    origin: Vec3,
    vertices: Vec<Vec3>,
    normals: Vec<Vec3>,
    splats: Vec<Vec4>,
    indices: Vec<u32>,
    displacements: Vec<f32>,
    collider: Vec<Vec3>,
    bounds: Aabb,
}

impl CollisionTileRecord {
    /// `displacements` holds one offset per mesh vertex.
    pub fn new(
        coordinate: TileCoordinate,
        origin: Vec3,
        mesh: TessellatedMesh,
        displacements: Vec<f32>,
    ) -> Self {
        debug_assert_eq!(mesh.vertex_count(), displacements.len());
        let collider: Vec<Vec3> = mesh
            .positions
            .iter()
            .zip(&mesh.normals)
            .zip(&displacements)
            .map(|((&v, &n), &d)| v + n * d)
            .collect();
        let bounds = Aabb::from_points(&collider);
        Self {
            coordinate,
            origin,
            vertices: mesh.positions,
            normals: mesh.normals,
            splats: mesh.splats,
            indices: mesh.indices,
            displacements,
            collider,
            bounds,
        }
    }

    pub fn coordinate(&self) -> TileCoordinate {
        self.coordinate
    }

    /// World position of the tile's local origin.
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// Tessellated vertices before displacement.
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    pub fn splats(&self) -> &[Vec4] {
        &self.splats
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn displacements(&self) -> &[f32] {
        &self.displacements
    }

    /// `vertex + normal * displacement` for every vertex.
    pub fn collider_vertices(&self) -> &[Vec3] {
        &self.collider
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Local-space bounds of the collider.
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }
}

/// A terrain tile read by a collision build, and the revision that was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerrainSource {
    pub coordinate: TileCoordinate,
    pub revision: Option<u64>,
}

impl TerrainSource {
    /// Whether `terrain` still holds the same built record.
    pub fn is_current(&self, terrain: &TileStreamingManager) -> bool {
        terrain
            .tile(self.coordinate)
            .is_some_and(|tile| tile.is_built() && tile.revision() == self.revision)
    }
}

/// One streamed physics tile.
#[derive(Debug, Clone)]
pub struct CollisionTile {
    coordinate: TileCoordinate,
    state: CollisionTileState,
    record: Option<CollisionTileRecord>,
    sources: Vec<TerrainSource>,
}

impl CollisionTile {
    pub fn new(coordinate: TileCoordinate) -> Self {
        Self {
            coordinate,
            state: CollisionTileState::Unbuilt,
            record: None,
            sources: Vec::new(),
        }
    }

    pub fn coordinate(&self) -> TileCoordinate {
        self.coordinate
    }

    pub fn state(&self) -> CollisionTileState {
        self.state
    }

    pub fn is_built(&self) -> bool {
        self.state == CollisionTileState::Built
    }

    /// Whether the tile is waiting to start a build.
    pub fn needs_build(&self) -> bool {
        matches!(
            self.state,
            CollisionTileState::Unbuilt | CollisionTileState::AwaitingTerrain
        )
    }

    pub fn expected_build(&self) -> Option<u64> {
        match self.state {
            CollisionTileState::Displacing { build_id } => Some(build_id),
            _ => None,
        }
    }

    pub fn record(&self) -> Option<&CollisionTileRecord> {
        self.record.as_ref()
    }

    /// Terrain tiles the current or in-flight build was made from.
    pub fn sources(&self) -> &[TerrainSource] {
        &self.sources
    }

    /// A displacing or built tile whose terrain has since changed.
    pub fn is_stale(&self, terrain: &TileStreamingManager) -> bool {
        matches!(
            self.state,
            CollisionTileState::Displacing { .. } | CollisionTileState::Built
        ) && self.sources.iter().any(|source| !source.is_current(terrain))
    }

    pub fn retarget(&mut self, coordinate: TileCoordinate) {
        self.coordinate = coordinate;
        self.state = CollisionTileState::Unbuilt;
        self.record = None;
        self.sources.clear();
    }

    pub fn mark_awaiting_terrain(&mut self) {
        self.state = CollisionTileState::AwaitingTerrain;
    }

    pub fn mark_displacing(&mut self, build_id: u64, sources: &[TerrainSource]) {
        self.state = CollisionTileState::Displacing { build_id };
        self.sources.clear();
        self.sources.extend_from_slice(sources);
    }

    /// Back to `Unbuilt`; a previous collider stays available until replaced.
    pub fn mark_unbuilt(&mut self) {
        self.state = CollisionTileState::Unbuilt;
    }

    pub fn apply(&mut self, record: CollisionTileRecord) {
        debug_assert_eq!(record.coordinate(), self.coordinate);
        self.record = Some(record);
        self.state = CollisionTileState::Built;
    }
}

/// Terrain tile and interior sample index covering global sample index `g` on one axis.
fn terrain_cell(g: i64, tile_squares: i64) -> (i32, u32) {
    (
        g.div_euclid(tile_squares) as i32,
        g.rem_euclid(tile_squares) as u32,
    )
}

/// Copy the `V×V` surface of collision tile `coordinate` out of the built
/// terrain tiles overlapping it.
///
/// Positions are collision-tile-local. Every terrain tile read is listed once
/// in `sources`. On failure returns the first overlapping terrain tile that is
/// missing or not built.
pub fn collect_surface(
    terrain: &TileStreamingManager,
    coordinate: TileCoordinate,
    vertex_count: u32,
    grid_size: f32,
    points: &mut Vec<SurfacePoint>,
    strengths: &mut Vec<f32>,
    sources: &mut Vec<TerrainSource>,
) -> Result<(), TileCoordinate> {
    let tile_squares = terrain.tile_samples().saturating_sub(1).max(1) as i64;
    let squares = vertex_count.saturating_sub(1) as i64;
    let axis = |c: i32| -> Vec<(i32, u32)> {
        (0..vertex_count as i64)
            .map(|i| terrain_cell(c as i64 * squares + i, tile_squares))
            .collect()
    };
    let columns = axis(coordinate.x);
    let rows = axis(coordinate.y);

    points.clear();
    strengths.clear();
    sources.clear();
    for (y, &(ty, iy)) in rows.iter().enumerate() {
        for (x, &(tx, ix)) in columns.iter().enumerate() {
            let source = TileCoordinate::new(tx, ty);
            let tile = terrain
                .tile(source)
                .filter(|tile| tile.is_built())
                .ok_or(source)?;
            let record = tile.record().ok_or(source)?;
            if !sources.iter().any(|s| s.coordinate == source) {
                sources.push(TerrainSource {
                    coordinate: source,
                    revision: tile.revision(),
                });
            }
            let sample = record.interior(ix, iy);
            points.push(SurfacePoint {
                position: Vec3::new(
                    x as f32 * grid_size,
                    sample.position.y,
                    y as f32 * grid_size,
                ),
                normal: sample.normal,
                splat: sample.splat,
            });
            strengths.push(sample.tessellation_strength);
        }
    }
    Ok(())
}
