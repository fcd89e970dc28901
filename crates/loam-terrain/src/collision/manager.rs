//! Streams physics tiles on their own grid, built from resident terrain tiles.
//!
//! Tiles are kept around every registered center (the viewpoint plus any
//! physics users); a tile is recycled only once it is out of reach of all of
//! them.

use std::time::Duration;

use glam::Vec3;
use loam_config::Config;
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use super::displacement::{DisplacementBackend, DisplacementJob};
use super::tessellator::{AdaptiveTessellator, SurfacePoint, TessellatedMesh, TessellationSettings};
use super::tile::{CollisionTile, CollisionTileRecord, TerrainSource, collect_surface};
use crate::coordinate::TileCoordinate;
use crate::manager::TileStreamingManager;
use crate::streaming::{StreamingParams, StreamingScheduler};

/// What one [`CollisionStreamingManager::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollisionTickReport {
    /// Cell of the first center.
    pub focus: TileCoordinate,
    /// Distinct center cells this tick.
    pub centers: usize,
    pub centers_changed: bool,
    /// Tiles tessellated and handed to the displacement step.
    pub started: usize,
    pub completed: usize,
    pub recycled: usize,
    /// Tiles still waiting for terrain.
    pub awaiting_terrain: usize,
    /// Built or displacing tiles whose terrain changed underneath them.
    pub invalidated: usize,
    /// Jobs the displacement step had no room for.
    pub deferred: usize,
    pub failed: usize,
    pub discarded: usize,
}

pub struct CollisionStreamingManager {
    tessellator: AdaptiveTessellator,
    displacement: Box<dyn DisplacementBackend>,
    tiles: FxHashMap<TileCoordinate, CollisionTile>,
    scheduler: StreamingScheduler,
    vertex_count: u32,
    grid_size: f32,
    next_build_id: u64,
    points: Vec<SurfacePoint>,
    strengths: Vec<f32>,
    sources: Vec<TerrainSource>,
}

impl CollisionStreamingManager {
    pub fn new(config: &Config, displacement: Box<dyn DisplacementBackend>) -> Self {
        Self {
            tessellator: AdaptiveTessellator::new(TessellationSettings::from(&config.collision)),
            displacement,
            tiles: FxHashMap::default(),
            scheduler: StreamingScheduler::new(StreamingParams::collision(config)),
            vertex_count: config.collision.tile_vertex_count,
            grid_size: config.generator.grid_size,
            next_build_id: 0,
            points: Vec::new(),
            strengths: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Advance by one tick around `centers`. Reads `terrain` but never
    /// modifies it.
    pub fn tick(
        &mut self,
        terrain: &TileStreamingManager,
        centers: &[Vec3],
        now: Duration,
    ) -> CollisionTickReport {
        let mut report = CollisionTickReport::default();
        self.apply_outcomes(&mut report);
        self.invalidate_stale(terrain, &mut report);

        report.centers_changed = self
            .scheduler
            .update_centers(centers, self.tiles.keys().copied());
        report.focus = self.scheduler.focus().unwrap_or_default();
        report.centers = self.scheduler.centers().count();
        if report.centers_changed {
            debug!(focus = %report.focus, centers = report.centers, "collision centers changed");
        }

        let tiles = &self.tiles;
        let orders = self.scheduler.plan(now, |c| tiles.contains_key(&c));
        for order in orders {
            let tile = match order.recycle.and_then(|old| self.tiles.remove(&old)) {
                Some(mut tile) => {
                    tile.retarget(order.coordinate);
                    report.recycled += 1;
                    tile
                }
                None => CollisionTile::new(order.coordinate),
            };
            self.tiles.insert(order.coordinate, tile);
        }

        let mut waiting: Vec<TileCoordinate> = self
            .tiles
            .values()
            .filter(|tile| tile.needs_build())
            .map(CollisionTile::coordinate)
            .collect();
        waiting.sort_by_key(|&c| (self.scheduler.distance_to_centers(c), c));
        for coordinate in waiting {
            self.try_build(terrain, coordinate, &mut report);
        }
        report
    }

    /// Send tiles built from terrain that has since been rebuilt or dropped
    /// back for another build. In-flight results for them are discarded.
    fn invalidate_stale(&mut self, terrain: &TileStreamingManager, report: &mut CollisionTickReport) {
        for tile in self.tiles.values_mut() {
            if tile.is_stale(terrain) {
                debug!(coordinate = %tile.coordinate(), "terrain changed under collision tile");
                tile.mark_unbuilt();
                report.invalidated += 1;
            }
        }
    }

    fn apply_outcomes(&mut self, report: &mut CollisionTickReport) {
        for outcome in self.displacement.drain_completed() {
            let job = outcome.job;
            let Some(tile) = self.tiles.get_mut(&job.coordinate) else {
                report.discarded += 1;
                continue;
            };
            if tile.expected_build() != Some(job.build_id) {
                report.discarded += 1;
                continue;
            }
            match outcome.result {
                Ok(offsets) if offsets.len() == job.mesh.vertex_count() => {
                    tile.apply(CollisionTileRecord::new(
                        job.coordinate,
                        job.origin,
                        job.mesh,
                        offsets,
                    ));
                    report.completed += 1;
                }
                Ok(offsets) => {
                    warn!(
                        coordinate = %job.coordinate,
                        "displacement returned {} offsets for {} vertices",
                        offsets.len(),
                        job.mesh.vertex_count()
                    );
                    tile.mark_unbuilt();
                    report.failed += 1;
                }
                Err(err) => {
                    warn!(coordinate = %job.coordinate, "collision displacement failed: {err}");
                    tile.mark_unbuilt();
                    report.failed += 1;
                }
            }
        }
    }

    fn try_build(
        &mut self,
        terrain: &TileStreamingManager,
        coordinate: TileCoordinate,
        report: &mut CollisionTickReport,
    ) {
        let Some(tile) = self.tiles.get_mut(&coordinate) else {
            return;
        };
        if let Err(missing) = collect_surface(
            terrain,
            coordinate,
            self.vertex_count,
            self.grid_size,
            &mut self.points,
            &mut self.strengths,
            &mut self.sources,
        ) {
            trace!(%coordinate, %missing, "collision tile waiting for terrain");
            tile.mark_awaiting_terrain();
            report.awaiting_terrain += 1;
            return;
        }

        let mut mesh = TessellatedMesh::default();
        self.tessellator
            .tessellate_grid(self.vertex_count, &self.points, &self.strengths, &mut mesh);
        let job = DisplacementJob {
            coordinate,
            build_id: self.next_build_id,
            origin: coordinate.world_origin(self.scheduler.params().tile_world_size),
            mesh,
        };
        let build_id = job.build_id;
        match self.displacement.submit(job) {
            Ok(()) => {
                self.next_build_id += 1;
                tile.mark_displacing(build_id, &self.sources);
                report.started += 1;
            }
            Err(_) => {
                tile.mark_unbuilt();
                report.deferred += 1;
            }
        }
    }

    /// Drop every tile and restart on the next tick.
    pub fn clear(&mut self) {
        self.tiles.clear();
        self.scheduler.reset();
    }

    pub fn tile(&self, coordinate: TileCoordinate) -> Option<&CollisionTile> {
        self.tiles.get(&coordinate)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &CollisionTile> {
        self.tiles.values()
    }

    pub fn focus(&self) -> Option<TileCoordinate> {
        self.scheduler.focus()
    }

    /// Center cells of the last tick, first center first.
    pub fn centers(&self) -> Vec<TileCoordinate> {
        self.scheduler.centers().collect()
    }

    pub fn pending_loads(&self) -> Vec<TileCoordinate> {
        self.scheduler
            .pending_loads(|c| self.tiles.contains_key(&c))
    }

    pub fn eviction_candidates(&self) -> Vec<TileCoordinate> {
        self.scheduler.eviction_candidates().collect()
    }

    pub fn resident_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn built_count(&self) -> usize {
        self.tiles.values().filter(|t| t.is_built()).count()
    }

    pub fn tessellator(&self) -> &AdaptiveTessellator {
        &self.tessellator
    }

    pub fn displacement_name(&self) -> &'static str {
        self.displacement.name()
    }

    /// Vertices per collision tile side (`V`).
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn tile_world_size(&self) -> f32 {
        self.scheduler.params().tile_world_size
    }
}
