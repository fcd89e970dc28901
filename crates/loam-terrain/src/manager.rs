//! Keeps terrain tiles resident around a moving viewpoint.

use std::time::Duration;

use glam::Vec3;
use loam_config::Config;
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::backend::{GenerationBackend, GenerationRequest};
use crate::coordinate::TileCoordinate;
use crate::streaming::{StreamingParams, StreamingScheduler};
use crate::tile::{TerrainTile, TileState};

/// What one [`TileStreamingManager::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamingTickReport {
    pub focus: TileCoordinate,
    pub focus_changed: bool,
    /// Generation requests accepted by the backend.
    pub started: usize,
    /// Outcomes applied to their tile.
    pub completed: usize,
    /// Loads that reused an evicted tile.
    pub recycled: usize,
    /// Failed outcomes; the tile is retried next tick.
    pub failed: usize,
    /// Outcomes for tiles that were rebuilt, retargeted or dropped since.
    pub discarded: usize,
    /// Requests the backend had no room for.
    pub deferred: usize,
}

/// Owns the resident terrain tiles and drives their generation.
pub struct TileStreamingManager {
    backend: Box<dyn GenerationBackend>,
    tiles: FxHashMap<TileCoordinate, TerrainTile>,
    scheduler: StreamingScheduler,
    tile_samples: u32,
    next_build_id: u64,
}

impl TileStreamingManager {
    pub fn new(config: &Config, backend: Box<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            tiles: FxHashMap::default(),
            scheduler: StreamingScheduler::new(StreamingParams::terrain(config)),
            tile_samples: config.generator.tile_samples,
            next_build_id: 0,
        }
    }

    /// Advance streaming by one tick.
    ///
    /// Applies finished builds, resubmits tiles whose build failed or was
    /// rejected, then issues new loads around the focus.
    pub fn tick(&mut self, viewpoint: Vec3, now: Duration) -> StreamingTickReport {
        let mut report = StreamingTickReport::default();
        self.apply_outcomes(&mut report);

        report.focus_changed = self
            .scheduler
            .update_focus(viewpoint, self.tiles.keys().copied());
        let focus = self.scheduler.focus_for(viewpoint);
        report.focus = focus;
        if report.focus_changed {
            debug!(
                %focus,
                candidates = self.scheduler.eviction_candidates().count(),
                "terrain focus changed"
            );
        }

        let mut unbuilt: Vec<TileCoordinate> = self
            .tiles
            .values()
            .filter(|tile| tile.state() == TileState::Unbuilt)
            .map(TerrainTile::coordinate)
            .collect();
        unbuilt.sort_by_key(|c| c.chebyshev(focus));
        for coordinate in unbuilt {
            self.submit(coordinate, &mut report);
        }

        let tiles = &self.tiles;
        let orders = self.scheduler.plan(now, |c| tiles.contains_key(&c));
        for order in orders {
            let tile = match order.recycle.and_then(|old| self.tiles.remove(&old)) {
                Some(mut tile) => {
                    trace!(from = %tile.coordinate(), to = %order.coordinate, "recycling tile");
                    tile.retarget(order.coordinate);
                    report.recycled += 1;
                    tile
                }
                None => TerrainTile::new(order.coordinate),
            };
            self.tiles.insert(order.coordinate, tile);
            self.submit(order.coordinate, &mut report);
        }
        report
    }

    fn apply_outcomes(&mut self, report: &mut StreamingTickReport) {
        for outcome in self.backend.drain_completed() {
            let Some(tile) = self.tiles.get_mut(&outcome.coordinate) else {
                report.discarded += 1;
                continue;
            };
            if tile.expected_build() != Some(outcome.build_id) {
                report.discarded += 1;
                continue;
            }
            match outcome.result {
                Ok(record) => {
                    tile.apply(record);
                    report.completed += 1;
                }
                Err(err) => {
                    warn!(coordinate = %outcome.coordinate, "terrain generation failed: {err}");
                    tile.mark_unbuilt();
                    report.failed += 1;
                }
            }
        }
    }

    fn submit(&mut self, coordinate: TileCoordinate, report: &mut StreamingTickReport) -> bool {
        let Some(tile) = self.tiles.get_mut(&coordinate) else {
            return false;
        };
        let request = GenerationRequest {
            coordinate,
            build_id: self.next_build_id,
            tile_samples: self.tile_samples,
        };
        match self.backend.submit(request) {
            Ok(()) => {
                self.next_build_id += 1;
                tile.mark_building(request.build_id);
                report.started += 1;
                true
            }
            Err(_) => {
                report.deferred += 1;
                false
            }
        }
    }

    /// Regenerate a resident tile in place. Its current mesh stays visible
    /// until the new build lands. Returns `false` for non-resident tiles.
    pub fn refresh_tile(&mut self, coordinate: TileCoordinate) -> bool {
        let mut report = StreamingTickReport::default();
        if !self.tiles.contains_key(&coordinate) {
            return false;
        }
        if !self.submit(coordinate, &mut report)
            && let Some(tile) = self.tiles.get_mut(&coordinate)
        {
            tile.mark_unbuilt();
        }
        true
    }

    /// Drop every tile and restart streaming from scratch on the next tick.
    /// Builds still in flight are discarded when they land.
    pub fn clear(&mut self) {
        self.tiles.clear();
        self.scheduler.reset();
    }

    pub fn tile(&self, coordinate: TileCoordinate) -> Option<&TerrainTile> {
        self.tiles.get(&coordinate)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &TerrainTile> {
        self.tiles.values()
    }

    pub fn focus(&self) -> Option<TileCoordinate> {
        self.scheduler.focus()
    }

    /// Non-resident coordinates the walk has yet to load, nearest first.
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

    pub fn in_flight(&self) -> usize {
        self.backend.in_flight()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Interior samples per tile side (`N`).
    pub fn tile_samples(&self) -> u32 {
        self.tile_samples
    }

    pub fn tile_world_size(&self) -> f32 {
        self.scheduler.params().tile_world_size
    }
}
