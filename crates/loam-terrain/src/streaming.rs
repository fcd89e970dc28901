//! Loading-circle scheduler shared by the terrain and collision managers.
//!
//! The scheduler owns no tiles. Each tick the owning manager tells it where the
//! viewpoint is and which coordinates are resident; it answers with the loads
//! to issue, nearest first, and which evicted tile each load should recycle.

use std::collections::VecDeque;
use std::time::Duration;

use glam::Vec3;
use loam_config::Config;
use rustc_hash::FxHashSet;

use crate::coordinate::{TileCoordinate, loading_circle};

/// Radius, pacing and grid geometry of one streamed grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamingParams {
    pub load_radius: u32,
    /// Extra ring kept resident beyond `load_radius` before a tile may be recycled.
    pub load_border: u32,
    pub time_between_loads: Duration,
    /// 0 = unlimited.
    pub max_loads_per_tick: u32,
    pub tile_world_size: f32,
    /// Fraction of a tile the focus cell is shifted by.
    pub focus_offset: f32,
}

impl StreamingParams {
    /// Render tiles: `(N-1) * grid_size` wide, focus switching at tile edges.
    pub fn terrain(config: &Config) -> Self {
        let s = &config.streaming;
        Self {
            load_radius: s.load_radius,
            load_border: s.load_border,
            time_between_loads: s.time_between_loads(),
            max_loads_per_tick: s.max_loads_per_tick,
            tile_world_size: config.generator.tile_world_size(),
            focus_offset: 0.5,
        }
    }

    /// Physics tiles: `(V-1) * grid_size` wide, focus at the containing tile.
    pub fn collision(config: &Config) -> Self {
        let c = &config.collision;
        Self {
            load_radius: c.streaming.load_radius,
            load_border: c.streaming.load_border,
            time_between_loads: c.streaming.time_between_loads(),
            max_loads_per_tick: c.streaming.max_loads_per_tick,
            tile_world_size: (c.tile_vertex_count.saturating_sub(1)) as f32
                * config.generator.grid_size,
            focus_offset: 0.0,
        }
    }

    /// Chebyshev distance beyond which a resident tile may be recycled.
    pub fn keep_distance(&self) -> u32 {
        self.load_radius.saturating_add(self.load_border)
    }
}

/// Minimum spacing between loads plus a per-tick cap.
#[derive(Debug, Clone)]
pub struct LoadRateLimiter {
    interval: Duration,
    max_per_tick: u32,
    last_load: Option<Duration>,
    loads_this_tick: u32,
}

impl LoadRateLimiter {
    pub fn new(interval: Duration, max_per_tick: u32) -> Self {
        Self {
            interval,
            max_per_tick,
            last_load: None,
            loads_this_tick: 0,
        }
    }

    pub fn begin_tick(&mut self) {
        self.loads_this_tick = 0;
    }

    pub fn allows(&self, now: Duration) -> bool {
        if self.max_per_tick > 0 && self.loads_this_tick >= self.max_per_tick {
            return false;
        }
        match self.last_load {
            Some(last) => now.saturating_sub(last) >= self.interval,
            None => true,
        }
    }

    pub fn record(&mut self, now: Duration) {
        self.last_load = Some(now);
        self.loads_this_tick += 1;
    }

    pub fn reset(&mut self) {
        self.last_load = None;
        self.loads_this_tick = 0;
    }
}

/// One load issued by [`StreamingScheduler::plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOrder {
    pub coordinate: TileCoordinate,
    /// Resident tile whose object should be reused for this load.
    pub recycle: Option<TileCoordinate>,
}

/// Walk position around one center.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Walk {
    center: TileCoordinate,
    cursor: usize,
}

/// Walks the loading circle around one or more moving centers.
///
/// Every center keeps its own cursor; the rate limiter and the eviction
/// candidates are shared. A tile becomes a candidate only once it is outside
/// the keep distance of every center.
#[derive(Debug, Clone)]
pub struct StreamingScheduler {
    params: StreamingParams,
    circle: Vec<TileCoordinate>,
    walks: Vec<Walk>,
    eviction_queue: VecDeque<TileCoordinate>,
    eviction_set: FxHashSet<TileCoordinate>,
    limiter: LoadRateLimiter,
}

impl StreamingScheduler {
    pub fn new(params: StreamingParams) -> Self {
        Self {
            circle: loading_circle(params.load_radius),
            walks: Vec::new(),
            eviction_queue: VecDeque::new(),
            eviction_set: FxHashSet::default(),
            limiter: LoadRateLimiter::new(params.time_between_loads, params.max_loads_per_tick),
            params,
        }
    }

    pub fn params(&self) -> &StreamingParams {
        &self.params
    }

    /// The first center, if any.
    pub fn focus(&self) -> Option<TileCoordinate> {
        self.walks.first().map(|walk| walk.center)
    }

    /// Every center, in the order they were given.
    pub fn centers(&self) -> impl Iterator<Item = TileCoordinate> + '_ {
        self.walks.iter().map(|walk| walk.center)
    }

    /// Position of the first center's walk inside the loading circle.
    pub fn cursor(&self) -> usize {
        self.walks.first().map_or(0, |walk| walk.cursor)
    }

    /// The cell the viewpoint falls in on this grid.
    pub fn focus_for(&self, viewpoint: Vec3) -> TileCoordinate {
        TileCoordinate::containing(
            viewpoint,
            self.params.tile_world_size,
            self.params.focus_offset,
        )
    }

    /// Chebyshev distance from `coordinate` to the nearest center.
    pub fn distance_to_centers(&self, coordinate: TileCoordinate) -> u32 {
        self.walks
            .iter()
            .map(|walk| coordinate.chebyshev(walk.center))
            .min()
            .unwrap_or(u32::MAX)
    }

    /// Single-center form of [`StreamingScheduler::update_centers`].
    pub fn update_focus(
        &mut self,
        viewpoint: Vec3,
        resident: impl IntoIterator<Item = TileCoordinate>,
    ) -> bool {
        self.update_centers(&[viewpoint], resident)
    }

    /// Move the centers to the cells containing `viewpoints`.
    ///
    /// Positions falling in the same cell share a walk. A center that was
    /// already present keeps its cursor; a new one starts at the middle of its
    /// circle. On any change the eviction candidates are rebuilt from
    /// `resident`, farthest first. Returns whether the centers changed.
    pub fn update_centers(
        &mut self,
        viewpoints: &[Vec3],
        resident: impl IntoIterator<Item = TileCoordinate>,
    ) -> bool {
        let mut centers: Vec<TileCoordinate> = Vec::with_capacity(viewpoints.len());
        for &viewpoint in viewpoints {
            let center = self.focus_for(viewpoint);
            if !centers.contains(&center) {
                centers.push(center);
            }
        }
        if centers.iter().copied().eq(self.centers()) {
            return false;
        }
        self.walks = centers
            .into_iter()
            .map(|center| Walk {
                center,
                cursor: self
                    .walks
                    .iter()
                    .find(|walk| walk.center == center)
                    .map_or(0, |walk| walk.cursor),
            })
            .collect();

        let keep = self.params.keep_distance();
        let mut far: Vec<(u32, TileCoordinate)> = resident
            .into_iter()
            .map(|c| (self.distance_to_centers(c), c))
            .filter(|&(distance, _)| distance > keep)
            .collect();
        far.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        self.eviction_queue.clear();
        self.eviction_set.clear();
        for (_, c) in far {
            self.eviction_queue.push_back(c);
            self.eviction_set.insert(c);
        }
        true
    }

    /// Continue every walk from its cursor, issuing loads for non-resident
    /// cells until the circles are exhausted or the rate limiter blocks.
    ///
    /// Centers are served in order and share the limiter, so an earlier
    /// center's loads come first.
    pub fn plan(
        &mut self,
        now: Duration,
        is_resident: impl Fn(TileCoordinate) -> bool,
    ) -> Vec<LoadOrder> {
        self.limiter.begin_tick();
        let mut orders = Vec::new();
        let mut issued = FxHashSet::default();
        for index in 0..self.walks.len() {
            let Walk { center, mut cursor } = self.walks[index];
            while let Some(&offset) = self.circle.get(cursor) {
                let coordinate = center + offset;
                if is_resident(coordinate) || issued.contains(&coordinate) {
                    cursor += 1;
                    continue;
                }
                if !self.limiter.allows(now) {
                    break;
                }
                let recycle = self.take_eviction_candidate(&is_resident);
                orders.push(LoadOrder {
                    coordinate,
                    recycle,
                });
                issued.insert(coordinate);
                self.limiter.record(now);
                cursor += 1;
            }
            self.walks[index].cursor = cursor;
            if cursor < self.circle.len() {
                break;
            }
        }
        orders
    }

    fn take_eviction_candidate(
        &mut self,
        is_resident: &impl Fn(TileCoordinate) -> bool,
    ) -> Option<TileCoordinate> {
        while let Some(candidate) = self.eviction_queue.pop_front() {
            self.eviction_set.remove(&candidate);
            if is_resident(candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// Cells the walks have yet to reach that are not resident, in walk order.
    pub fn pending_loads(&self, is_resident: impl Fn(TileCoordinate) -> bool) -> Vec<TileCoordinate> {
        let mut seen = FxHashSet::default();
        let mut pending = Vec::new();
        for walk in &self.walks {
            for &offset in &self.circle[walk.cursor.min(self.circle.len())..] {
                let c = walk.center + offset;
                if !is_resident(c) && seen.insert(c) {
                    pending.push(c);
                }
            }
        }
        pending
    }

    /// Resident tiles that the next loads will recycle, farthest first.
    pub fn eviction_candidates(&self) -> impl Iterator<Item = TileCoordinate> + '_ {
        self.eviction_queue.iter().copied()
    }

    pub fn is_eviction_candidate(&self, coordinate: TileCoordinate) -> bool {
        self.eviction_set.contains(&coordinate)
    }

    /// Forget the centers, the walk positions and every candidate.
    pub fn reset(&mut self) {
        self.walks.clear();
        self.eviction_queue.clear();
        self.eviction_set.clear();
        self.limiter.reset();
    }
}
