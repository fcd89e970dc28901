//! Adaptive subdivision of coarse collision triangles.
//!
//! Each coarse triangle is filled with concentric rings around its centroid
//! and stitched to its three edges, each edge split into its own number of
//! segments. Neighbouring triangles that agree on a shared edge's count get
//! bit-identical points along it, so the result is crack-free without welding.

use glam::{Vec3, Vec4};
use loam_config::CollisionConfig;

use crate::mesh::grid_triangle_indices;

/// Position plus the attributes interpolated alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SurfacePoint {
    pub position: Vec3,
    pub normal: Vec3,
    pub splat: Vec4,
}

impl SurfacePoint {
    /// Linear interpolation of every attribute; normals are not renormalized.
    pub fn lerp(self, other: Self, t: f32) -> Self {
        Self {
            position: self.position.lerp(other.position, t),
            normal: self.normal.lerp(other.normal, t),
            splat: self.splat.lerp(other.splat, t),
        }
    }
}

/// One input triangle with per-corner tessellation strength.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoarseTriangle {
    pub corners: [SurfacePoint; 3],
    pub strengths: [f32; 3],
}

/// Subdivided output, appended triangle by triangle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TessellatedMesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub splats: Vec<Vec4>,
    pub indices: Vec<u32>,
}

impl TessellatedMesh {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.normals.clear();
        self.splats.clear();
        self.indices.clear();
    }

    fn push(&mut self, point: SurfacePoint) -> u32 {
        let index = self.positions.len() as u32;
        self.positions.push(point.position);
        self.normals.push(point.normal);
        self.splats.push(point.splat);
        index
    }

    fn triangle(&mut self, a: u32, b: u32, c: u32) {
        self.indices.extend_from_slice(&[a, b, c]);
    }
}

/// `max(1, ceil(length / max_edge_length))`; 1 for non-positive or non-finite input.
pub fn edge_subdivisions(length: f32, max_edge_length: f32) -> u32 {
    if !(length.is_finite() && max_edge_length.is_finite()) || length <= 0.0 || max_edge_length <= 0.0
    {
        return 1;
    }
    let segments = (length / max_edge_length).ceil();
    if segments >= u32::MAX as f32 {
        u32::MAX
    } else {
        (segments as u32).max(1)
    }
}

/// Edge length limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TessellationSettings {
    pub max_edge_length: f32,
    pub max_edge_subdivisions: u32,
    pub strength_weighted: bool,
}

impl TessellationSettings {
    /// Segment count of the edge between two corners. Symmetric in its arguments.
    pub fn edge_count(&self, a: Vec3, b: Vec3, strength_a: f32, strength_b: f32) -> u32 {
        let mut length = (b - a).length();
        if self.strength_weighted {
            length *= (strength_a + strength_b) * 0.5;
        }
        edge_subdivisions(length, self.max_edge_length).min(self.max_edge_subdivisions.max(1))
    }

    /// Counts for edges `0→1`, `1→2`, `2→0`.
    pub fn edge_counts(&self, triangle: &CoarseTriangle) -> [u32; 3] {
        std::array::from_fn(|i| {
            let j = (i + 1) % 3;
            self.edge_count(
                triangle.corners[i].position,
                triangle.corners[j].position,
                triangle.strengths[i],
                triangle.strengths[j],
            )
        })
    }
}

impl From<&CollisionConfig> for TessellationSettings {
    fn from(config: &CollisionConfig) -> Self {
        Self {
            max_edge_length: config.max_edge_length,
            max_edge_subdivisions: config.max_edge_subdivisions,
            strength_weighted: config.strength_weighted,
        }
    }
}

/// Index buffer of a `size × size` grid, kept until the size changes.
#[derive(Debug, Clone, Default)]
pub struct GridTemplateCache {
    size: Option<u32>,
    indices: Vec<u32>,
}

impl GridTemplateCache {
    pub fn template(&mut self, size: u32) -> &[u32] {
        if self.size != Some(size) {
            self.indices = grid_triangle_indices(size);
            self.size = Some(size);
        }
        &self.indices
    }

    pub fn cached_size(&self) -> Option<u32> {
        self.size
    }

    pub fn invalidate(&mut self) {
        self.size = None;
        self.indices.clear();
    }
}

/// Subdivides coarse triangles so no edge exceeds the target length.
#[derive(Debug, Clone)]
pub struct AdaptiveTessellator {
    settings: TessellationSettings,
    templates: GridTemplateCache,
}

impl AdaptiveTessellator {
    pub fn new(settings: TessellationSettings) -> Self {
        Self {
            settings,
            templates: GridTemplateCache::default(),
        }
    }

    pub fn settings(&self) -> &TessellationSettings {
        &self.settings
    }

    /// Replace the limits; the grid template is regenerated on next use.
    pub fn set_settings(&mut self, settings: TessellationSettings) {
        self.settings = settings;
        self.templates.invalidate();
    }

    pub fn templates(&self) -> &GridTemplateCache {
        &self.templates
    }

    /// Append the tessellation of `triangle` with counts from the current settings.
    pub fn tessellate(&self, triangle: &CoarseTriangle, out: &mut TessellatedMesh) {
        tessellate_triangle(&triangle.corners, self.settings.edge_counts(triangle), out);
    }

    /// Tessellate a row-major `size × size` grid of points with the standard
    /// two-triangles-per-cell layout.
    pub fn tessellate_grid(
        &mut self,
        size: u32,
        points: &[SurfacePoint],
        strengths: &[f32],
        out: &mut TessellatedMesh,
    ) {
        let expected = (size * size) as usize;
        if points.len() != expected || strengths.len() != expected {
            tracing::warn!(
                size,
                points = points.len(),
                strengths = strengths.len(),
                "collision grid size mismatch, skipping tessellation"
            );
            return;
        }
        let settings = self.settings;
        for tri in self.templates.template(size).chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let triangle = CoarseTriangle {
                corners: [points[a], points[b], points[c]],
                strengths: [strengths[a], strengths[b], strengths[c]],
            };
            tessellate_triangle(&triangle.corners, settings.edge_counts(&triangle), out);
        }
    }
}

/// Point `k` of `segments` along the edge `a → b`.
///
/// Interpolates from whichever endpoint orders first so both triangles that
/// share the edge compute identical points.
fn edge_point(a: SurfacePoint, b: SurfacePoint, k: u32, segments: u32) -> SurfacePoint {
    if k == 0 {
        return a;
    }
    let pa = a.position;
    let pb = b.position;
    if (pa.x, pa.y, pa.z) <= (pb.x, pb.y, pb.z) {
        a.lerp(b, k as f32 / segments as f32)
    } else {
        b.lerp(a, (segments - k) as f32 / segments as f32)
    }
}

/// Stitch an inner arc of `inner.len() - 1` segments to an outer arc of
/// `outer.len() - 1` segments. Both slices include the shared end point.
fn stitch(inner: &[u32], outer: &[u32], out: &mut TessellatedMesh) {
    let i_steps = inner.len() - 1;
    let o_steps = outer.len() - 1;
    let (mut ci, mut co) = (0, 0);
    while ci < i_steps || co < o_steps {
        let advance_inner = ci < i_steps && (ci + 1) * o_steps < (co + 1) * i_steps;
        if advance_inner {
            out.triangle(inner[ci], outer[co], inner[ci + 1]);
            ci += 1;
        } else {
            out.triangle(inner[ci], outer[co], outer[co + 1]);
            co += 1;
        }
    }
}

/// Arc `a` of a closed loop split into three runs starting at `starts`,
/// including the next run's first vertex.
fn arc(ring: &[u32], starts: [usize; 3], a: usize) -> Vec<u32> {
    let start = starts[a];
    let end = if a == 2 { ring.len() } else { starts[a + 1] };
    let mut arc: Vec<u32> = ring[start..end].to_vec();
    arc.push(if a == 2 { ring[0] } else { ring[end] });
    arc
}

/// Append the tessellation of one triangle with per-edge segment counts
/// (edge `i` runs from corner `i` to corner `i + 1`).
pub fn tessellate_triangle(corners: &[SurfacePoint; 3], edges: [u32; 3], out: &mut TessellatedMesh) {
    let edges = edges.map(|e| e.max(1));
    if edges == [1, 1, 1] {
        let a = out.push(corners[0]);
        let b = out.push(corners[1]);
        let c = out.push(corners[2]);
        out.triangle(a, b, c);
        return;
    }

    let centroid = SurfacePoint {
        position: (corners[0].position + corners[1].position + corners[2].position) / 3.0,
        normal: (corners[0].normal + corners[1].normal + corners[2].normal) / 3.0,
        splat: (corners[0].splat + corners[1].splat + corners[2].splat) / 3.0,
    };
    let total: u32 = edges.iter().sum();
    let inner = (total / 6) as usize;

    // Rings from the center outwards, each a closed loop of vertex indices.
    let mut previous: Option<(Vec<u32>, [usize; 3])> = None;
    for r in 0..inner {
        let f = (r as f32 + 0.5) / (inner as f32 + 0.5);
        let spokes = corners.map(|corner| centroid.lerp(corner, f));
        let segments = 2 * r + 1;
        let mut ring = Vec::with_capacity(3 * segments);
        let mut starts = [0usize; 3];
        for a in 0..3 {
            starts[a] = ring.len();
            let (from, to) = (spokes[a], spokes[(a + 1) % 3]);
            for k in 0..segments {
                ring.push(out.push(from.lerp(to, k as f32 / segments as f32)));
            }
        }
        match &previous {
            None => out.triangle(ring[0], ring[1], ring[2]),
            Some((inner_ring, inner_starts)) => {
                for a in 0..3 {
                    stitch(
                        &arc(inner_ring, *inner_starts, a),
                        &arc(&ring, starts, a),
                        out,
                    );
                }
            }
        }
        previous = Some((ring, starts));
    }

    let mut boundary = Vec::with_capacity(total as usize);
    let mut starts = [0usize; 3];
    for a in 0..3 {
        starts[a] = boundary.len();
        let (from, to) = (corners[a], corners[(a + 1) % 3]);
        for k in 0..edges[a] {
            boundary.push(out.push(edge_point(from, to, k, edges[a])));
        }
    }

    match previous {
        Some((ring, ring_starts)) => {
            for a in 0..3 {
                stitch(&arc(&ring, ring_starts, a), &arc(&boundary, starts, a), out);
            }
        }
        None => {
            let center = out.push(centroid);
            for k in 0..boundary.len() {
                out.triangle(center, boundary[k], boundary[(k + 1) % boundary.len()]);
            }
        }
    }
}

/// Vertex and triangle counts [`tessellate_triangle`] produces.
pub fn tessellation_counts(edges: [u32; 3]) -> (usize, usize) {
    let edges = edges.map(|e| e.max(1) as usize);
    if edges == [1, 1, 1] {
        return (3, 1);
    }
    let total: usize = edges.iter().sum();
    let inner = total / 6;
    if inner == 0 {
        return (total + 1, total);
    }
    let rings: usize = (1..inner).map(|r| 12 * r).sum();
    (3 * inner * inner + total, 1 + rings + total + 3 * (2 * inner - 1))
}

#[cfg(test)]
#[path = "tessellator_tests.rs"]
mod tests;
