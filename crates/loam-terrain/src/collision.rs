//! Physics tiles streamed on their own grid around the viewpoint.
//!
//! A collision tile spans `V × V` terrain samples (`V = tile_vertex_count`),
//! so its edge is `(V - 1) * grid_size` and it may straddle several terrain
//! tiles. Once every overlapping terrain tile is built, the samples are
//! triangulated, adaptively tessellated and pushed along their normals by the
//! displacement step.

mod displacement;
mod manager;
mod tessellator;
mod tile;

pub use displacement::{
    CollisionBaseData, CpuDisplacement, DISPLACEMENT_ENTRY_POINTS, DisplacementBackend,
    DisplacementError, DisplacementJob, DisplacementModel, DisplacementOutcome,
    GpuDisplacement, GpuDisplacementParams, create_displacement_backend,
};
pub use manager::{CollisionStreamingManager, CollisionTickReport};
pub use tessellator::{
    AdaptiveTessellator, CoarseTriangle, GridTemplateCache, SurfacePoint, TessellatedMesh,
    TessellationSettings, edge_subdivisions, tessellate_triangle, tessellation_counts,
};
pub use tile::{
    CollisionTile, CollisionTileRecord, CollisionTileState, TerrainSource, collect_surface,
};
