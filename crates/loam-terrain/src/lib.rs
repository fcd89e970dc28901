//! Streaming procedural terrain with adaptive collision tessellation.
//!
//! [`HeightfieldSynthesizer`] turns global sample indices into heights,
//! normals, material splats and tessellation strength. A
//! [`GenerationBackend`] (worker threads or a compute shader) produces whole
//! tile records asynchronously; [`TileStreamingManager`] keeps the tiles around
//! the viewpoint resident, and [`CollisionStreamingManager`] builds physics
//! tiles from them on a second grid. [`TerrainSession`] ties it together.

pub mod backend;
pub mod collision;
pub mod coordinate;
pub mod heightfield;
pub mod manager;
pub mod mesh;
pub mod record;
pub mod session;
pub mod streaming;
pub mod tile;

pub use backend::{
    BackendError, CpuBackend, GenerationBackend, GenerationError, GenerationOutcome,
    GenerationRequest, GpuBackend, SharedCompute, create_backend,
};
pub use collision::{
    AdaptiveTessellator, CollisionStreamingManager, CollisionTickReport, CollisionTile,
    CollisionTileRecord, CollisionTileState, TerrainSource, TessellationSettings, edge_subdivisions,
};
pub use coordinate::{TileCoordinate, loading_circle};
pub use heightfield::{HeightfieldSample, HeightfieldSynthesizer};
pub use manager::{StreamingTickReport, TileStreamingManager};
pub use mesh::Aabb;
pub use record::TerrainTileRecord;
pub use session::{CollisionUserId, SessionError, SessionTickReport, TerrainSession};
pub use streaming::{StreamingParams, StreamingScheduler};
pub use tile::{TerrainMesh, TerrainTile, TileState};
