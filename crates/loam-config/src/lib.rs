//! Configuration system for loam.
//!
//! Holds the full parameter set of a terrain session (noise layers, material
//! tessellation limits, streaming radii, collision tessellation, backend choice)
//! and persists it to disk as RON. Supports CLI overrides via clap, hot-reload
//! detection, and validation before a session starts.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    BackendConfig, BackendKind, CollisionConfig, Config, DebugConfig, DisplacementKind,
    GeneratorConfig, MaterialConfig, MaterialLayer, NoiseLayer, StreamingConfig,
};
pub use error::ConfigError;
