//! Command-line argument parsing for loam.

use std::path::PathBuf;

use clap::Parser;

use crate::{BackendKind, Config};

/// loam command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "loam", about = "Streaming procedural terrain")]
pub struct CliArgs {
    /// Generation backend.
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Noise seed.
    #[arg(long)]
    pub seed: Option<u32>,

    /// Terrain load radius in tiles.
    #[arg(long)]
    pub load_radius: Option<u32>,

    /// Collision load radius in collision tiles.
    #[arg(long)]
    pub collision_radius: Option<u32>,

    /// Disable collision streaming.
    #[arg(long)]
    pub no_collision: bool,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(kind) = args.backend {
            self.backend.kind = kind;
        }
        if let Some(seed) = args.seed {
            self.generator.seed = seed;
        }
        if let Some(radius) = args.load_radius {
            self.streaming.load_radius = radius;
        }
        if let Some(radius) = args.collision_radius {
            self.collision.streaming.load_radius = radius;
        }
        if args.no_collision {
            self.collision.enabled = false;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
