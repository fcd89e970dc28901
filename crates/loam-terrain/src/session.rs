//! A running terrain session: configuration, backends and both streaming grids.

use std::time::Duration;

use glam::Vec3;
use loam_config::{BackendKind, Config, ConfigError};
use tracing::{debug, info};

use crate::backend::{BackendError, SharedCompute, create_backend};
use crate::collision::{CollisionStreamingManager, CollisionTickReport, create_displacement_backend};
use crate::manager::{StreamingTickReport, TileStreamingManager};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("backend kind is fixed for a session ({from:?} cannot become {to:?})")]
    BackendChanged { from: BackendKind, to: BackendKind },
}

/// Reports of one [`TerrainSession::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionTickReport {
    pub terrain: StreamingTickReport,
    /// `None` when collision streaming is disabled.
    pub collision: Option<CollisionTickReport>,
}

/// Handle of a registered collision user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollisionUserId(u64);

pub struct TerrainSession {
    config: Config,
    compute: SharedCompute,
    terrain: TileStreamingManager,
    collision: Option<CollisionStreamingManager>,
    /// Registration order is kept; earlier users are served first.
    users: Vec<(CollisionUserId, Vec3)>,
    next_user: u64,
    centers: Vec<Vec3>,
}

impl TerrainSession {
    /// Validate `config` and bring up the configured backends.
    ///
    /// An unusable GPU backend is an error; there is no CPU fallback.
    pub fn new(config: Config) -> Result<Self, SessionError> {
        config.validate()?;
        let mut compute = SharedCompute::default();
        let (terrain, collision) = build_managers(&config, &mut compute)?;
        info!(
            backend = terrain.backend_name(),
            collision = collision.as_ref().map(|c| c.displacement_name()),
            seed = config.generator.seed,
            "terrain session started"
        );
        Ok(Self {
            config,
            compute,
            terrain,
            collision,
            users: Vec::new(),
            next_user: 0,
            centers: Vec::new(),
        })
    }

    /// Advance terrain, then collision against the updated terrain.
    ///
    /// Collision tiles are kept around the viewpoint and around every
    /// registered collision user.
    pub fn tick(&mut self, viewpoint: Vec3, now: Duration) -> SessionTickReport {
        let terrain = self.terrain.tick(viewpoint, now);
        self.centers.clear();
        self.centers.push(viewpoint);
        self.centers.extend(self.users.iter().map(|&(_, position)| position));
        let collision = self
            .collision
            .as_mut()
            .map(|collision| collision.tick(&self.terrain, &self.centers, now));
        SessionTickReport { terrain, collision }
    }

    /// Start keeping collision tiles around `position`.
    pub fn register_collision_user(&mut self, position: Vec3) -> CollisionUserId {
        let id = CollisionUserId(self.next_user);
        self.next_user += 1;
        self.users.push((id, position));
        debug!(?id, "collision user registered");
        id
    }

    /// Returns `false` for an unknown user.
    pub fn move_collision_user(&mut self, id: CollisionUserId, position: Vec3) -> bool {
        match self.users.iter_mut().find(|(user, _)| *user == id) {
            Some((_, current)) => {
                *current = position;
                true
            }
            None => false,
        }
    }

    /// Stop streaming around a user. Its tiles are recycled once no other
    /// center keeps them. Returns `false` for an unknown user.
    pub fn unregister_collision_user(&mut self, id: CollisionUserId) -> bool {
        let before = self.users.len();
        self.users.retain(|(user, _)| *user != id);
        let removed = self.users.len() != before;
        if removed {
            debug!(?id, "collision user unregistered");
        }
        removed
    }

    pub fn collision_users(&self) -> impl Iterator<Item = (CollisionUserId, Vec3)> + '_ {
        self.users.iter().copied()
    }

    /// Replace the configuration. Any change rebuilds every tile; registered
    /// collision users are kept.
    ///
    /// Returns `Ok(false)` when nothing changed. On error the session keeps
    /// running with its previous configuration.
    pub fn apply_config(&mut self, config: Config) -> Result<bool, SessionError> {
        if config.backend.kind != self.config.backend.kind {
            return Err(SessionError::BackendChanged {
                from: self.config.backend.kind,
                to: config.backend.kind,
            });
        }
        if config == self.config {
            return Ok(false);
        }
        config.validate()?;
        let (terrain, collision) = build_managers(&config, &mut self.compute)?;
        self.terrain = terrain;
        self.collision = collision;
        self.config = config;
        info!("configuration changed, rebuilding all tiles");
        Ok(true)
    }

    /// Drop every tile of both grids; streaming restarts on the next tick.
    pub fn rebuild(&mut self) {
        self.terrain.clear();
        if let Some(collision) = &mut self.collision {
            collision.clear();
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn terrain(&self) -> &TileStreamingManager {
        &self.terrain
    }

    pub fn collision(&self) -> Option<&CollisionStreamingManager> {
        self.collision.as_ref()
    }
}

fn build_managers(
    config: &Config,
    compute: &mut SharedCompute,
) -> Result<(TileStreamingManager, Option<CollisionStreamingManager>), BackendError> {
    let terrain = TileStreamingManager::new(config, create_backend(config, compute)?);
    let collision = if config.collision.enabled {
        let displacement = create_displacement_backend(config, compute)?;
        Some(CollisionStreamingManager::new(config, displacement))
    } else {
        None
    };
    Ok((terrain, collision))
}
