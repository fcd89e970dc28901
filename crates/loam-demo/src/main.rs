//! Headless demo: streams terrain and collision around a viewpoint circling
//! the origin, with simulated time.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! The file is polled once per simulated second; edits are applied to the
//! running session with the CLI overrides re-applied on top.
//! Run with `cargo run -p loam-demo -- --ticks 600 --seed 42`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use glam::Vec3;
use loam_config::{CliArgs, Config};
use loam_terrain::{SessionError, SessionTickReport, TerrainSession};
use tracing::{error, info, warn};

/// Simulated time per tick.
const TICK: Duration = Duration::from_millis(16);

#[derive(Parser, Debug)]
#[command(name = "loam-demo", about = "Stream terrain along a circular path")]
struct DemoArgs {
    #[command(flatten)]
    cli: CliArgs,

    /// Number of ticks to simulate.
    #[arg(long, default_value_t = 600)]
    ticks: u32,

    /// Viewpoint speed in meters per second.
    #[arg(long, default_value_t = 40.0)]
    speed: f32,

    /// Radius of the viewpoint path in meters.
    #[arg(long, default_value_t = 300.0)]
    path_radius: f32,
}

/// Running totals between two summaries.
#[derive(Default)]
struct Totals {
    terrain_started: usize,
    terrain_completed: usize,
    terrain_failed: usize,
    collision_started: usize,
    collision_completed: usize,
    collision_awaiting: usize,
}

impl Totals {
    fn add(&mut self, report: &SessionTickReport) {
        self.terrain_started += report.terrain.started;
        self.terrain_completed += report.terrain.completed;
        self.terrain_failed += report.terrain.failed;
        if let Some(collision) = &report.collision {
            self.collision_started += collision.started;
            self.collision_completed += collision.completed;
            self.collision_awaiting = collision.awaiting_terrain;
        }
    }
}

/// Watches `config.ron` for edits made while the demo runs.
struct ConfigWatch {
    dir: PathBuf,
    /// Last file contents seen, before CLI overrides.
    on_disk: Config,
    cli: CliArgs,
}

impl ConfigWatch {
    fn new(dir: PathBuf, on_disk: Config, cli: CliArgs) -> Self {
        Self { dir, on_disk, cli }
    }

    /// Re-read the file and hand any change to the session.
    ///
    /// Returns whether the session rebuilt. A rejected change is logged and
    /// not retried until the file changes again.
    fn poll(&mut self, session: &mut TerrainSession) -> bool {
        let changed = match self.on_disk.reload(&self.dir) {
            Ok(Some(changed)) => changed,
            Ok(None) => return false,
            Err(e) => {
                warn!("config reload failed: {e}");
                return false;
            }
        };
        self.on_disk = changed.clone();
        let mut config = changed;
        config.apply_cli_overrides(&self.cli);
        match session.apply_config(config) {
            Ok(rebuilt) => {
                if rebuilt {
                    info!("applied edited configuration");
                }
                rebuilt
            }
            Err(SessionError::BackendChanged { from, to }) => {
                warn!(?from, ?to, "backend kind cannot change while running; restart to switch");
                false
            }
            Err(e) => {
                error!("edited configuration rejected: {e}");
                false
            }
        }
    }
}

/// Point on the path after travelling `distance` meters.
fn viewpoint(distance: f32, radius: f32) -> Vec3 {
    let angle = distance / radius.max(1.0);
    Vec3::new(radius * angle.cos(), 0.0, radius * angle.sin())
}

fn run(session: &mut TerrainSession, args: &DemoArgs, mut watch: Option<&mut ConfigWatch>) {
    let ticks_per_second = (1000 / TICK.as_millis()).max(1) as u32;
    let mut totals = Totals::default();
    let mut now = Duration::ZERO;

    for tick in 1..=args.ticks {
        now += TICK;
        let position = viewpoint(args.speed * now.as_secs_f32(), args.path_radius);
        let report = session.tick(position, now);
        totals.add(&report);
        if report.terrain.focus_changed {
            info!(focus = %report.terrain.focus, "terrain focus moved");
        }

        if tick % ticks_per_second == 0
            && let Some(watch) = watch.as_deref_mut()
        {
            watch.poll(session);
        }

        if tick % ticks_per_second == 0 || tick == args.ticks {
            let terrain = session.terrain();
            info!(
                seconds = now.as_secs(),
                resident = terrain.resident_count(),
                built = terrain.built_count(),
                in_flight = terrain.in_flight(),
                started = totals.terrain_started,
                completed = totals.terrain_completed,
                failed = totals.terrain_failed,
                "terrain"
            );
            if let Some(collision) = session.collision() {
                info!(
                    resident = collision.resident_count(),
                    built = collision.built_count(),
                    started = totals.collision_started,
                    completed = totals.collision_completed,
                    awaiting_terrain = totals.collision_awaiting,
                    "collision"
                );
            }
            totals = Totals::default();
        }
    }

    if let Some(collision) = session.collision() {
        let triangles: usize = collision
            .tiles()
            .filter_map(|tile| tile.record())
            .map(|record| record.triangle_count())
            .sum();
        info!(triangles, "collision triangles resident at exit");
    }
}

fn main() -> std::process::ExitCode {
    let args = DemoArgs::parse();

    let config_dir = args.cli.config.clone().unwrap_or_else(Config::default_dir);
    let on_disk = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    let mut config = on_disk.clone();
    config.apply_cli_overrides(&args.cli);

    let log_dir = config_dir.join("logs");
    loam_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let mut session = match TerrainSession::new(config) {
        Ok(session) => session,
        Err(e) => {
            error!("failed to start terrain session: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };
    info!(
        backend = session.terrain().backend_name(),
        ticks = args.ticks,
        "streaming along a {:.0} m circle",
        args.path_radius
    );
    let mut watch = ConfigWatch::new(config_dir, on_disk, args.cli.clone());
    run(&mut session, &args, Some(&mut watch));
    std::process::ExitCode::SUCCESS
}
