use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use cosmos_common::StreamConfig;
use cosmos_procedural::{Scene, SceneFactory, generator_for};
use cosmos_stream::{DrainLoop, WeightedTable};
use glam::Vec3;
use rand::Rng;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cosmos-cli", about = "CLI tool for cosmos streaming")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print engine version and crate info
    Info,
    /// Fly the observer along -Z through a headless scene
    Fly {
        /// Number of frames to simulate
        #[arg(short, long, default_value = "600")]
        frames: u64,
        /// Observer speed in world units per second
        #[arg(short, long, default_value = "4000")]
        speed: f32,
        /// Frames per second
        #[arg(long, default_value = "60")]
        fps: u32,
        /// YAML or JSON stream configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Universe to stream
        #[arg(short, long)]
        universe: Option<u32>,
    },
    /// Sample the weighted worker table
    Sample {
        /// Number of draws
        #[arg(short, long, default_value = "100000")]
        draws: u64,
        /// YAML or JSON stream configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<StreamConfig> {
    match path {
        Some(path) => StreamConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(StreamConfig::default()),
    }
}

fn fly(
    config: StreamConfig,
    frames: u64,
    speed: f32,
    fps: u32,
    universe: Option<u32>,
) -> anyhow::Result<()> {
    anyhow::ensure!(fps > 0, "fps must be positive");
    let cluster_size = config.cluster_size;
    let scene = Scene::shared();
    let factory = SceneFactory::new(Rc::clone(&scene), cluster_size);
    let mut drain = DrainLoop::new(config, generator_for, factory)?;
    if let Some(universe) = universe {
        drain.switch_universe(universe);
    }

    let frame = Duration::from_secs(1) / fps;
    let step = speed / fps as f32;
    let mut observer = Vec3::ZERO;
    let started = Instant::now();

    println!("Fly-through: frames={frames}, speed={speed}, fps={fps}, cluster_size={cluster_size}");
    for _ in 0..frames {
        let frame_start = Instant::now();
        drain.tick(observer, frame_start);
        observer.z -= step;
        if let Some(rest) = frame.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    tracing::info!(frames, elapsed = ?started.elapsed(), "fly-through finished");

    let stats = drain.stats();
    let timer = drain.timer();
    println!(
        "Observer: {:?}, cluster={}",
        observer,
        drain.grid().cluster_coordinate(observer)
    );
    println!(
        "Clusters: active={}, pending={}, requested={}, scene objects={}, points={}",
        stats.active_clusters,
        stats.pending_clusters,
        stats.requested_clusters,
        scene.borrow().len(),
        scene.borrow().point_count()
    );
    println!(
        "Stream: ticks={}, recenters={}, dispatched={}, received={}, drained={}, disposed={}",
        stats.ticks,
        stats.recenters,
        stats.dispatched,
        stats.results_received,
        stats.drained,
        stats.disposed
    );
    println!(
        "Dropped: stale={}, duplicate={}, malformed={}, fallbacks={}",
        stats.stale_dropped,
        stats.duplicate_dropped,
        stats.malformed_dropped,
        stats.selection_fallbacks
    );
    println!(
        "Tick time: avg={:?}, min={:?}, max={:?} (last {} ticks), wall={:?}",
        timer.average(),
        timer.min(),
        timer.max(),
        timer.count(),
        started.elapsed()
    );
    Ok(())
}

fn sample(config: &StreamConfig, draws: u64) -> anyhow::Result<()> {
    anyhow::ensure!(draws > 0, "draws must be positive");
    let table = WeightedTable::from_specs(&config.workers);
    let total = f64::from(table.total());
    let mut hits = vec![0u64; table.len()];
    let mut misses = 0u64;
    let mut rng = rand::rng();
    for _ in 0..draws {
        match table.select(rng.random::<f64>() * total) {
            Some(index) => hits[index] += 1,
            None => misses += 1,
        }
    }

    println!("Weighted selection over {draws} draws (total weight {total}):");
    for (spec, count) in config.workers.iter().zip(&hits) {
        let observed = *count as f64 / draws as f64 * 100.0;
        let expected = f64::from(spec.weight) / total * 100.0;
        println!(
            "  {:<10} {:<10} expected {expected:6.2}%  observed {observed:6.2}%",
            spec.kind.to_string(),
            spec.subkind.to_string()
        );
    }
    if misses > 0 {
        println!("  fell through: {misses}");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Info => {
            println!("cosmos-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", cosmos_common::crate_info());
            println!("stream: {}", cosmos_stream::crate_info());
            println!("procedural: {}", cosmos_procedural::crate_info());
        }
        Commands::Fly {
            frames,
            speed,
            fps,
            config,
            universe,
        } => {
            let config = load_config(config.as_deref())?;
            fly(config, frames, speed, fps, universe)?;
        }
        Commands::Sample { draws, config } => {
            let config = load_config(config.as_deref())?;
            config.validate()?;
            sample(&config, draws)?;
        }
    }

    Ok(())
}
