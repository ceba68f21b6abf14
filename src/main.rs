use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use map_generator::config::{MapConfig, ServiceConfig, WorkerHost};
use map_generator::raster::RenderMode;
use map_generator::seeds::MapSeed;
use map_generator::server::create_router;
use map_generator::service::MapService;
use map_generator::worker::{self, MapWorker};

#[derive(Parser, Debug)]
#[command(name = "map_generator")]
#[command(about = "Serve and render procedural terrain maps", version)]
struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, env = "MAPGEN_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "MAPGEN_LOG_JSON", global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP map service
    Serve(ServeArgs),
    /// Run a map worker on stdin/stdout (spawned by `serve`)
    Worker {
        /// Generation parameters as JSON
        #[arg(long)]
        map_config: Option<String>,
    },
    /// Render one map to a PNG file
    Render(RenderArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// JSON configuration file
    #[arg(short, long, env = "MAPGEN_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(short, long, env = "MAPGEN_LISTEN")]
    listen: Option<String>,

    /// Map cache directory
    #[arg(long, env = "MAPGEN_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Seconds to wait for one map before failing the request (0 waits forever)
    #[arg(long)]
    job_timeout: Option<u64>,

    /// Let concurrent misses for the same map each render it
    #[arg(long)]
    no_coalesce: bool,

    /// Where the map worker runs
    #[arg(long, value_enum)]
    worker: Option<WorkerHost>,

    /// Width and height of generated maps
    #[arg(long)]
    grid_size: Option<u32>,
}

impl ServeArgs {
    fn apply(&self, config: &mut ServiceConfig) {
        if let Some(listen) = &self.listen {
            config.listen = listen.clone();
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(secs) = self.job_timeout {
            config.job_timeout_secs = (secs > 0).then_some(secs);
        }
        if self.no_coalesce {
            config.coalesce_misses = false;
        }
        if let Some(worker) = self.worker {
            config.worker = worker;
        }
        if let Some(size) = self.grid_size {
            config.map.grid_size = size;
        }
    }
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Map seed
    seed: String,

    /// Render mode
    #[arg(short, long, value_enum, default_value = "color")]
    mode: RenderMode,

    /// Output path (default: <seed>_<mode>.png)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Width and height of the map
    #[arg(long, default_value = "1024")]
    grid_size: u32,
}

fn init_tracing(cli: &Cli) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    // stdout carries worker frames, so logs always go to stderr
    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match cli.command {
        Command::Serve(args) => {
            let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
            runtime.block_on(serve(args))
        }
        Command::Worker { map_config } => {
            let config = match map_config {
                Some(json) => serde_json::from_str(&json).context("invalid --map-config")?,
                None => MapConfig::default(),
            };
            worker::run_stdio(config)?;
            Ok(())
        }
        Command::Render(args) => render(args),
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = ServiceConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    let program = std::env::current_exe().context("failed to locate own executable")?;
    let service = Arc::new(MapService::start(&config, &program).context("failed to start map worker")?);
    let app = create_router(Arc::clone(&service));

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!(addr = %config.listen, "map service listening");

    tokio::select! {
        result = axum::serve(listener, app).into_future() => {
            result.context("server error")?;
        }
        err = service.wait_fatal() => {
            error!(error = %err, "map pipeline failed, shutting down");
            return Err(anyhow::Error::new(err).context("map pipeline failed"));
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    info!(cache = %service.cache_stats().summary(), "map service stopped");
    Ok(())
}

fn render(args: RenderArgs) -> anyhow::Result<()> {
    let seed = MapSeed::new(args.seed);
    let config = MapConfig { grid_size: args.grid_size, ..MapConfig::default() };
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(format!("{}_{}.png", seed.file_stem(), args.mode)));

    info!(%seed, mode = %args.mode, grid_size = config.grid_size, "rendering map");
    let png = MapWorker::new(config).render(&seed, args.mode)?;
    std::fs::write(&output, &png).with_context(|| format!("failed to write {}", output.display()))?;
    info!(path = %output.display(), bytes = png.len(), "map written");
    Ok(())
}
