//! renderq CLI: run the render server or poke at its pieces directly.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use renderq::cache::DedupCache;
use renderq::config::Config;
use renderq::fingerprint::Fingerprint;
use renderq::render::{Renderer, StlRenderer};
use renderq::server;
use renderq::service::Service;
use renderq::telemetry::{TelemetryConfig, init_telemetry};
use renderq::worker::Worker;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "renderq", about = "Deduplicating STL render queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server and the render worker
    Serve {
        /// TOML config file (environment variables are used otherwise)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the bind address
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Render one STL file to PNG without the queue
    Render {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value_t = 1024)]
        width: u32,
        #[arg(long, default_value_t = 1024)]
        height: u32,
    },
    /// Print the content fingerprint of a file
    Fingerprint { file: PathBuf },
    /// Dedup cache operations
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached fingerprints and their outputs
    List {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, bind } => {
            let mut config = load_config(config)?;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            cmd_serve(config).await
        }
        Command::Render {
            input,
            output,
            width,
            height,
        } => cmd_render(input, output, width, height),
        Command::Fingerprint { file } => cmd_fingerprint(file),
        Command::Cache {
            action: CacheAction::List { config },
        } => cmd_cache_list(load_config(config)?),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    Ok(match path {
        Some(path) => Config::load(&path)?,
        None => Config::from_env()?,
    })
}

async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig::from_config(&config))?;

    let (service, queue) = Service::start(&config)?;
    let renderer: Arc<dyn Renderer> =
        Arc::new(StlRenderer::new(config.render_width, config.render_height));

    let worker = Worker::new(Arc::clone(&service), queue, renderer);
    let stop_worker = worker.shutdown_handle();
    let worker_task = tokio::spawn(worker.run());

    let listener = TcpListener::bind(config.bind).await?;
    let router = server::router(Arc::clone(&service), &config);
    server::serve(listener, router, async {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown requested");
    })
    .await?;

    stop_worker.notify_one();
    worker_task.await?;
    Ok(())
}

fn cmd_render(input: PathBuf, output: PathBuf, width: u32, height: u32) -> anyhow::Result<()> {
    StlRenderer::new(width, height).render(&input, &output)?;
    println!("{}", output.display());
    Ok(())
}

fn cmd_fingerprint(file: PathBuf) -> anyhow::Result<()> {
    let reader = std::io::BufReader::new(std::fs::File::open(&file)?);
    let fingerprint = Fingerprint::from_reader(reader)?;
    println!("{fingerprint}  {}", file.display());
    Ok(())
}

fn cmd_cache_list(config: Config) -> anyhow::Result<()> {
    let cache = DedupCache::load(config.cache_path())?;
    if cache.is_empty() {
        println!("Dedup cache at {} is empty.", cache.path().display());
        return Ok(());
    }

    println!("Dedup cache at {}\n", cache.path().display());

    println!("{:<64}  OUTPUT", "FINGERPRINT");
    println!("{}", "-".repeat(100));
    for (fingerprint, output) in cache.entries() {
        println!("{:<64}  {output}", fingerprint.as_str());
    }
    println!("\n{} entries", cache.len());
    Ok(())
}
