use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use snapscore::counter::{CounterStore, FileCounter, MemoryCounter};
use snapscore::pipeline::Pipeline;
use snapscore::server::{self, AppState};
use snapscore::{compare, CompareOptions, RenderConfig, ServiceConfig};

/// Render markup and score it against reference images
#[derive(Parser, Debug)]
#[command(name = "snapscore", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service
    Serve(ServeArgs),
    /// Render an HTML file to a PNG (e.g. to provision a reference image)
    Render(RenderArgs),
    /// Print the similarity score of two PNG files
    Compare(CompareArgs),
}

#[derive(Args, Debug)]
struct RenderOpts {
    /// Render timeout in milliseconds
    #[arg(long, default_value_t = 30000, env = "SNAPSCORE_TIMEOUT_MS")]
    timeout_ms: u64,

    /// Chrome/Chromium binary (auto-detected when omitted)
    #[arg(long, env = "CHROME_PATH")]
    chrome_path: Option<PathBuf>,

    /// Disable Chrome's sandbox (needed when running as root in containers)
    #[arg(long)]
    no_sandbox: bool,
}

impl RenderOpts {
    fn to_config(&self) -> RenderConfig {
        RenderConfig {
            timeout_ms: self.timeout_ms,
            chrome_path: self.chrome_path.clone(),
            sandbox: !self.no_sandbox,
            ..Default::default()
        }
    }
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Full listen address; overrides --host and --port
    #[arg(short, long, env = "SNAPSCORE_LISTEN_ADDR")]
    listen: Option<String>,

    /// Listen host
    #[arg(long, default_value = "0.0.0.0", env = "SNAPSCORE_HOST")]
    host: String,

    /// Listen port
    #[arg(short, long, default_value_t = 5000, env = "PORT")]
    port: u16,

    /// Directory containing expected_<challenge>.png files
    #[arg(long, default_value = "./challenge", env = "SNAPSCORE_CHALLENGE_DIR")]
    challenge_dir: PathBuf,

    /// Directory for ephemeral renders
    #[arg(long, default_value = ".", env = "SNAPSCORE_SCRATCH_DIR")]
    scratch_dir: PathBuf,

    /// Persist the visitor counter in this JSON file (in-memory when omitted)
    #[arg(long, env = "SNAPSCORE_COUNTER_FILE")]
    counter_file: Option<PathBuf>,

    /// Per-pixel colour tolerance, 0..=1
    #[arg(long, default_value_t = 0.1)]
    threshold: f64,

    /// Maximum browsers alive at once (defaults to the CPU count)
    #[arg(long, env = "SNAPSCORE_MAX_RENDERS")]
    max_concurrent_renders: Option<usize>,

    #[command(flatten)]
    render: RenderOpts,
}

impl ServeArgs {
    fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = match &self.listen {
            Some(listen) => listen.clone(),
            None => format!("{}:{}", self.host, self.port),
        };
        addr.parse()
            .with_context(|| format!("Invalid listen address {:?}", addr))
    }
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// HTML file to render
    #[arg(long)]
    html: PathBuf,

    /// Output PNG
    #[arg(long)]
    out: PathBuf,

    #[command(flatten)]
    render: RenderOpts,
}

#[derive(Args, Debug)]
struct CompareArgs {
    /// Rendered image
    actual: PathBuf,

    /// Reference image
    expected: PathBuf,

    /// Per-pixel colour tolerance, 0..=1
    #[arg(long, default_value_t = 0.1)]
    threshold: f64,

    /// Count anti-aliased pixels as differences
    #[arg(long)]
    include_aa: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    runtime.block_on(async move {
        match cli.command {
            Command::Serve(args) => serve(args).await,
            Command::Render(args) => render(args).await,
            Command::Compare(args) => compare_cmd(args).await,
        }
    })
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let addr = args.listen_addr()?;
    let config = ServiceConfig {
        challenge_dir: args.challenge_dir,
        scratch_dir: args.scratch_dir,
        max_concurrent_renders: args.max_concurrent_renders.unwrap_or_else(num_cpus::get),
        render: args.render.to_config(),
        compare: CompareOptions {
            threshold: args.threshold,
            ..Default::default()
        },
    };
    config.validate()?;

    if !config.challenge_dir.is_dir() {
        warn!(
            "Challenge directory {} does not exist; every request will fail",
            config.challenge_dir.display()
        );
    }

    let counter: Arc<dyn CounterStore> = match args.counter_file {
        Some(path) => Arc::new(FileCounter::new(path)),
        None => Arc::new(MemoryCounter::new()),
    };

    let renderer = snapscore::new_renderer(&config.render)?;
    let state = Arc::new(AppState {
        pipeline: Pipeline::new(renderer, config),
        counter,
    });
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Server is started on {}", addr);
    axum::serve(listener, app).await.context("Server failed")?;
    Ok(())
}

async fn render(args: RenderArgs) -> anyhow::Result<()> {
    let markup = tokio::fs::read_to_string(&args.html)
        .await
        .with_context(|| format!("Failed to read {}", args.html.display()))?;

    let config = args.render.to_config();
    let renderer = snapscore::new_renderer(&config)?;
    let service = snapscore::RenderService::new(renderer, config, 1);
    service.render(&markup, args.out.clone()).await?;

    info!("Wrote {}", args.out.display());
    Ok(())
}

async fn compare_cmd(args: CompareArgs) -> anyhow::Result<()> {
    let opts = CompareOptions {
        threshold: args.threshold,
        include_aa: args.include_aa,
    };
    let res = compare::compare_files(&args.actual, &args.expected, &opts).await?;
    println!("{:.4}", res.score);
    info!("{} of {} pixels differ", res.diff_pixels, u64::from(res.width) * u64::from(res.height));
    Ok(())
}
