use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use digest_dispatch::api::{self, ApiState};
use digest_dispatch::auth::StaticTokens;
use digest_dispatch::config::DispatchConfig;
use digest_dispatch::scheduler::Dispatcher;
use digest_dispatch::shutdown::install_shutdown_handler;
use digest_dispatch::store::SqliteJobStore;

#[derive(Parser, Debug)]
#[command(name = "digest-dispatch")]
#[command(version)]
#[command(about = "Queues digest pattern searches and dispatches them to worker processes")]
struct Args {
    /// Port for the HTTP API
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Directory holding the job database
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Worker executable
    #[arg(long, env = "BINARY_PATH", default_value = "./pattern-finder")]
    binary_path: PathBuf,

    /// Maximum simultaneous workers. Each worker uses every core, so keep
    /// this low.
    #[arg(long, env = "MAX_CONCURRENT", default_value = "1")]
    max_concurrent: usize,

    /// Maximum number of queued jobs before submissions are rejected
    #[arg(long, env = "MAX_QUEUE", default_value = "100")]
    max_queue: usize,

    /// Retry-After hint, in seconds, for rejected submissions
    #[arg(long, env = "RETRY_AFTER_SECONDS", default_value = "30")]
    retry_after_seconds: u64,

    /// How long a cancelled worker may take to exit
    #[arg(long, env = "CANCEL_TIMEOUT_MS", default_value = "5000")]
    cancel_timeout_ms: u64,

    /// Fail workers that run longer than this (unbounded when unset)
    #[arg(long, env = "MAX_RUNTIME_SECS")]
    max_runtime_secs: Option<u64>,

    /// API tokens (comma-separated, format: "token:owner:role")
    /// Example: "s3cret:alice:standard,r00t:ops:admin"
    #[arg(long = "token", env = "TOKENS", value_delimiter = ',')]
    tokens: Vec<String>,
}

impl Args {
    fn dispatch_config(&self) -> DispatchConfig {
        let mut config = DispatchConfig::new(&self.binary_path)
            .with_max_concurrent(self.max_concurrent)
            .with_max_queue(self.max_queue)
            .with_retry_after_secs(self.retry_after_seconds)
            .with_cancel_timeout(Duration::from_millis(self.cancel_timeout_ms));
        if let Some(secs) = self.max_runtime_secs {
            config = config.with_max_runtime(Duration::from_secs(secs));
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let tokens = StaticTokens::parse(&args.tokens)?;
    if tokens.is_empty() {
        tracing::warn!("No API tokens configured, every request will be rejected");
    }

    let config = args.dispatch_config();
    if config.max_concurrent == 0 {
        return Err("--max-concurrent must be at least 1".into());
    }

    let store = Arc::new(SqliteJobStore::open(&args.data_dir)?);
    let dispatcher = Dispatcher::new(&config, store);

    let result = run_server(&args, &config, tokens, dispatcher.clone()).await;

    // Stop dispatch on every exit path so queued jobs stay queued.
    dispatcher.shutdown();
    if !dispatcher.wait_idle(config.worker.cancel_timeout).await {
        tracing::warn!("Workers still running at exit");
    }
    tracing::info!("Shutdown complete");
    result
}

async fn run_server(
    args: &Args,
    config: &DispatchConfig,
    tokens: StaticTokens,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), Box<dyn std::error::Error>> {
    dispatcher.recover()?;

    let shutdown = install_shutdown_handler(dispatcher.clone())?;

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::info!(
        addr = %addr,
        data_dir = %args.data_dir.display(),
        binary = %config.worker.binary_path.display(),
        max_concurrent = config.max_concurrent,
        max_queue = config.max_queue,
        "Starting digest-dispatch"
    );

    let state = ApiState {
        dispatcher,
        auth: Arc::new(tokens),
    };
    api::serve(addr, state, shutdown).await?;
    Ok(())
}
