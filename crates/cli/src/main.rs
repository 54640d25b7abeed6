use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use podcheck_core::WatchConfig;
use podcheck_ops::{LogObserver, PodWatcher};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "podcheckctl", version, about = "Check that an image starts as a pod")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (default: current context)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a placeholder pod for an image already on the node and wait for it to run
    Run {
        /// Image reference; must already be present on the node
        #[arg(long = "image")]
        image: String,
        /// Pod name (default: podcheck-<random>)
        #[arg(long = "name")]
        name: Option<String>,
        /// Poll attempts before giving up (overrides PODCHECK_MAX_TRIES)
        #[arg(long = "max-tries")]
        max_tries: Option<u32>,
        /// Delay before the first status check (overrides PODCHECK_BASE_DELAY_MS)
        #[arg(long = "base-delay-ms")]
        base_delay_ms: Option<u64>,
        /// Added to the delay on every attempt (overrides PODCHECK_STEP_DELAY_MS)
        #[arg(long = "step-delay-ms")]
        step_delay_ms: Option<u64>,
    },
}

fn init_tracing() {
    let env = std::env::var("PODCHECK_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("PODCHECK_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid PODCHECK_METRICS_ADDR; expected host:port");
        }
    }
}

fn default_pod_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("podcheck-{}", &id[..8])
}

fn watch_config(max_tries: Option<u32>, base_delay_ms: Option<u64>, step_delay_ms: Option<u64>) -> WatchConfig {
    let mut cfg = WatchConfig::from_env();
    if let Some(n) = max_tries { cfg.max_tries = n.max(1); }
    if let Some(ms) = base_delay_ms { cfg.backoff.base = Duration::from_millis(ms); }
    if let Some(ms) = step_delay_ms { cfg.backoff.step = Duration::from_millis(ms); }
    cfg
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { image, name, max_tries, base_delay_ms, step_delay_ms } => {
            let name = name.unwrap_or_else(default_pod_name);
            let cfg = watch_config(max_tries, base_delay_ms, step_delay_ms);
            info!(pod = %name, image = %image, max_tries = cfg.max_tries, "run invoked");
            let (cluster, ns) = podcheck_kubehub::connect(cli.namespace.as_deref()).await?;
            let watcher = PodWatcher::new(Arc::new(cluster), Arc::new(LogObserver), cfg);

            let token = CancellationToken::new();
            let ctrl_c = tokio::spawn({
                let token = token.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Ctrl-C received; cancelling watch");
                        token.cancel();
                    }
                }
            });
            let result = watcher.run(&token, &name, &image, &ns).await;
            ctrl_c.abort();

            match result {
                Ok(outcome) => match cli.output {
                    Output::Human => println!("{} {} after {} attempt(s)", outcome.pod, outcome.phase, outcome.attempts),
                    Output::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
                },
                Err(e) => {
                    error!(error = %e, kind = e.kind(), "watch failed");
                    return Err(anyhow!("run error: {}", e));
                }
            }
        }
    }
    Ok(())
}
