use clap::{Parser, Subcommand, ValueEnum};
use k8s_openapi::api::core::v1::{Container, PodSpec};
use minisched_cluster::ClusterStore;
use minisched_core::{Node, Pod, Resource};
use minisched_scheduler::{QueueConfig, Scheduler, SchedulerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "minisched", about = "Minimal plugin-driven pod scheduler")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "MINISCHED_LOG_FORMAT", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler against an in-process cluster and schedule one pod
    Run {
        /// Number of nodes to create (node0..nodeN-1)
        #[arg(long, default_value_t = 10, env = "MINISCHED_NODES")]
        nodes: usize,
        /// Name of the pod to schedule
        #[arg(long, default_value = "pod1", env = "MINISCHED_POD")]
        pod: String,
        /// Namespace of the pod
        #[arg(long, default_value = "default", env = "MINISCHED_NAMESPACE")]
        namespace: String,
        /// Seconds to wait for the pod to be bound
        #[arg(long, default_value_t = 4, env = "MINISCHED_SETTLE_SECS")]
        settle_secs: u64,
        /// Backoff after the first failed attempt, in milliseconds
        #[arg(long, default_value_t = 1000, env = "MINISCHED_INITIAL_BACKOFF_MS")]
        initial_backoff_ms: u64,
        /// Backoff cap, in milliseconds
        #[arg(long, default_value_t = 10_000, env = "MINISCHED_MAX_BACKOFF_MS")]
        max_backoff_ms: u64,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(env_filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init(),
    }

    match cli.command {
        Commands::Run {
            nodes,
            pod,
            namespace,
            settle_secs,
            initial_backoff_ms,
            max_backoff_ms,
        } => {
            let config = SchedulerConfig {
                queue: QueueConfig {
                    initial_backoff: Duration::from_millis(initial_backoff_ms),
                    max_backoff: Duration::from_millis(max_backoff_ms),
                    ..Default::default()
                },
                ..Default::default()
            };
            run(nodes, &pod, &namespace, Duration::from_secs(settle_secs), config).await
        }
    }
}

/// Start the cluster store, scheduler and event handler, then submit the
/// nodes and the pod and report where the pod landed
async fn run(
    node_count: usize,
    pod_name: &str,
    namespace: &str,
    settle: Duration,
    config: SchedulerConfig,
) -> miette::Result<()> {
    if config.queue.initial_backoff > config.queue.max_backoff {
        return Err(miette::miette!(
            "Initial backoff {:?} exceeds maximum backoff {:?}",
            config.queue.initial_backoff,
            config.queue.max_backoff
        ));
    }

    info!("Starting minisched with {} node(s)", node_count);

    let store = Arc::new(ClusterStore::new());
    let scheduler = Arc::new(Scheduler::new(store.clone(), store.clone(), config));
    let token = CancellationToken::new();

    // 1. Spawn event handler; subscribe before any resource is created
    let handler = scheduler.event_handler();
    let rx = store.subscribe();
    let handler_token = token.clone();
    let handler_handle = tokio::spawn(async move {
        handler.run(rx, handler_token).await;
    });

    // 2. Spawn scheduler
    let scheduler_token = token.clone();
    let scheduler_handle = tokio::spawn({
        let scheduler = scheduler.clone();
        async move {
            scheduler.run(scheduler_token).await;
        }
    });

    // 3. Register nodes, then submit the pod
    for i in 0..node_count {
        let name = format!("node{}", i);
        store
            .create_node(make_node(&name))
            .map_err(|e| miette::miette!("Failed to create node '{}': {}", name, e))?;
    }

    let created = store
        .create_pod(make_pod(pod_name, namespace))
        .map_err(|e| miette::miette!("Failed to create pod '{}': {}", pod_name, e))?;
    info!("Submitted pod {}", created.resource_key());

    // Wait for the pod to settle or for a shutdown signal
    tokio::select! {
        _ = tokio::time::sleep(settle) => {}
        result = tokio::signal::ctrl_c() => {
            result.map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;
            info!("Interrupted");
        }
    }

    let key = created.resource_key();
    let bound = store
        .get_pod(&key)
        .map_err(|e| miette::miette!("Failed to read pod '{}': {}", key, e))?;
    match bound.spec.and_then(|s| s.node_name) {
        Some(node_name) => info!("pod {} is bound to {}", key, node_name),
        None => warn!("pod {} is still pending after {:?}", key, settle),
    }

    info!("Shutting down gracefully...");
    token.cancel();

    // Wait for all tasks to finish with a timeout
    let shutdown_timeout = Duration::from_secs(5);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(handler_handle, scheduler_handle);
    })
    .await;

    info!("Shutdown complete");

    Ok(())
}

fn make_node(name: &str) -> Node {
    let mut node = Node::default();
    node.metadata.name = Some(name.to_string());
    node
}

fn make_pod(name: &str, namespace: &str) -> Pod {
    let mut pod = Pod::default();
    pod.metadata.name = Some(name.to_string());
    pod.metadata.namespace = Some(namespace.to_string());
    pod.spec = Some(PodSpec {
        containers: vec![Container {
            name: "pause".to_string(),
            image: Some("registry.k8s.io/pause:3.9".to_string()),
            ..Default::default()
        }],
        ..Default::default()
    });
    pod
}
