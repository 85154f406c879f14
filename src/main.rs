use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use kubeedge_apps::controller::{self, OperatorConfig};
use kubeedge_apps::crd::{EdgeApplication, NodeGroup};
use kubeedge_apps::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers
    Run(RunArgs),
    /// Show version information
    Version,
    /// Show NodeGroups and EdgeApplications in the cluster
    Info,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Replace produced objects instead of merging template changes into them
    #[arg(long, env = "USE_SERVER_SIDE_APPLY")]
    use_server_side_apply: bool,

    /// Seconds between sweeps for status watchers no EdgeApplication needs
    #[arg(long, env = "STATUS_GC_INTERVAL_SECS", default_value_t = 300)]
    status_gc_interval_secs: u64,

    /// Bound of the status manager's watch and cancel queues
    #[arg(long, env = "WATCH_QUEUE_CAPACITY", default_value_t = 1024)]
    watch_queue_capacity: usize,

    /// Bound of the channel used to re-trigger EdgeApplication reconciles
    #[arg(long, env = "TRIGGER_CHANNEL_CAPACITY", default_value_t = 1024)]
    trigger_channel_capacity: usize,

    /// Address of the metrics listener
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[arg(long, env = "DISABLE_NODEGROUP_CONTROLLER")]
    disable_nodegroup_controller: bool,

    #[arg(long, env = "DISABLE_EDGEAPPLICATION_CONTROLLER")]
    disable_edgeapplication_controller: bool,
}

impl RunArgs {
    fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            use_server_side_apply: self.use_server_side_apply,
            status_gc_interval: Duration::from_secs(self.status_gc_interval_secs),
            watch_queue_capacity: self.watch_queue_capacity,
            trigger_channel_capacity: self.trigger_channel_capacity,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("KubeEdge apps operator v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Info => run_info().await,
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_info() -> Result<(), Error> {
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    let groups: kube::Api<NodeGroup> = kube::Api::all(client.clone());
    let groups = groups.list(&Default::default()).await?;
    println!("NodeGroups: {}", groups.items.len());
    for group in &groups.items {
        let members = group
            .status
            .as_ref()
            .map(|s| s.node_statuses.len())
            .unwrap_or_default();
        println!("  {} ({} nodes)", kube::ResourceExt::name_any(group), members);
    }

    let apps: kube::Api<EdgeApplication> = kube::Api::all(client);
    let apps = apps.list(&Default::default()).await?;
    println!("EdgeApplications: {}", apps.items.len());
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let fmt_layer = match format {
        LogFormat::Text => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_target(true).boxed(),
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    // Only enable OTEL if an endpoint is provided
    let otel_enabled = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok();

    if otel_enabled {
        let otel_layer = kubeedge_apps::telemetry::init_telemetry(&registry);
        registry.with(otel_layer).init();
        info!("OpenTelemetry tracing initialized");
    } else {
        registry.init();
        info!("OpenTelemetry tracing disabled (OTEL_EXPORTER_OTLP_ENDPOINT not set)");
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    init_tracing(args.log_format);

    info!(
        "Starting KubeEdge apps operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
            }
            shutdown.cancel();
        });
    }

    #[cfg(feature = "rest-api")]
    {
        let addr = args.metrics_addr;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = kubeedge_apps::rest_api::run_server(addr, shutdown).await {
                error!("Metrics server error: {:?}", e);
            }
        });
    }

    let mut controllers = JoinSet::new();

    if args.disable_nodegroup_controller {
        info!("NodeGroup controller disabled");
    } else {
        controllers.spawn(controller::node_group::run_controller(client.clone()));
    }

    if args.disable_edgeapplication_controller {
        info!("EdgeApplication controller disabled");
    } else {
        controllers.spawn(controller::edge_application::run_controller(
            client.clone(),
            args.operator_config(),
            shutdown.clone(),
        ));
    }

    let mut result = Ok(());
    while let Some(joined) = controllers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Controller exited with error: {:?}", e);
                shutdown.cancel();
                result = Err(e);
            }
            Err(e) => {
                error!("Controller task failed: {:?}", e);
                shutdown.cancel();
            }
        }
    }
    shutdown.cancel();

    // Flush any remaining traces
    kubeedge_apps::telemetry::shutdown_telemetry();

    result
}
