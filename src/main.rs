use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use swarm_lite::cluster::Cluster;
use swarm_lite::config::{ClusterConfig, NodeConfig, PeerConfig, TimingConfig};
use swarm_lite::dashboard::{run_dashboard, DashboardState};
use swarm_lite::events::{self, ClusterEvent};
use swarm_lite::identity::IdScheme;
use swarm_lite::node::Node;
use swarm_lite::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "swarm-lite")]
#[command(version)]
#[command(about = "Self-organizing swarm with heartbeat-driven leader election")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a single node
    Node(NodeArgs),

    /// Run a local cluster of nodes under a supervisor
    Simulate(SimulateArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SchemeArg {
    DigitSum,
    PortOffset,
}

#[derive(Parser, Debug)]
struct TimingArgs {
    /// Leader heartbeat period
    #[arg(long, default_value = "1000")]
    heartbeat_interval_ms: u64,

    /// Heartbeat staleness before a follower proposes itself
    #[arg(long, default_value = "3000")]
    heartbeat_timeout_ms: u64,

    /// How often a follower checks heartbeat staleness
    #[arg(long, default_value = "1000")]
    monitor_poll_interval_ms: u64,
}

impl From<&TimingArgs> for TimingConfig {
    fn from(args: &TimingArgs) -> Self {
        TimingConfig {
            heartbeat_interval_ms: args.heartbeat_interval_ms,
            heartbeat_timeout_ms: args.heartbeat_timeout_ms,
            monitor_poll_interval_ms: args.monitor_poll_interval_ms,
            ..TimingConfig::default()
        }
    }
}

#[derive(Parser, Debug)]
struct NodeArgs {
    /// Node ID. Derived from host and port with --id-scheme when omitted
    #[arg(long)]
    node_id: Option<u64>,

    /// How to derive the node ID when --node-id is omitted
    #[arg(long, value_enum, default_value = "port-offset")]
    id_scheme: SchemeArg,

    /// Base port for the port-offset scheme
    #[arg(long, default_value = "5000")]
    base_port: u16,

    /// Host to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// UDP port to bind
    #[arg(long, default_value = "5000")]
    port: u16,

    /// Start as the leader
    #[arg(long)]
    leader: bool,

    /// Peer addresses (comma-separated, format: "id:host:port")
    /// Example: "1:127.0.0.1:5001,2:127.0.0.1:5002"
    #[arg(long, default_value = "")]
    peers: String,

    #[command(flatten)]
    timing: TimingArgs,
}

#[derive(Parser, Debug)]
struct SimulateArgs {
    /// Number of nodes
    #[arg(long, default_value = "10")]
    nodes: u16,

    /// First node's UDP port; node i binds base_port + i
    #[arg(long, default_value = "5000")]
    base_port: u16,

    /// Port for the HTTP dashboard (optional)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Probability of killing the leader each second
    #[arg(long, default_value = "0.01")]
    chaos_rate: f64,

    /// Disable the all-pairs connectivity monitor
    #[arg(long)]
    no_monitor: bool,

    #[command(flatten)]
    timing: TimingArgs,
}

fn parse_peers(peers_str: &str) -> Vec<PeerConfig> {
    if peers_str.is_empty() {
        return Vec::new();
    }

    peers_str
        .split(',')
        .filter_map(|peer| {
            let parts: Vec<&str> = peer.trim().split(':').collect();
            if parts.len() == 3 {
                let node_id: u64 = parts[0].parse().ok()?;
                let port: u16 = parts[2].parse().ok()?;
                Some(PeerConfig {
                    node_id,
                    host: parts[1].to_string(),
                    port,
                })
            } else {
                tracing::warn!(peer, "Invalid peer format, expected id:host:port");
                None
            }
        })
        .collect()
}

async fn run_node(args: NodeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let scheme = match args.id_scheme {
        SchemeArg::DigitSum => IdScheme::DigitSum,
        SchemeArg::PortOffset => IdScheme::PortOffset {
            base_port: args.base_port,
        },
    };
    let node_id = args
        .node_id
        .unwrap_or_else(|| scheme.derive(&args.host, args.port));

    let config = NodeConfig {
        node_id,
        host: args.host,
        port: args.port,
        initial_leader: args.leader,
        peers: parse_peers(&args.peers),
        timing: TimingConfig::from(&args.timing),
    };

    tracing::info!(
        node_id,
        listen_addr = %config.listen_addr(),
        leader = config.initial_leader,
        peers = ?config.peers.iter().map(|p| format!("{}:{}:{}", p.node_id, p.host, p.port)).collect::<Vec<_>>(),
        "Starting swarm-lite node"
    );

    let shutdown = install_shutdown_handler();
    let (tx, mut rx) = events::channel();
    let node = Node::bind(config, tx).await?;
    node.start().await?;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => {
                    log_event(&event);
                    if matches!(event, ClusterEvent::NodeDied { .. }) {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    node.shutdown().await;
    tracing::info!(node_id, "Node exited");
    Ok(())
}

async fn run_simulation(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let chaos_rate = args.chaos_rate.clamp(0.0, 1.0);
    let config = ClusterConfig::localhost(args.nodes, args.base_port)?
        .with_timing(TimingConfig::from(&args.timing));

    tracing::info!(
        nodes = args.nodes,
        base_port = args.base_port,
        chaos_rate,
        monitor = !args.no_monitor,
        "Starting swarm-lite simulation"
    );

    let shutdown = install_shutdown_handler();
    let cluster = Cluster::start(config, !args.no_monitor).await?;

    let mut observer = cluster.subscribe();
    let logger_shutdown = shutdown.clone();
    let logger = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = logger_shutdown.cancelled() => break,
                event = observer.recv() => match event {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event log fell behind");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    let dashboard = match args.dashboard_port {
        Some(port) => {
            let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
            let state = DashboardState {
                cluster: cluster.clone(),
            };
            Some(tokio::spawn(run_dashboard(addr, state, shutdown.clone())))
        }
        None => None,
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if chaos_rate > 0.0 && rand::random::<f64>() < chaos_rate {
                    match cluster.kill_leader().await {
                        Ok(id) => tracing::warn!(node_id = id, "Chaos killed the leader"),
                        Err(e) => tracing::debug!(error = %e, "Chaos found no leader to kill"),
                    }
                }
            }
        }
    }

    cluster.shutdown().await;
    if let Some(dashboard) = dashboard {
        let _ = dashboard.await;
    }
    let _ = logger.await;
    Ok(())
}

fn log_event(event: &ClusterEvent) {
    match event {
        ClusterEvent::LeadershipChanged { node_id, leader_id } => {
            tracing::info!(node_id, leader_id, "Leadership changed");
        }
        ClusterEvent::NodeDied { node_id } => {
            tracing::warn!(node_id, "Node died");
        }
        ClusterEvent::ConnectivityChanged { a, b, connected } => {
            tracing::info!(a, b, connected, "Connectivity changed");
        }
        ClusterEvent::MonitoringUpdate { at } => {
            tracing::debug!(at = %at, "Monitoring update");
        }
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

    match args.command {
        Commands::Node(node_args) => run_node(node_args).await?,
        Commands::Simulate(sim_args) => run_simulation(sim_args).await?,
    }

    Ok(())
}
