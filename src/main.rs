use std::path::PathBuf;
use std::sync::Arc;

use cidvec::{
    config::{Config, Role},
    http,
    network::GossipTransport,
    node::{build_annotator, build_blob_store, Node},
};
use clap::Parser;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "cidvec", about = "Leader-based replication of content ids over gossipsub")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_parser = parse_role)]
    role: Option<Role>,

    #[arg(long)]
    peer_id: Option<String>,

    /// HTTP listen address, e.g. 0.0.0.0:5323
    #[arg(long)]
    http_addr: Option<String>,

    /// libp2p listen multiaddr
    #[arg(long)]
    listen: Option<String>,

    /// Multiaddr to dial at startup (repeatable)
    #[arg(long)]
    bootstrap: Vec<String>,

    #[arg(long)]
    log_level: Option<String>,
}

fn parse_role(s: &str) -> Result<Role, String> {
    match s {
        "leader" => Ok(Role::Leader),
        "peer" => Ok(Role::Peer),
        other => Err(format!("unknown role '{other}', expected leader or peer")),
    }
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(role) = self.role {
            config.node.role = role;
        }
        if let Some(peer_id) = self.peer_id {
            config.node.peer_id = Some(peer_id);
        }
        if let Some(addr) = self.http_addr {
            config.http.listen_addr = addr;
        }
        if let Some(listen) = self.listen {
            config.network.listen_addr = listen;
        }
        config.network.bootstrap.extend(self.bootstrap);
        if let Some(level) = self.log_level {
            config.node.log_level = level;
        }
    }
}

#[actix_rt::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    let level = config
        .node
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    tracing::info!("🚀 Starting cidvec node ({:?})...", config.node.role);

    let shutdown = CancellationToken::new();

    let (transport, inbound) = GossipTransport::spawn(&config.network, shutdown.clone())?;
    let blobs = build_blob_store(&config.blob_store)?;
    let annotator = build_annotator(&config.annotation)?;

    let node = Arc::new(Node::start(
        &config,
        Arc::new(transport),
        inbound,
        blobs,
        annotator,
        shutdown.clone(),
    )?);

    tracing::info!("✅ Node {} ready", node.peer_id());

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        tracing::info!("Shutting down...");
        ctrl_c.cancel();
    });

    let result = http::serve(node, &config.http.listen_addr, shutdown.clone()).await;
    shutdown.cancel();
    result
}
