use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use swarm_core::Dispatcher;
use swarm_node::{Node, PeerDirectory, settings, storage};
use tokio::io::BufReader;
use tracing::{Level, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Peer-to-peer chunk swarm node")]
struct Args {
    /// This node's id in the peer file.
    #[arg(short = 'i', long)]
    identity: u32,

    /// Peer directory: `<id> <ip> <port>` per line.
    #[arg(short = 'p', long)]
    peer_file: PathBuf,

    /// Chunks held at startup (JSON, hex digest -> base64).
    #[arg(short = 'c', long)]
    chunk_file: Option<PathBuf>,

    /// Maximum concurrent uploads before requests are DENIED.
    #[arg(short = 'm', long)]
    max_conn: Option<usize>,

    /// 0 errors only, 1 warnings, 2 info, 3 debug.
    #[arg(short = 'v', long, default_value_t = 0)]
    verbose: u8,

    /// Fixed retransmission timeout in seconds; 0 estimates it from RTT.
    #[arg(short = 't', long)]
    timeout: Option<u64>,

    /// TOML file with transfer settings.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let directory = PeerDirectory::load(&args.peer_file)?;
    let local = directory
        .lookup(args.identity)
        .with_context(|| format!("peer {} is not in the peer file", args.identity))?;
    let config = settings::transfer_config(args.config.as_deref(), args.max_conn, args.timeout)?;
    let inventory = match &args.chunk_file {
        Some(path) => storage::load_inventory(path, config.chunk_size)?,
        None => HashMap::new(),
    };
    info!(
        "peer {} at {local}: {} chunks held, {} peers known",
        args.identity,
        inventory.len(),
        directory.entries().len()
    );

    let dispatcher = Dispatcher::new(local, directory.addrs(), inventory, config);
    let node = Node::bind(dispatcher).await?;
    node.run(BufReader::new(tokio::io::stdin()), async {
        tokio::signal::ctrl_c().await.ok();
    })
    .await
}
