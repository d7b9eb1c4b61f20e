//! Stakechain node binary.
//!
//! Starts a single node from command-line arguments.
//!
//! # Usage
//! ```text
//! stakechain <listen_addr> [OPTIONS]
//! ```
//!
//! # Identity
//! The node's proposer key is stored encrypted at `<data_dir>/node.key`.
//! The passphrase is read from `NODE_PASSPHRASE`, or prompted if not set.

use rpassword::prompt_password;
use stakechain::config::NodeConfig;
use stakechain::crypto::keystore::load_or_generate_key;
use stakechain::network::server::{Server, ServerOps};
use stakechain::network::tcp_transport::TcpTransport;
use stakechain::network::transport::Transport;
use stakechain::utils::log;
use stakechain::{error, info, warn};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use tokio::sync::oneshot;
use zeroize::Zeroizing;

const KEY_FILE: &str = "node.key";

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let listen_arg = &args[1];
    let listen_addr: SocketAddr = match listen_arg.parse() {
        Ok(addr) => addr,
        Err(_) => {
            eprintln!("Invalid listen address: {listen_arg}");
            process::exit(1);
        }
    };

    let mut config_path: Option<PathBuf> = None;
    let mut data_dir: Option<PathBuf> = None;
    let mut node_name: Option<String> = None;
    let mut log_level: Option<String> = None;
    let mut peers: Vec<String> = Vec::new();

    let mut i = 2;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--config" | "--data-dir" | "--name" | "--peer" | "--log-level" => {
                i += 1;
                let Some(value) = args.get(i) else {
                    eprintln!("{flag} requires an argument");
                    process::exit(1);
                };
                match flag {
                    "--config" => config_path = Some(PathBuf::from(value)),
                    "--data-dir" => data_dir = Some(PathBuf::from(value)),
                    "--name" => node_name = Some(value.clone()),
                    "--log-level" => log_level = Some(value.clone()),
                    _ => {
                        if value.parse::<SocketAddr>().is_err() {
                            eprintln!("Invalid peer address: {value}");
                            process::exit(1);
                        }
                        peers.push(value.clone());
                    }
                }
                i += 1;
            }
            other => {
                eprintln!("Unexpected argument: {other}\n");
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    let mut config = match &config_path {
        Some(path) => NodeConfig::load(path).unwrap_or_else(|e| {
            eprintln!("{}: {e}", path.display());
            process::exit(1);
        }),
        None => NodeConfig::default(),
    };
    config.listen_addr = listen_arg.clone();
    config.peers.extend(peers);
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    if let Some(name) = &node_name {
        config.data_dir = config.data_dir.join(name);
    }
    if let Some(level) = log_level {
        config.log_level = level;
    }
    if let Err(e) = config.validate() {
        eprintln!("{e}");
        process::exit(1);
    }
    log::set_level(config.level());

    let node_name = node_name.as_deref().unwrap_or(listen_arg);
    let passphrase = Zeroizing::new(env::var("NODE_PASSPHRASE").unwrap_or_else(|_| {
        prompt_password(format!("Enter passphrase for node '{node_name}': ")).unwrap_or_else(|e| {
            eprintln!("{e}");
            process::exit(1);
        })
    }));
    if passphrase.is_empty() {
        eprintln!("Passphrase cannot be empty");
        process::exit(1);
    }

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        eprintln!("Cannot create {}: {e}", config.data_dir.display());
        process::exit(1);
    }
    let key = match load_or_generate_key(&config.data_dir.join(KEY_FILE), passphrase.as_bytes()) {
        Ok(key) => key,
        Err(e) => {
            eprintln!("Failed to load node key: {e}");
            process::exit(1);
        }
    };

    let transport = TcpTransport::new(listen_addr, key.clone());
    let server = match Server::new(transport.clone(), ServerOps::from_config(&config, key)).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Failed to start node: {e}");
            process::exit(1);
        }
    };
    let rpcs = match transport.start().await {
        Ok(rx) => rx,
        Err(e) => {
            eprintln!("Failed to listen on {listen_addr}: {e}");
            process::exit(1);
        }
    };
    info!(
        "Node '{node_name}' listening on {listen_addr} as {}",
        server.address()
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let server_handle = tokio::spawn(server.clone().run(rpcs, shutdown_rx));

    let mut connected = 0;
    for peer in &config.peers {
        match transport.connect(peer.clone()).await {
            Ok(()) => {
                info!("Connected to peer {peer}");
                connected += 1;
            }
            Err(e) => warn!("Failed to connect to {peer}: {e}"),
        }
    }
    if connected > 0 {
        if let Err(e) = server.request_sync(false).await {
            warn!("Initial sync request failed: {e}");
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Failed to setup Ctrl+C handler: {e}");
        return;
    }
    info!("Ctrl+C received, shutting down...");
    let _ = shutdown_tx.send(());
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Node stopped with error: {e}"),
        Err(e) => error!("Node task failed: {e}"),
    }
}

const USAGE: &str = "\
Stakechain Node

USAGE:
    {program} <listen_addr> [OPTIONS]

ARGS:
    <listen_addr>    Local address to bind (e.g., 127.0.0.1:3000)

OPTIONS:
    --config <file>       JSON config file; flags override its values
    --peer <addr>         Peer to connect to on startup (repeatable)
    --data-dir <dir>      Snapshot and key directory (default ~/.stakechain)
    --name <name>         Node name; data lives in <data-dir>/<name>
    --log-level <level>   debug, info, warn or error
    -h, --help            Print this help message

ENVIRONMENT:
    NODE_PASSPHRASE    Passphrase for the node key (prompted interactively if not set)

EXAMPLES:
    # Start a single node
    {program} 127.0.0.1:3000

    # Run two nodes on the same machine
    {program} 127.0.0.1:3000 --name node-a
    {program} 127.0.0.1:3001 --name node-b --peer 127.0.0.1:3000

FILES:
    <data-dir>/blockchain.json   ledger snapshot
    <data-dir>/node.key          encrypted proposer key
    <data-dir>/node.lock         single-process lock
";

/// Prints usage information to stderr.
fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
