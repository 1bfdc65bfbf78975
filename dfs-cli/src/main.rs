use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use dfs_core::config::{ClientConfig, NodeId};
use dfs_core::coordinator::{Coordinator, NodeStatus};
use dfs_core::node::{NodeConfig, NodeServer};

#[derive(Parser)]
#[command(name = "dfs", version, about = "Replicated chunk storage: node daemon and interactive client")]
struct Cli {
    /// Log at DEBUG instead of INFO
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run a storage node until interrupted
    Node {
        #[arg(long)]
        id: NodeId,
        #[arg(long, default_value = "localhost")]
        host: String,
        #[arg(long)]
        port: u16,
        #[arg(long)]
        storage: PathBuf,
        /// Keep the chunk index in memory only; it is rebuilt from disk on start
        #[arg(long, default_value_t = false)]
        no_persist_index: bool,
    },
    /// Start an interactive client session
    Client {
        #[arg(long)]
        config: PathBuf,
        /// JSON file holding file descriptors between sessions
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

const HELP: &str = "\
commands:
  upload <path>              split and replicate a local file
  download <name> <dest>     fetch a stored file into <dest> (file or directory)
  list                       files known to this client
  delete <name>              remove a file from every node
  nodes                      node status and chunk inventory
  help                       this text
  exit                       end the session";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    match cli.cmd {
        Cmd::Node { id, host, port, storage, no_persist_index } => {
            run_node(id, host, port, storage, !no_persist_index).await
        }
        Cmd::Client { config, catalog } => run_client(config, catalog).await,
    }
}

async fn run_node(id: NodeId, host: String, port: u16, storage: PathBuf, persist: bool) -> Result<()> {
    let mut cfg = NodeConfig::new(id, host, port, &storage);
    cfg.store.persist_index = persist;
    let server = NodeServer::bind(cfg)
        .await
        .with_context(|| format!("start node {} on port {} with storage {:?}", id, port, storage))?;
    server
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for ctrl-c; stopping");
            }
        })
        .await?;
    Ok(())
}

async fn run_client(config: PathBuf, catalog: Option<PathBuf>) -> Result<()> {
    let cfg = ClientConfig::load(&config)?;
    let mut coord = Coordinator::from_config(&cfg)?;
    if let Some(path) = &catalog {
        coord = coord.with_catalog(path).with_context(|| format!("open catalog {:?}", path))?;
    }
    tracing::info!(
        nodes = cfg.nodes.len(),
        replication_factor = cfg.replication_factor,
        chunk_size = cfg.chunk_size,
        "client ready"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"dfs> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else { break };
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["exit"] | ["quit"] => break,
            ["help"] => println!("{HELP}"),
            ["upload", path] => match coord.upload(Path::new(path)).await {
                Ok(r) => println!("uploaded {} ({} bytes, {} chunks)", r.file_name, r.size, r.chunk_count()),
                Err(e) => println!("upload failed: {e}"),
            },
            ["download", name, dest] => match coord.download(name, Path::new(dest)).await {
                Ok(path) => println!("downloaded {} to {}", name, path.display()),
                Err(e) => println!("download failed: {e}"),
            },
            ["list"] => {
                let files = coord.list_files().await;
                if files.is_empty() {
                    println!("no files");
                }
                for (name, chunks) in files {
                    println!("{name}\t{chunks} chunks");
                }
            }
            ["delete", name] => match coord.delete(name).await {
                Ok(r) if r.failed.is_empty() => println!("deleted {}", r.file_name),
                Ok(r) => println!("deleted {} (nodes {:?} did not confirm)", r.file_name, r.failed),
                Err(e) => println!("delete failed: {e}"),
            },
            ["nodes"] => print_nodes(&coord).await,
            _ => println!("unrecognized command {:?}; type `help`", line.trim()),
        }
    }
    Ok(())
}

async fn print_nodes(coord: &Coordinator) {
    for reg in coord.nodes().await {
        let id = reg.entry.id;
        match coord.node_inventory(id).await {
            Ok(files) => {
                let chunks: usize = files.values().map(Vec::len).sum();
                println!("node {} {} Reachable: {} files, {} chunks", id, reg.entry.address(), files.len(), chunks);
                for (name, seqs) in files {
                    println!("  {name}: {seqs:?}");
                }
            }
            Err(e) => {
                let status = coord
                    .nodes()
                    .await
                    .into_iter()
                    .find(|n| n.entry.id == id)
                    .map(|n| n.status)
                    .unwrap_or(NodeStatus::Unknown);
                println!("node {} {} {:?}: {}", id, reg.entry.address(), status, e);
            }
        }
    }
}
