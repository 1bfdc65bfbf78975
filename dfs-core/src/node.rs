//! Storage node service: accepts one request per connection and answers it
//! from the local [`ChunkStore`]. Each connection runs on its own task.

use crate::config::NodeId;
use crate::error::DfsResult;
use crate::store::{ChunkStore, StoreOptions};
use crate::wire::{self, ErrorKind, FrameLimits, Request, Response};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
    pub storage: PathBuf,
    pub store: StoreOptions,
    pub limits: FrameLimits,
    pub io_timeout: Duration,
}

impl NodeConfig {
    pub fn new(id: NodeId, host: impl Into<String>, port: u16, storage: impl Into<PathBuf>) -> Self {
        Self {
            id,
            host: host.into(),
            port,
            storage: storage.into(),
            store: StoreOptions::default(),
            limits: FrameLimits::default(),
            io_timeout: Duration::from_secs(30),
        }
    }
}

pub struct NodeServer {
    id: NodeId,
    listener: TcpListener,
    store: Arc<ChunkStore>,
    limits: FrameLimits,
    io_timeout: Duration,
}

impl NodeServer {
    pub async fn bind(cfg: NodeConfig) -> DfsResult<Self> {
        let store = ChunkStore::open(&cfg.storage, cfg.store.clone()).await?;
        let listener = TcpListener::bind((cfg.host.as_str(), cfg.port)).await?;
        Ok(Self {
            id: cfg.id,
            listener,
            store: Arc::new(store),
            limits: cfg.limits,
            io_timeout: cfg.io_timeout,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn local_addr(&self) -> DfsResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn store(&self) -> Arc<ChunkStore> {
        self.store.clone()
    }

    /// Accept connections until `shutdown` resolves. Connections already
    /// accepted run to completion on their own tasks.
    pub async fn serve<F>(self, shutdown: F) -> DfsResult<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(node_id = self.id, addr = ?self.listener.local_addr().ok(), "node listening");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(node_id = self.id, "node shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let store = self.store.clone();
                        let (id, limits, io_timeout) = (self.id, self.limits, self.io_timeout);
                        tokio::spawn(async move {
                            handle_connection(id, store, stream, peer, limits, io_timeout).await;
                        });
                    }
                    Err(e) => tracing::warn!(node_id = self.id, error = %e, "accept failed"),
                },
            }
        }
        Ok(())
    }
}

async fn handle_connection(
    id: NodeId,
    store: Arc<ChunkStore>,
    mut stream: TcpStream,
    peer: SocketAddr,
    limits: FrameLimits,
    io_timeout: Duration,
) {
    let req: Request =
        match tokio::time::timeout(io_timeout, wire::read_frame(&mut stream, &limits)).await {
            Ok(Ok(req)) => req,
            Ok(Err(e)) => {
                tracing::warn!(node_id = id, %peer, error = %e, "bad request frame");
                let resp = Response::error(ErrorKind::InvalidRequest, e.to_string());
                let _ = tokio::time::timeout(io_timeout, wire::write_frame(&mut stream, &resp)).await;
                return;
            }
            Err(_) => {
                tracing::warn!(node_id = id, %peer, "timed out reading request");
                return;
            }
        };
    let command = req.command();
    let resp = dispatch(&store, req).await;
    if let Response::Error { kind, message } = &resp {
        tracing::warn!(node_id = id, %peer, command, ?kind, message = %message, "request failed");
    } else {
        tracing::debug!(node_id = id, %peer, command, "request served");
    }
    match tokio::time::timeout(io_timeout, wire::write_frame(&mut stream, &resp)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(node_id = id, %peer, error = %e, "writing response failed"),
        Err(_) => tracing::warn!(node_id = id, %peer, "timed out writing response"),
    }
    let _ = stream.shutdown().await;
}

/// Execute one request against the store; failures become error responses.
pub async fn dispatch(store: &ChunkStore, req: Request) -> Response {
    match req {
        Request::Store { file_name, seq, payload, digest } => {
            match store.store(&file_name, seq, &payload, digest).await {
                Ok(()) => Response::Stored,
                Err(e) => Response::from(&e),
            }
        }
        Request::Retrieve { file_name, seq } => match store.retrieve(&file_name, seq).await {
            Ok(chunk) => Response::Chunk { payload: chunk.payload, digest: chunk.digest },
            Err(e) => Response::from(&e),
        },
        Request::List => Response::Listing { files: store.list().await },
        Request::Delete { file_name } => match store.delete(&file_name).await {
            Ok(_) => Response::Deleted,
            Err(e) => Response::from(&e),
        },
    }
}
