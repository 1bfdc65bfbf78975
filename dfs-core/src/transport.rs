use crate::config::{ClientConfig, NodeEntry, NodeId};
use crate::error::{DfsError, DfsResult};
use crate::wire::{self, FrameLimits, Request, Response};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// One request/response exchange with a storage node.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn call(&self, node: &NodeEntry, req: Request) -> DfsResult<Response>;
}

/// Opens a fresh TCP connection per call, bounded by a connect timeout and
/// an I/O timeout covering the request write and the response read.
#[derive(Clone, Debug)]
pub struct TcpTransport {
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub limits: FrameLimits,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self { connect_timeout, io_timeout, limits: FrameLimits::default() }
    }

    pub fn from_config(cfg: &ClientConfig) -> Self {
        Self::new(cfg.connect_timeout(), cfg.io_timeout())
    }
}

#[async_trait]
impl NodeTransport for TcpTransport {
    async fn call(&self, node: &NodeEntry, req: Request) -> DfsResult<Response> {
        let addr = node.address();
        let net = |reason: String| DfsError::Network { node: node.id, addr: addr.clone(), reason };

        let mut stream = match timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => return Err(net(format!("connect: {e}"))),
            Err(_) => return Err(net("connect timed out".into())),
        };
        let limits = self.limits;
        let exchange = async {
            wire::write_frame(&mut stream, &req).await?;
            wire::read_frame::<_, Response>(&mut stream, &limits).await
        };
        match timeout(self.io_timeout, exchange).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(DfsError::Io(e))) => Err(net(e.to_string())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(net("request timed out".into())),
        }
    }
}

/// Turn an `Error` response into a [`DfsError::Remote`].
pub fn check(node: NodeId, resp: Response) -> DfsResult<Response> {
    match resp {
        Response::Error { kind, message } => Err(DfsError::Remote { node, kind, message }),
        other => Ok(other),
    }
}
