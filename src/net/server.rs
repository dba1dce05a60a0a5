use std::future::{self, Future};
use std::net::{SocketAddr, TcpListener as StdListener, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::protocol::{self, MAX_FRAME_LEN};
use crate::bos::Bos;
use crate::error::{BosError, Result};

/// Node protocol server.
///
/// All connections are multiplexed on one thread. Each request is served
/// to completion before the next ready socket is looked at.
pub struct NodeServer {
    listener: StdListener,
    bos: Arc<Bos>,
}

impl NodeServer {
    /// Binds the listening socket; nothing is served until [`run`](Self::run)
    /// or [`spawn`](Self::spawn).
    pub fn bind(addr: impl ToSocketAddrs, bos: Arc<Bos>) -> Result<Self> {
        let listener = StdListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener, bos })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves on the calling thread until the process exits.
    pub fn run(self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()?;
        runtime.block_on(self.serve(future::pending()))
    }

    /// Serves on a dedicated thread until the returned handle is shut down.
    pub fn spawn(self) -> Result<ServerHandle> {
        let addr = self.local_addr()?;
        let (tx, rx) = oneshot::channel::<()>();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()?;
        let join = thread::Builder::new()
            .name("bos-node-server".to_string())
            .spawn(move || {
                runtime.block_on(self.serve(async {
                    let _ = rx.await;
                }))
            })?;
        Ok(ServerHandle {
            addr,
            shutdown: Some(tx),
            join: Some(join),
        })
    }

    async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let listener = TcpListener::from_std(self.listener)?;
        info!(addr = %listener.local_addr()?, "node server listening");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "node connection opened");
                        tokio::spawn(serve_connection(self.bos.clone(), stream, peer));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }
        info!("node server stopped");
        Ok(())
    }
}

async fn serve_connection(bos: Arc<Bos>, mut stream: TcpStream, peer: SocketAddr) {
    loop {
        let len = match stream.read_u32_le().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!(%peer, "node connection closed");
                return;
            }
            Err(e) => {
                warn!(%peer, error = %e, "node connection failed");
                return;
            }
        };
        if len > MAX_FRAME_LEN {
            warn!(%peer, len, "oversized frame, closing connection");
            return;
        }
        let mut body = vec![0u8; len];
        if let Err(e) = stream.read_exact(&mut body).await {
            warn!(%peer, error = %e, "truncated frame");
            return;
        }

        let response = protocol::handle(&bos, &body);
        if let Some(error) = &response.error {
            debug!(%peer, %error, "request failed");
        }
        let reply = match serde_json::to_vec(&response) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(%peer, error = %e, "cannot encode response");
                return;
            }
        };
        let written = async {
            stream.write_u32_le(reply.len() as u32).await?;
            stream.write_all(&reply).await?;
            stream.flush().await
        };
        if let Err(e) = written.await {
            warn!(%peer, error = %e, "write failed");
            return;
        }
    }
}

/// Handle to a server started with [`NodeServer::spawn`].
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<Result<()>>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting connections and waits for the server thread.
    pub fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| BosError::ServerError("node server thread panicked".to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
