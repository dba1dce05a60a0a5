use std::net::{TcpStream, ToSocketAddrs};

use serde_json::Value;
use tracing::debug;

use super::protocol::{Request, Response, read_frame, write_frame};
use crate::battery::BatteryStatus;
use crate::error::{BosError, Result};

/// Blocking client for a peer node.
///
/// Calls have no timeout of their own and block for the full round trip.
pub struct NodeClient {
    peer: String,
    stream: TcpStream,
}

impl NodeClient {
    /// Connects to the node server at `addr`.
    pub fn connect(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<Self> {
        let peer = format!("{addr:?}");
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        debug!(%peer, "connected to node");
        Ok(Self { peer, stream })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Sends `request` and returns the response payload.
    ///
    /// # Errors
    ///
    /// - `ServerError` when the peer reports an error
    /// - `BadResponse` when the reply cannot be decoded
    /// - `Transport` on socket failure
    pub fn call(&mut self, request: &Request) -> Result<Value> {
        let body = serde_json::to_vec(request)
            .map_err(|e| BosError::InvalidArgument(e.to_string()))?;
        write_frame(&mut self.stream, &body)?;
        let reply = read_frame(&mut self.stream)?;
        let response: Response = serde_json::from_slice(&reply)
            .map_err(|e| BosError::BadResponse(format!("{}: {e}", self.peer)))?;
        match response.error {
            Some(message) => Err(BosError::ServerError(message)),
            None => Ok(response.response),
        }
    }

    pub fn get_status(&mut self, name: &str) -> Result<BatteryStatus> {
        let payload = self.call(&Request::GetStatus {
            name: name.to_string(),
        })?;
        serde_json::from_value(payload)
            .map_err(|e| BosError::BadResponse(format!("status of \"{name}\": {e}")))
    }

    pub fn set_current(&mut self, name: &str, current: f64) -> Result<()> {
        self.call(&Request::SetCurrent {
            name: name.to_string(),
            current,
        })?;
        Ok(())
    }
}
