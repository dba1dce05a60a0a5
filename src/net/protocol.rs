//! Node protocol messages and framing.
//!
//! Every message is a 4-byte little-endian length followed by that many
//! bytes of UTF-8 JSON. Requests look like
//! `{"request": "get_status", "name": "a"}` or
//! `{"request": "set_current", "name": "a", "current": 1.5}`; responses are
//! `{"response": <payload or null>, "error": "<message>"?}`.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bos::Bos;

/// Frames longer than this are refused and the connection is closed.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// A request understood by the node server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum Request {
    GetStatus { name: String },
    SetCurrent { name: String, current: f64 },
}

/// Envelope returned for every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub response: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(payload: Value) -> Self {
        Self {
            response: payload,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            response: Value::Null,
            error: Some(message.into()),
        }
    }
}

/// Parses a request body.
///
/// # Errors
///
/// Returns a human-readable message for malformed JSON, unknown request
/// kinds, and missing or mistyped fields.
pub fn parse_request(body: &[u8]) -> Result<Request, String> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| format!("invalid JSON: {e}"))?;
    serde_json::from_value(value).map_err(|e| format!("invalid request: {e}"))
}

/// Serves one request body against `bos`.
///
/// Never fails: every problem is reported inside the response.
pub fn handle(bos: &Bos, body: &[u8]) -> Response {
    let request = match parse_request(body) {
        Ok(request) => request,
        Err(message) => return Response::error(message),
    };
    match request {
        Request::GetStatus { name } => match bos.get_status(&name) {
            Ok(status) => match serde_json::to_value(status) {
                Ok(payload) => Response::ok(payload),
                Err(e) => Response::error(e.to_string()),
            },
            Err(e) => Response::error(e.to_string()),
        },
        Request::SetCurrent { name, current } => match bos.set_current(&name, current) {
            Ok(()) => Response::ok(Value::Null),
            Err(e) => Response::error(e.to_string()),
        },
    }
}

/// Writes one length-prefixed frame.
pub fn write_frame(writer: &mut impl Write, body: &[u8]) -> io::Result<()> {
    let len = u32::try_from(body.len())
        .ok()
        .filter(|&n| n as usize <= MAX_FRAME_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(body)?;
    writer.flush()
}

/// Reads one length-prefixed frame.
///
/// # Errors
///
/// Returns `InvalidData` for frames over [`MAX_FRAME_LEN`] and
/// `UnexpectedEof` if the peer closes mid-frame.
pub fn read_frame(reader: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit"),
        ));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(body)
}
