//! netd wire protocol: one JSON object per line over a UNIX domain socket.
//!
//! Framing is deliberately simple (newline-delimited, not length-prefixed):
//! one request per connection, so there is no need to pipeline or
//! multiplex frames. This matches the protocol shape fixed by the
//! external interface contract.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default UNIX domain socket path for netd.
pub const NETD_SOCKET_PATH: &str = "/run/octolab/microvm-netd.sock";

/// Group that owns the netd socket (mode 0660).
pub const NETD_SOCKET_GROUP: &str = "octolab";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NetdRequest {
    Ping,
    Create { lab_id: Uuid },
    Destroy { lab_id: Uuid },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResult {
    pub bridge: String,
    pub tap: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroyResult {
    pub bridge_deleted: String,
    pub tap_deleted: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetdErrorCode {
    InvalidArgument,
    NotFound,
    PreconditionFailed,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetdError {
    pub code: NetdErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetdResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NetdError>,
}

impl NetdResponse {
    pub fn ok(result: impl Serialize) -> Self {
        NetdResponse {
            ok: true,
            result: Some(serde_json::to_value(result).expect("result must serialize")),
            error: None,
        }
    }

    pub fn ok_empty() -> Self {
        NetdResponse {
            ok: true,
            result: None,
            error: None,
        }
    }

    pub fn err(code: NetdErrorCode, message: impl Into<String>) -> Self {
        NetdResponse {
            ok: false,
            result: None,
            error: Some(NetdError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Read one newline-delimited JSON request from a stream.
pub fn read_request(stream: &UnixStream) -> Result<NetdRequest> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .context("failed to read netd request line")?;
    if n == 0 {
        bail!("connection closed before a request was sent");
    }
    serde_json::from_str(line.trim_end()).context("failed to parse netd request")
}

/// Write one newline-delimited JSON response to a stream.
pub fn write_response(mut stream: &UnixStream, resp: &NetdResponse) -> Result<()> {
    let mut line = serde_json::to_string(resp).context("failed to serialize netd response")?;
    line.push('\n');
    stream
        .write_all(line.as_bytes())
        .context("failed to write netd response")?;
    stream.flush().context("failed to flush netd response")
}

/// Client-side: send a request and read back the response over a fresh
/// connection (one request per connection, per the protocol contract).
pub fn send_request(socket_path: &str, req: &NetdRequest) -> Result<NetdResponse> {
    let stream = UnixStream::connect(socket_path)
        .with_context(|| format!("failed to connect to netd at {socket_path}"))?;
    let mut line = serde_json::to_string(req)?;
    line.push('\n');
    (&stream)
        .write_all(line.as_bytes())
        .context("failed to send netd request")?;
    let mut reader = BufReader::new(&stream);
    let mut resp_line = String::new();
    reader
        .read_line(&mut resp_line)
        .context("failed to read netd response")?;
    serde_json::from_str(resp_line.trim_end()).context("failed to parse netd response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip_ping() {
        let req = NetdRequest::Ping;
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"op":"ping"}"#);
        let parsed: NetdRequest = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, NetdRequest::Ping));
    }

    #[test]
    fn test_request_roundtrip_create() {
        let id = Uuid::new_v4();
        let req = NetdRequest::Create { lab_id: id };
        let json = serde_json::to_string(&req).unwrap();
        let parsed: NetdRequest = serde_json::from_str(&json).unwrap();
        match parsed {
            NetdRequest::Create { lab_id } => assert_eq!(lab_id, id),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_create_response_shape() {
        let resp = NetdResponse::ok(CreateResult {
            bridge: "obr0123456789".into(),
            tap: "otp0123456789".into(),
        });
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"ok\":true"));
        assert!(json.contains("\"bridge\""));
    }

    #[test]
    fn test_error_response_shape() {
        let resp = NetdResponse::err(NetdErrorCode::InvalidArgument, "bad lab_id");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"ok\":false"));
        assert!(json.contains("invalid_argument"));
    }

    #[test]
    fn test_request_rejects_non_uuid_lab_id() {
        let json = r#"{"op":"create","lab_id":"not-a-uuid"}"#;
        let parsed: Result<NetdRequest> = serde_json::from_str(json).map_err(Into::into);
        assert!(parsed.is_err());
    }
}
