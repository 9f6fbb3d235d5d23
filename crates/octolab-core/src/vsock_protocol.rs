//! Guest agent wire protocol: JSON lines over virtio-vsock, one 4-byte
//! big-endian length prefix per frame. Every request carries the boot
//! token; the guest agent rejects anything that doesn't match.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Port the in-VM guest agent listens on.
pub const GUEST_AGENT_PORT: u32 = 5000;

/// Maximum frame size for a guest agent request/response (1 MiB header +
/// body; the 16 MiB bundle itself is base64 inside `upload_project`, so
/// this bound must be large enough to hold it after base64 expansion).
pub const MAX_FRAME_SIZE: usize = 24 * 1024 * 1024;

/// Maximum accepted (decoded) project bundle size.
pub const MAX_BUNDLE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GuestRequest {
    Ping { token: String },
    UploadProject { token: String, bundle: String },
    ComposeUp { token: String },
    ComposeDown { token: String },
    Status { token: String },
}

impl GuestRequest {
    pub fn token(&self) -> &str {
        match self {
            GuestRequest::Ping { token }
            | GuestRequest::UploadProject { token, .. }
            | GuestRequest::ComposeUp { token }
            | GuestRequest::ComposeDown { token }
            | GuestRequest::Status { token } => token,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerState {
    pub name: String,
    pub state: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestErrorCode {
    Unauthenticated,
    InvalidArgument,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestError {
    pub code: GuestErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GuestResponse {
    Ok { ok: bool, result: Option<serde_json::Value> },
    Err { ok: bool, error: GuestError },
}

impl GuestResponse {
    pub fn pong() -> Self {
        GuestResponse::Ok {
            ok: true,
            result: None,
        }
    }

    pub fn ok(result: impl Serialize) -> Self {
        GuestResponse::Ok {
            ok: true,
            result: Some(serde_json::to_value(result).expect("result must serialize")),
        }
    }

    pub fn err(code: GuestErrorCode, message: impl Into<String>) -> Self {
        GuestResponse::Err {
            ok: false,
            error: GuestError {
                code,
                message: message.into(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, GuestResponse::Ok { .. })
    }
}

/// Read one length-prefixed JSON frame from a blocking reader.
pub fn read_frame<R: std::io::Read>(r: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).context("read frame length")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        bail!("frame too large: {} bytes (max {})", len, MAX_FRAME_SIZE);
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).context("read frame body")?;
    Ok(buf)
}

/// Write one length-prefixed JSON frame to a blocking writer.
pub fn write_frame<W: std::io::Write>(w: &mut W, body: &[u8]) -> Result<()> {
    if body.len() > MAX_FRAME_SIZE {
        bail!("frame too large to write: {} bytes", body.len());
    }
    let len = (body.len() as u32).to_be_bytes();
    w.write_all(&len).context("write frame length")?;
    w.write_all(body).context("write frame body")?;
    w.flush().context("flush frame")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_request_roundtrip() {
        let variants = vec![
            GuestRequest::Ping {
                token: "t".into(),
            },
            GuestRequest::UploadProject {
                token: "t".into(),
                bundle: "YmFzZTY0".into(),
            },
            GuestRequest::ComposeUp { token: "t".into() },
            GuestRequest::ComposeDown { token: "t".into() },
            GuestRequest::Status { token: "t".into() },
        ];
        for req in &variants {
            let json = serde_json::to_string(req).unwrap();
            let parsed: GuestRequest = serde_json::from_str(&json).unwrap();
            let json2 = serde_json::to_string(&parsed).unwrap();
            assert_eq!(json, json2);
        }
    }

    #[test]
    fn test_token_accessor() {
        let req = GuestRequest::ComposeUp {
            token: "abc123".into(),
        };
        assert_eq!(req.token(), "abc123");
    }

    #[test]
    fn test_error_response_unauthenticated_shape() {
        let resp = GuestResponse::err(GuestErrorCode::Unauthenticated, "bad token");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"ok\":false"));
        assert!(json.contains("unauthenticated"));
        assert!(!resp.is_ok());
    }

    #[test]
    fn test_frame_roundtrip() {
        let body = serde_json::to_vec(&GuestRequest::Ping { token: "t".into() }).unwrap();
        let mut buf = Vec::new();
        write_frame(&mut buf, &body).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let out = read_frame(&mut cursor).unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn test_oversized_frame_rejected_on_read() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_FRAME_SIZE + 1) as u32).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn test_bundle_bound_constant() {
        assert_eq!(MAX_BUNDLE_BYTES, 16 * 1024 * 1024);
    }
}
