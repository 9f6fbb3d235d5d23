//! Host-side client for the in-VM guest agent. Firecracker exposes vsock
//! as a UNIX socket on the host; connecting requires the `CONNECT <port>`
//! / `OK <port>` handshake before the length-prefixed JSON protocol
//! starts.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use octolab_core::vsock_protocol::{GuestRequest, GuestResponse, read_frame, write_frame};

pub const DEFAULT_VSOCK_TIMEOUT_SECS: u64 = 10;

fn vsock_uds_path(state_dir: &str) -> String {
    format!("{state_dir}/firecracker.vsock")
}

fn connect(state_dir: &str, port: u32, timeout_secs: u64) -> Result<UnixStream> {
    let uds_path = vsock_uds_path(state_dir);
    let timeout = Duration::from_secs(timeout_secs);

    let mut stream = UnixStream::connect(&uds_path)
        .with_context(|| format!("failed to connect to vsock UDS at {uds_path}"))?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    writeln!(stream, "CONNECT {port}").context("failed to send vsock CONNECT")?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .context("failed to read vsock CONNECT response")?;
    if !response_line.starts_with("OK ") {
        bail!("vsock CONNECT failed: expected 'OK {port}', got '{}'", response_line.trim());
    }
    Ok(stream)
}

fn roundtrip(state_dir: &str, port: u32, timeout_secs: u64, req: &GuestRequest) -> Result<GuestResponse> {
    let mut stream = connect(state_dir, port, timeout_secs)?;
    let body = serde_json::to_vec(req).context("failed to serialize guest request")?;
    write_frame(&mut stream, &body)?;
    let resp_bytes = read_frame(&mut stream)?;
    serde_json::from_slice(&resp_bytes).context("failed to parse guest response")
}

pub fn ping(state_dir: &str, port: u32, token: &str) -> Result<bool> {
    let resp = roundtrip(
        state_dir,
        port,
        DEFAULT_VSOCK_TIMEOUT_SECS,
        &GuestRequest::Ping { token: token.to_string() },
    )?;
    Ok(resp.is_ok())
}

pub fn upload_project(state_dir: &str, port: u32, token: &str, bundle_base64: String) -> Result<()> {
    let resp = roundtrip(
        state_dir,
        port,
        DEFAULT_VSOCK_TIMEOUT_SECS,
        &GuestRequest::UploadProject {
            token: token.to_string(),
            bundle: bundle_base64,
        },
    )?;
    ensure_ok(resp, "upload_project")
}

pub fn compose_up(state_dir: &str, port: u32, token: &str) -> Result<()> {
    let resp = roundtrip(
        state_dir,
        port,
        120,
        &GuestRequest::ComposeUp { token: token.to_string() },
    )?;
    ensure_ok(resp, "compose_up")
}

pub fn compose_down(state_dir: &str, port: u32, token: &str) -> Result<()> {
    let resp = roundtrip(
        state_dir,
        port,
        60,
        &GuestRequest::ComposeDown { token: token.to_string() },
    )?;
    ensure_ok(resp, "compose_down")
}

pub fn status(state_dir: &str, port: u32, token: &str) -> Result<GuestResponse> {
    roundtrip(
        state_dir,
        port,
        DEFAULT_VSOCK_TIMEOUT_SECS,
        &GuestRequest::Status { token: token.to_string() },
    )
}

fn ensure_ok(resp: GuestResponse, op: &str) -> Result<()> {
    if resp.is_ok() {
        Ok(())
    } else {
        bail!("guest agent {op} failed: {:?}", resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vsock_uds_path() {
        assert_eq!(vsock_uds_path("/var/lib/octolab/abc"), "/var/lib/octolab/abc/firecracker.vsock");
    }
}
