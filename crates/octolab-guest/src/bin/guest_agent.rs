//! `octolab-guest-agent`: the vsock server that runs as PID-adjacent
//! userspace inside each lab's microVM. Reads its boot token from the
//! kernel cmdline (`octolab.token=<hex>`, set by the host at launch) and
//! answers `ping`/`upload_project`/`compose_up`/`compose_down`/`status`
//! on vsock port 5000. Never opens an outbound connection itself.

use anyhow::{Context, Result};
use octolab_core::vsock_protocol::GUEST_AGENT_PORT;
use octolab_guest::agent::AgentState;
use octolab_security::boot_token::{self, BootToken};
use tracing::{error, info};

const PROJECT_DIR: &str = "/var/lib/octolab/project";
const CMDLINE_PATH: &str = "/proc/cmdline";

fn load_token() -> Result<BootToken> {
    let cmdline = std::fs::read_to_string(CMDLINE_PATH)
        .with_context(|| format!("failed to read {CMDLINE_PATH}"))?;
    let token = boot_token::parse_from_cmdline(&cmdline)?;
    Ok(BootToken::from_existing(token))
}

#[cfg(target_os = "linux")]
async fn run() -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_vsock::{VsockAddr, VsockListener, VMADDR_CID_ANY};

    let token = load_token()?;
    let state = std::sync::Arc::new(AgentState::new(token, PROJECT_DIR.into()));

    let mut listener = VsockListener::bind(VsockAddr::new(VMADDR_CID_ANY, GUEST_AGENT_PORT))
        .context("failed to bind vsock listener")?;
    info!(port = GUEST_AGENT_PORT, "guest agent listening");

    loop {
        let (mut stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "vsock accept failed");
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            loop {
                let mut len_buf = [0u8; 4];
                if stream.read_exact(&mut len_buf).await.is_err() {
                    return;
                }
                let len = u32::from_be_bytes(len_buf) as usize;
                let mut body = vec![0u8; len];
                if stream.read_exact(&mut body).await.is_err() {
                    return;
                }
                let req = match serde_json::from_slice(&body) {
                    Ok(req) => req,
                    Err(e) => {
                        error!(peer = %addr, error = %e, "failed to parse guest request");
                        return;
                    }
                };
                let resp = octolab_guest::agent::handle_request(&state, &req);
                let resp_bytes = match serde_json::to_vec(&resp) {
                    Ok(b) => b,
                    Err(e) => {
                        error!(error = %e, "failed to serialize guest response");
                        return;
                    }
                };
                if stream.write_all(&(resp_bytes.len() as u32).to_be_bytes()).await.is_err() {
                    return;
                }
                if stream.write_all(&resp_bytes).await.is_err() {
                    return;
                }
                if stream.flush().await.is_err() {
                    return;
                }
            }
        });
    }
}

#[cfg(not(target_os = "linux"))]
async fn run() -> Result<()> {
    anyhow::bail!("octolab-guest-agent only runs inside a Linux microVM")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().json().with_target(true).init();
    run().await
}
