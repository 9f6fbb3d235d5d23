//! The netd accept loop. Mirrors the host agent's daemon shape: bind,
//! chmod, accept, dispatch one blocking request per connection. The
//! protocol helpers in `octolab_core::protocol` are synchronous (std
//! `UnixStream`), so each connection's read-execute-write sequence runs
//! on a blocking task rather than forcing the protocol layer onto tokio.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;

use anyhow::{Context, Result};
use octolab_core::protocol::{
    CreateResult, DestroyResult, NetdErrorCode, NetdRequest, NetdResponse, read_request,
    write_response,
};
use tokio::net::UnixListener;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bridge;

/// Bind the netd socket, set group ownership expectations (mode 0660 —
/// actual group ownership is whatever the daemon's process runs as) and
/// accept connections until the process is asked to stop.
pub async fn serve(socket_path: &str) -> Result<()> {
    let path = Path::new(socket_path);
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("failed to remove stale socket {socket_path}"))?;
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create socket directory {}", parent.display()))?;
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("failed to bind netd socket at {socket_path}"))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o660))
        .with_context(|| format!("failed to chmod netd socket at {socket_path}"))?;

    info!(socket = %socket_path, "octolab-netd listening");

    loop {
        let (stream, _addr) = listener.accept().await.context("accept failed")?;
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream).await {
                error!(error = %e, "netd connection handling failed");
            }
        });
    }
}

async fn handle_connection(stream: tokio::net::UnixStream) -> Result<()> {
    let std_stream: StdUnixStream = stream.into_std()?;
    tokio::task::spawn_blocking(move || {
        let request = match read_request(&std_stream) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "failed to read netd request");
                let resp = NetdResponse::err(NetdErrorCode::InvalidArgument, e.to_string());
                return write_response(&std_stream, &resp);
            }
        };
        let response = execute(request);
        write_response(&std_stream, &response)
    })
    .await
    .context("netd connection task panicked")?
}

/// Dispatch a single request. Every arm validates its arguments before
/// doing anything with side effects.
fn execute(request: NetdRequest) -> NetdResponse {
    match request {
        NetdRequest::Ping => NetdResponse::ok_empty(),
        NetdRequest::Create { lab_id } => execute_create(lab_id),
        NetdRequest::Destroy { lab_id } => execute_destroy(lab_id),
    }
}

fn execute_create(lab_id: Uuid) -> NetdResponse {
    if !is_valid_lab_id(lab_id) {
        return NetdResponse::err(NetdErrorCode::InvalidArgument, "invalid lab_id");
    }
    match bridge::create(lab_id) {
        Ok(created) => NetdResponse::ok(CreateResult {
            bridge: created.bridge,
            tap: created.tap,
        }),
        Err(e) => {
            error!(lab_id = %lab_id, error = %e, "netd create failed");
            NetdResponse::err(NetdErrorCode::Internal, format!("create failed: {e}"))
        }
    }
}

fn execute_destroy(lab_id: Uuid) -> NetdResponse {
    if !is_valid_lab_id(lab_id) {
        return NetdResponse::err(NetdErrorCode::InvalidArgument, "invalid lab_id");
    }
    match bridge::destroy(lab_id) {
        Ok(destroyed) => NetdResponse::ok(DestroyResult {
            bridge_deleted: destroyed.bridge_deleted,
            tap_deleted: destroyed.tap_deleted,
        }),
        Err(e) => {
            error!(lab_id = %lab_id, error = %e, "netd destroy failed");
            NetdResponse::err(NetdErrorCode::Internal, format!("destroy failed: {e}"))
        }
    }
}

/// A nil UUID never names a real lab; reject it up front rather than
/// deriving a bridge/tap name from it.
fn is_valid_lab_id(lab_id: Uuid) -> bool {
    !lab_id.is_nil()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_ping() {
        let resp = execute(NetdRequest::Ping);
        assert!(resp.ok);
    }

    #[test]
    fn test_execute_create_rejects_nil_lab_id() {
        let resp = execute(NetdRequest::Create { lab_id: Uuid::nil() });
        assert!(!resp.ok);
        assert_eq!(resp.error.unwrap().code, NetdErrorCode::InvalidArgument);
    }

    #[test]
    fn test_execute_destroy_rejects_nil_lab_id() {
        let resp = execute(NetdRequest::Destroy { lab_id: Uuid::nil() });
        assert!(!resp.ok);
        assert_eq!(resp.error.unwrap().code, NetdErrorCode::InvalidArgument);
    }

    #[test]
    fn test_is_valid_lab_id() {
        assert!(is_valid_lab_id(Uuid::new_v4()));
        assert!(!is_valid_lab_id(Uuid::nil()));
    }
}
