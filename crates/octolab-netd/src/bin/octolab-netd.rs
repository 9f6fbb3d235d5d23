//! Entrypoint for the privileged network daemon. Run as root (or with
//! `CAP_NET_ADMIN`); listens on `OCTOLAB_NETD_SOCKET` (default
//! `octolab_core::protocol::NETD_SOCKET_PATH`) for lab bridge/TAP
//! create/destroy requests.

use anyhow::Result;
use octolab_core::protocol::NETD_SOCKET_PATH;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("octolab_netd=info,warn")
        }))
        .init();

    let socket_path =
        std::env::var("OCTOLAB_NETD_SOCKET").unwrap_or_else(|_| NETD_SOCKET_PATH.to_string());

    octolab_netd::server::serve(&socket_path).await
}
