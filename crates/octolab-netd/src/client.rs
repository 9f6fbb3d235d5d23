//! Thin client for talking to a running `octolab-netd` over its UNIX socket.
//! Used by the runtime crate when provisioning/tearing down a lab's network.

use anyhow::{Result, bail};
use octolab_core::protocol::{CreateResult, DestroyResult, NetdRequest, send_request};
use uuid::Uuid;

pub fn ping(socket_path: &str) -> Result<()> {
    let resp = send_request(socket_path, &NetdRequest::Ping)?;
    if !resp.ok {
        bail!("netd ping failed: {:?}", resp.error);
    }
    Ok(())
}

pub fn create(socket_path: &str, lab_id: Uuid) -> Result<CreateResult> {
    let resp = send_request(socket_path, &NetdRequest::Create { lab_id })?;
    if !resp.ok {
        bail!("netd create failed: {:?}", resp.error);
    }
    let result = resp.result.ok_or_else(|| anyhow::anyhow!("netd create returned no result"))?;
    Ok(serde_json::from_value(result)?)
}

pub fn destroy(socket_path: &str, lab_id: Uuid) -> Result<DestroyResult> {
    let resp = send_request(socket_path, &NetdRequest::Destroy { lab_id })?;
    if !resp.ok {
        bail!("netd destroy failed: {:?}", resp.error);
    }
    let result = resp.result.ok_or_else(|| anyhow::anyhow!("netd destroy returned no result"))?;
    Ok(serde_json::from_value(result)?)
}
