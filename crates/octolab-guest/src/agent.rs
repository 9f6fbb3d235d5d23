//! Guest-side request handling for the vsock protocol: bundle extraction,
//! compose lifecycle, and the boot-token check every operation is gated
//! on. Kept free of the vsock transport itself so it can be driven
//! directly in tests.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result};
use base64::Engine;
use flate2::read::GzDecoder;
use octolab_core::vsock_protocol::{ContainerState, GuestErrorCode, GuestRequest, GuestResponse, MAX_BUNDLE_BYTES};
use octolab_security::boot_token::BootToken;
use tar::Archive;
use tracing::{info, warn};

/// Everything a request handler needs: the token to authenticate against
/// and the directory `docker compose` operates out of.
pub struct AgentState {
    pub token: BootToken,
    pub project_dir: PathBuf,
}

impl AgentState {
    pub fn new(token: BootToken, project_dir: PathBuf) -> Self {
        AgentState { token, project_dir }
    }
}

/// Handle one decoded request. Every error path returns a
/// `GuestResponse::err`; this never panics on attacker-controlled input.
pub fn handle_request(state: &AgentState, req: &GuestRequest) -> GuestResponse {
    if !state.token.matches(req.token()) {
        return GuestResponse::err(GuestErrorCode::Unauthenticated, "bad token");
    }

    match req {
        GuestRequest::Ping { .. } => GuestResponse::pong(),
        GuestRequest::UploadProject { bundle, .. } => match extract_bundle(&state.project_dir, bundle) {
            Ok(()) => GuestResponse::ok(serde_json::json!({})),
            Err(e) => {
                warn!(error = %e, "upload_project failed");
                GuestResponse::err(GuestErrorCode::InvalidArgument, e.to_string())
            }
        },
        GuestRequest::ComposeUp { .. } => match compose_up(&state.project_dir) {
            Ok(containers) => GuestResponse::ok(containers),
            Err(e) => {
                warn!(error = %e, "compose_up failed");
                GuestResponse::err(GuestErrorCode::Internal, e.to_string())
            }
        },
        GuestRequest::ComposeDown { .. } => match compose_down(&state.project_dir) {
            Ok(()) => GuestResponse::ok(serde_json::json!({})),
            Err(e) => {
                warn!(error = %e, "compose_down failed");
                GuestResponse::err(GuestErrorCode::Internal, e.to_string())
            }
        },
        GuestRequest::Status { .. } => match compose_status(&state.project_dir) {
            Ok(containers) => GuestResponse::ok(containers),
            Err(e) => {
                warn!(error = %e, "status failed");
                GuestResponse::err(GuestErrorCode::Internal, e.to_string())
            }
        },
    }
}

/// Extract a base64-encoded tar.gz project bundle into `project_dir`,
/// replacing any previous contents. Two renames (previous -> retired,
/// staging -> live) keep `project_dir` always pointing at a complete
/// tree, never a half-unpacked one.
fn extract_bundle(project_dir: &Path, bundle_base64: &str) -> Result<()> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(bundle_base64)
        .context("bundle is not valid base64")?;
    if bytes.len() > MAX_BUNDLE_BYTES {
        anyhow::bail!(
            "bundle exceeds max size of {MAX_BUNDLE_BYTES} bytes ({} given)",
            bytes.len()
        );
    }

    let parent = project_dir.parent().unwrap_or_else(|| Path::new("."));
    let name = project_dir.file_name().and_then(|n| n.to_str()).unwrap_or("project");
    let staging = parent.join(format!(".{name}.staging"));
    let retired = parent.join(format!(".{name}.retired"));

    for scratch in [&staging, &retired] {
        if scratch.exists() {
            std::fs::remove_dir_all(scratch).context("failed to clear stale scratch directory")?;
        }
    }
    std::fs::create_dir_all(&staging).context("failed to create staging directory")?;

    Archive::new(GzDecoder::new(bytes.as_slice()))
        .unpack(&staging)
        .context("failed to unpack project bundle")?;

    if project_dir.exists() {
        std::fs::rename(project_dir, &retired).context("failed to retire previous project directory")?;
    }
    std::fs::rename(&staging, project_dir).context("failed to move staged project into place")?;
    let _ = std::fs::remove_dir_all(&retired);

    info!(dir = %project_dir.display(), "project bundle extracted");
    Ok(())
}

fn docker_compose(project_dir: &Path, args: &[&str]) -> Result<Output> {
    Command::new("docker")
        .arg("compose")
        .current_dir(project_dir)
        .args(args)
        .output()
        .with_context(|| format!("failed to spawn docker compose {}", args.join(" ")))
}

fn compose_up(project_dir: &Path) -> Result<Vec<ContainerState>> {
    let out = docker_compose(project_dir, &["up", "-d"])?;
    if !out.status.success() {
        anyhow::bail!("docker compose up failed: {}", String::from_utf8_lossy(&out.stderr).trim());
    }
    compose_status(project_dir)
}

fn compose_down(project_dir: &Path) -> Result<()> {
    let out = docker_compose(project_dir, &["down", "-v"])?;
    if !out.status.success() {
        anyhow::bail!("docker compose down failed: {}", String::from_utf8_lossy(&out.stderr).trim());
    }
    Ok(())
}

fn compose_status(project_dir: &Path) -> Result<Vec<ContainerState>> {
    let out = docker_compose(project_dir, &["ps", "--format", "json"])?;
    if !out.status.success() {
        anyhow::bail!("docker compose ps failed: {}", String::from_utf8_lossy(&out.stderr).trim());
    }

    let mut containers = Vec::new();
    for line in String::from_utf8_lossy(&out.stdout).lines().filter(|l| !l.trim().is_empty()) {
        let value: serde_json::Value =
            serde_json::from_str(line).with_context(|| format!("failed to parse docker compose ps line: {line}"))?;
        containers.push(ContainerState {
            name: value.get("Name").and_then(|v| v.as_str()).unwrap_or("?").to_string(),
            state: value.get("State").and_then(|v| v.as_str()).unwrap_or("unknown").to_string(),
        });
    }
    Ok(containers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn make_bundle(files: &[(&str, &str)]) -> String {
        let mut tar_bytes = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut tar_bytes);
            for (name, contents) in files {
                let mut header = tar::Header::new_gnu();
                header.set_size(contents.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, name, contents.as_bytes()).unwrap();
            }
            builder.finish().unwrap();
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        let gz_bytes = encoder.finish().unwrap();
        base64::engine::general_purpose::STANDARD.encode(gz_bytes)
    }

    fn sample_state(project_dir: PathBuf) -> (AgentState, String) {
        let token = BootToken::generate();
        let presented = token.as_str().to_string();
        (AgentState::new(token, project_dir), presented)
    }

    #[test]
    fn test_rejects_bad_token() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = sample_state(dir.path().join("project"));
        let resp = handle_request(&state, &GuestRequest::Ping { token: "wrong".into() });
        assert!(!resp.is_ok());
    }

    #[test]
    fn test_ping_with_correct_token() {
        let dir = tempfile::tempdir().unwrap();
        let (state, token) = sample_state(dir.path().join("project"));
        let resp = handle_request(&state, &GuestRequest::Ping { token });
        assert!(resp.is_ok());
    }

    #[test]
    fn test_upload_project_extracts_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let project_dir = dir.path().join("project");
        let (state, token) = sample_state(project_dir.clone());

        let bundle = make_bundle(&[("compose.yaml", "services: {}")]);
        let resp = handle_request(
            &state,
            &GuestRequest::UploadProject { token, bundle },
        );
        assert!(resp.is_ok());
        assert!(project_dir.join("compose.yaml").exists());
    }

    #[test]
    fn test_upload_project_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let project_dir = dir.path().join("project");
        let (state, token) = sample_state(project_dir.clone());

        let first = make_bundle(&[("a.txt", "first")]);
        handle_request(&state, &GuestRequest::UploadProject { token: token.clone(), bundle: first });
        assert!(project_dir.join("a.txt").exists());

        let second = make_bundle(&[("b.txt", "second")]);
        let resp = handle_request(&state, &GuestRequest::UploadProject { token, bundle: second });
        assert!(resp.is_ok());
        assert!(!project_dir.join("a.txt").exists());
        assert!(project_dir.join("b.txt").exists());
    }

    #[test]
    fn test_upload_project_rejects_oversized_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let project_dir = dir.path().join("project");
        let (state, token) = sample_state(project_dir);

        let oversized = base64::engine::general_purpose::STANDARD.encode(vec![0u8; MAX_BUNDLE_BYTES + 1]);
        let resp = handle_request(&state, &GuestRequest::UploadProject { token, bundle: oversized });
        assert!(!resp.is_ok());
    }

    #[test]
    fn test_upload_project_rejects_invalid_base64() {
        let dir = tempfile::tempdir().unwrap();
        let project_dir = dir.path().join("project");
        let (state, token) = sample_state(project_dir);

        let resp = handle_request(
            &state,
            &GuestRequest::UploadProject { token, bundle: "not-base64!!".to_string() },
        );
        assert!(!resp.is_ok());
    }
}
