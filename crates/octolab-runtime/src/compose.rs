//! `ComposeRuntime`: the dev backend. Each lab gets a docker compose
//! project whose name and network names are derived purely from the lab
//! id, so cleanup can refuse to touch anything that doesn't match the
//! strict pattern.

use std::process::{Command, Output};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use octolab_core::lab::{Lab, RuntimeKind};
use octolab_core::naming;
use tracing::{info, warn};

use crate::runtime::{DoctorReport, Runtime, RuntimeStatus, Severity, SmokePhase, SmokeReport};

pub struct ComposeRuntime;

impl ComposeRuntime {
    pub fn new() -> Self {
        ComposeRuntime
    }
}

impl Default for ComposeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn docker_compose(project: &str, args: &[&str]) -> Result<Output> {
    Command::new("docker")
        .arg("compose")
        .arg("-p")
        .arg(project)
        .args(args)
        .output()
        .with_context(|| format!("failed to spawn docker compose {}", args.join(" ")))
}

fn labeled_containers(lab_id: &str) -> Result<Vec<String>> {
    let out = Command::new("docker")
        .args([
            "ps",
            "-a",
            "--filter",
            &format!("label=octolab.lab_id={lab_id}"),
            "--format",
            "{{.Names}}",
        ])
        .output()
        .context("failed to list containers")?;
    Ok(String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

fn matching_networks(lab_id: &str) -> Result<Vec<String>> {
    let out = Command::new("docker")
        .args(["network", "ls", "--format", "{{.Name}}"])
        .output()
        .context("failed to list networks")?;
    Ok(String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(|s| s.trim().to_string())
        .filter(|name| naming::is_valid_compose_network_name(name) && name.contains(lab_id))
        .collect())
}

#[async_trait]
impl Runtime for ComposeRuntime {
    fn name(&self) -> RuntimeKind {
        RuntimeKind::Compose
    }

    async fn doctor(&self) -> DoctorReport {
        let mut report = DoctorReport::default();
        match Command::new("docker").arg("version").output() {
            Ok(out) if out.status.success() => {
                report.push("docker daemon", true, Severity::Info, "reachable");
            }
            Ok(out) => report.push_with_hint(
                "docker daemon",
                false,
                Severity::Fatal,
                String::from_utf8_lossy(&out.stderr).trim(),
                "start the docker daemon",
            ),
            Err(e) => {
                report.push_with_hint(
                    "docker daemon",
                    false,
                    Severity::Fatal,
                    e.to_string(),
                    "install docker",
                );
            }
        }
        report
    }

    async fn smoke(&self) -> Result<SmokeReport> {
        let start = Instant::now();
        let out = Command::new("docker")
            .args(["run", "--rm", "hello-world"])
            .output()
            .context("failed to run smoke container")?;
        let ok = out.status.success();
        Ok(SmokeReport {
            ok,
            phases: vec![SmokePhase {
                name: "run hello-world".into(),
                ok,
                duration_ms: start.elapsed().as_millis() as u64,
            }],
        })
    }

    async fn provision_lab(&self, lab: &mut Lab) -> Result<()> {
        let project = naming::compose_project_name(lab.id);
        info!(lab_id = %lab.id, project = %project, "provisioning compose lab");

        let out = docker_compose(&project, &["up", "-d", "--wait"])?;
        if !out.status.success() {
            bail!(
                "compose up failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }

        lab.runtime_meta.compose_project = Some(project);
        lab.connection_url = Some(format!("http://127.0.0.1:6080/?lab={}", lab.id));
        Ok(())
    }

    async fn destroy_lab(&self, lab: &Lab) -> Result<()> {
        let project = lab
            .runtime_meta
            .compose_project
            .clone()
            .unwrap_or_else(|| naming::compose_project_name(lab.id));

        let out = docker_compose(&project, &["down", "-v", "--remove-orphans"])?;
        if !out.status.success() {
            warn!(
                lab_id = %lab.id,
                stderr = %String::from_utf8_lossy(&out.stderr),
                "compose down reported failure, verifying residue"
            );
        }

        let lab_id_str = lab.id.to_string();
        let remaining_containers = labeled_containers(&lab_id_str)?;
        let remaining_networks = matching_networks(&lab_id_str)?;
        if !remaining_containers.is_empty() || !remaining_networks.is_empty() {
            bail!(
                "compose teardown left residue: {} containers, {} networks",
                remaining_containers.len(),
                remaining_networks.len()
            );
        }
        Ok(())
    }

    async fn inspect_lab(&self, lab: &Lab) -> Result<RuntimeStatus> {
        let lab_id_str = lab.id.to_string();
        let containers = labeled_containers(&lab_id_str)?;
        Ok(RuntimeStatus {
            healthy: !containers.is_empty(),
            detail: format!("{} labeled containers", containers.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_runtime_name() {
        assert_eq!(ComposeRuntime::new().name(), RuntimeKind::Compose);
    }
}
