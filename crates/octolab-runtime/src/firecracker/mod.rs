pub mod api;
pub mod disk;
pub mod launch;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use octolab_core::lab::{Lab, RuntimeKind};
use octolab_core::naming;
use octolab_core::vsock_protocol::GUEST_AGENT_PORT;
use octolab_security::boot_token::BootToken;
use octolab_security::pid_guard;
use tracing::{error, info, warn};

use crate::runtime::{DoctorReport, Runtime, RuntimeStatus, Severity, SmokePhase, SmokeReport};
use crate::vsock_client;

pub struct FirecrackerConfig {
    pub kernel_path: PathBuf,
    pub rootfs_base_path: PathBuf,
    pub state_dir: PathBuf,
    pub vcpu_count: u32,
    pub mem_mib: u32,
    pub boot_timeout_secs: u64,
    pub vsock_port: u32,
    pub netd_socket_path: String,
    pub unsafe_allow_no_jailer: bool,
}

pub struct FirecrackerRuntime {
    config: FirecrackerConfig,
}

impl FirecrackerRuntime {
    pub fn new(config: FirecrackerConfig) -> Self {
        FirecrackerRuntime { config }
    }

    fn lab_state_dir(&self, lab: &Lab) -> PathBuf {
        self.config.state_dir.join(lab.id.to_string())
    }

    fn boot_token_path(&self, state_dir: &Path) -> PathBuf {
        state_dir.join("boot_token")
    }
}

#[async_trait]
impl Runtime for FirecrackerRuntime {
    fn name(&self) -> RuntimeKind {
        RuntimeKind::Firecracker
    }

    async fn doctor(&self) -> DoctorReport {
        let mut report = DoctorReport::default();

        if self.config.kernel_path.exists() {
            report.push("kernel image", true, Severity::Info, self.config.kernel_path.display().to_string());
        } else {
            report.push_with_hint(
                "kernel image",
                false,
                Severity::Fatal,
                format!("not found: {}", self.config.kernel_path.display()),
                "set microvm.kernel_path to a valid vmlinux image",
            );
        }

        if self.config.rootfs_base_path.exists() {
            report.push("base rootfs", true, Severity::Info, self.config.rootfs_base_path.display().to_string());
        } else {
            report.push_with_hint(
                "base rootfs",
                false,
                Severity::Fatal,
                format!("not found: {}", self.config.rootfs_base_path.display()),
                "set microvm.rootfs_base_path to a valid ext4 image",
            );
        }

        for dev in ["/dev/kvm", "/dev/vhost-vsock"] {
            if Path::new(dev).exists() {
                report.push(dev, true, Severity::Info, "present");
            } else {
                report.push_with_hint(dev, false, Severity::Fatal, "missing", format!("ensure {dev} is available to this host"));
            }
        }

        if launch::jailer_available() {
            report.push("jailer", true, Severity::Info, "available");
        } else if self.config.unsafe_allow_no_jailer {
            report.push_with_hint(
                "jailer",
                false,
                Severity::Warn,
                "jailer not found, dev.unsafe_allow_no_jailer is set",
                "do not set this flag in production",
            );
        } else {
            report.push_with_hint(
                "jailer",
                false,
                Severity::Fatal,
                "jailer binary not found",
                "install jailer or set dev.unsafe_allow_no_jailer in a development build",
            );
        }

        match octolab_netd::client::ping(&self.config.netd_socket_path) {
            Ok(()) => report.push("netd", true, Severity::Info, "reachable"),
            Err(e) => report.push_with_hint(
                "netd",
                false,
                Severity::Fatal,
                e.to_string(),
                "start octolab-netd and verify its socket path",
            ),
        }

        report
    }

    async fn smoke(&self) -> Result<SmokeReport> {
        let lab_id = uuid::Uuid::new_v4();
        let mut phases = Vec::new();

        let start = Instant::now();
        let netd_result = octolab_netd::client::create(&self.config.netd_socket_path, lab_id);
        phases.push(SmokePhase {
            name: "netd create".into(),
            ok: netd_result.is_ok(),
            duration_ms: start.elapsed().as_millis() as u64,
        });

        let start = Instant::now();
        let destroy_result = octolab_netd::client::destroy(&self.config.netd_socket_path, lab_id);
        phases.push(SmokePhase {
            name: "netd destroy".into(),
            ok: destroy_result.is_ok(),
            duration_ms: start.elapsed().as_millis() as u64,
        });

        let ok = phases.iter().all(|p| p.ok);
        Ok(SmokeReport { ok, phases })
    }

    async fn provision_lab(&self, lab: &mut Lab) -> Result<()> {
        let state_dir = self.lab_state_dir(lab);
        disk::ensure_state_dir(&state_dir)?;
        lab.runtime_meta.state_dir_basename = Some(lab.id.to_string());

        let net = match octolab_netd::client::create(&self.config.netd_socket_path, lab.id) {
            Ok(net) => net,
            Err(e) => {
                disk::remove_state_dir(&state_dir).ok();
                return Err(e.context("netd create failed during provisioning"));
            }
        };
        info!(lab_id = %lab.id, bridge = %net.bridge, tap = %net.tap, "netd network ready");

        let overlay_result = disk::create_overlay(&self.config.rootfs_base_path, &state_dir);
        let overlay = match overlay_result {
            Ok(path) => path,
            Err(e) => {
                self.rollback_net(lab.id);
                disk::remove_state_dir(&state_dir).ok();
                return Err(e);
            }
        };

        let token = BootToken::generate();
        std::fs::write(self.boot_token_path(&state_dir), token.as_str())
            .context("failed to persist boot token")?;

        let log_path = state_dir.join("firecracker.log");
        let launch_result = if self.config.unsafe_allow_no_jailer {
            launch::launch_direct(&state_dir, &log_path)
        } else {
            launch::launch_jailed(&state_dir, &naming::hex_prefix(lab.id), &log_path)
        };

        let (pid, _socket_path) = match launch_result {
            Ok(v) => v,
            Err(e) => {
                self.rollback_net(lab.id);
                disk::remove_state_dir(&state_dir).ok();
                return Err(e.context("firecracker launch failed"));
            }
        };
        std::fs::write(state_dir.join("pid"), pid.to_string()).context("failed to persist pid file")?;

        lab.runtime_meta.firecracker_pid = Some(pid);
        let _ = overlay;

        let boot_deadline = Instant::now() + Duration::from_secs(self.config.boot_timeout_secs);
        let mut last_err = None;
        loop {
            match vsock_client::ping(&state_dir.to_string_lossy(), self.config.vsock_port, token.as_str()) {
                Ok(true) => {
                    last_err = None;
                    break;
                }
                Ok(false) => last_err = Some(anyhow::anyhow!("guest agent ping returned not-ok")),
                Err(e) => last_err = Some(e),
            }
            if Instant::now() >= boot_deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        if let Some(e) = last_err {
            self.teardown_partial(lab, &state_dir, pid);
            return Err(e.context("guest agent did not become reachable before boot_timeout"));
        }

        // Upload, boot compose inside the guest.
        let bundle = crate::bundle::load_recipe_bundle_base64(lab)?;
        vsock_client::upload_project(&state_dir.to_string_lossy(), self.config.vsock_port, token.as_str(), bundle)
            .map_err(|e| {
                self.teardown_partial(lab, &state_dir, pid);
                e
            })?;
        vsock_client::compose_up(&state_dir.to_string_lossy(), self.config.vsock_port, token.as_str())
            .map_err(|e| {
                self.teardown_partial(lab, &state_dir, pid);
                e
            })?;

        lab.connection_url = Some(format!("http://127.0.0.1:6080/?lab={}", lab.id));
        Ok(())
    }

    async fn destroy_lab(&self, lab: &Lab) -> Result<()> {
        let state_dir = self.lab_state_dir(lab);

        if let Ok(token) = std::fs::read_to_string(self.boot_token_path(&state_dir)) {
            let _ = vsock_client::compose_down(&state_dir.to_string_lossy(), self.config.vsock_port, token.trim());
        }

        if let Some(pid) = lab.runtime_meta.firecracker_pid {
            let pid_path = state_dir.join("pid");
            match pid_guard::verify_before_signal(&pid_path, &lab.id.to_string()) {
                Ok(verified_pid) => {
                    signal_terminate(verified_pid);
                }
                Err(e) => {
                    warn!(lab_id = %lab.id, pid, error = %e, "refusing to signal firecracker pid, cmdline mismatch");
                }
            }
        }

        self.rollback_net(lab.id);
        disk::remove_overlay(&state_dir)?;
        disk::remove_state_dir(&state_dir)?;
        Ok(())
    }

    async fn inspect_lab(&self, lab: &Lab) -> Result<RuntimeStatus> {
        let state_dir = self.lab_state_dir(lab);
        let token = std::fs::read_to_string(self.boot_token_path(&state_dir)).unwrap_or_default();
        match vsock_client::status(&state_dir.to_string_lossy(), self.config.vsock_port, token.trim()) {
            Ok(resp) => Ok(RuntimeStatus {
                healthy: resp.is_ok(),
                detail: "guest agent responded".into(),
            }),
            Err(e) => Ok(RuntimeStatus {
                healthy: false,
                detail: e.to_string(),
            }),
        }
    }
}

impl FirecrackerRuntime {
    fn rollback_net(&self, lab_id: uuid::Uuid) {
        if let Err(e) = octolab_netd::client::destroy(&self.config.netd_socket_path, lab_id) {
            error!(lab_id = %lab_id, error = %e, "rollback: netd destroy failed");
        }
    }

    fn teardown_partial(&self, lab: &Lab, state_dir: &Path, pid: u32) {
        let pid_path = state_dir.join("pid");
        if let Ok(verified_pid) = pid_guard::verify_before_signal(&pid_path, &lab.id.to_string()) {
            signal_terminate(verified_pid);
        } else {
            signal_terminate(pid);
        }
        self.rollback_net(lab.id);
        disk::remove_state_dir(state_dir).ok();
    }
}

#[cfg(target_os = "linux")]
fn signal_terminate(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

#[cfg(not(target_os = "linux"))]
fn signal_terminate(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> FirecrackerConfig {
        FirecrackerConfig {
            kernel_path: PathBuf::from("/nonexistent/vmlinux"),
            rootfs_base_path: PathBuf::from("/nonexistent/rootfs.ext4"),
            state_dir: PathBuf::from("/tmp/octolab-test-state"),
            vcpu_count: 2,
            mem_mib: 1024,
            boot_timeout_secs: 30,
            vsock_port: GUEST_AGENT_PORT,
            netd_socket_path: "/tmp/nonexistent-netd.sock".into(),
            unsafe_allow_no_jailer: false,
        }
    }

    #[tokio::test]
    async fn test_doctor_reports_fatal_on_missing_kernel() {
        let runtime = FirecrackerRuntime::new(sample_config());
        let report = runtime.doctor().await;
        assert!(!report.ok());
    }

    #[test]
    fn test_name_is_firecracker() {
        let runtime = FirecrackerRuntime::new(sample_config());
        assert_eq!(runtime.name(), RuntimeKind::Firecracker);
    }
}
