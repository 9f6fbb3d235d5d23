//! Process-wide configuration, assembled from environment variables at
//! startup. Follows the init order config -> doctor -> runtime selector
//! -> teardown worker -> HTTP server; nothing downstream re-reads the
//! environment directly.

use crate::lab::RuntimeKind;

/// Check if running in production mode (`OCTOLAB_PRODUCTION=1`).
pub fn is_production_mode() -> bool {
    std::env::var("OCTOLAB_PRODUCTION")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct MicrovmConfig {
    pub kernel_path: String,
    pub rootfs_base_path: String,
    pub state_dir: String,
    pub vcpu_count: u32,
    pub mem_mib: u32,
    pub boot_timeout_secs: u64,
    pub vsock_port: u32,
}

#[derive(Debug, Clone)]
pub struct TeardownWorkerConfig {
    pub enabled: bool,
    pub interval_seconds: f64,
    pub batch_size: u32,
    pub startup_tick: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub runtime_default: RuntimeKind,
    pub runtime_override: Option<RuntimeKind>,
    pub microvm: MicrovmConfig,
    pub dev_unsafe_allow_no_jailer: bool,
    pub teardown_worker: TeardownWorkerConfig,
    pub admin_emails: Vec<String>,
    pub netd_socket_path: String,
    pub database_url: String,
}

impl Config {
    /// Load configuration from the environment, applying the documented
    /// defaults for anything unset.
    pub fn from_env() -> anyhow::Result<Self> {
        let runtime_default = match env_or("OCTOLAB_RUNTIME_DEFAULT", "compose").as_str() {
            "compose" => RuntimeKind::Compose,
            "firecracker" => RuntimeKind::Firecracker,
            other => anyhow::bail!("unknown runtime.default: {other}"),
        };
        let runtime_override = match std::env::var("OCTOLAB_RUNTIME_OVERRIDE") {
            Ok(v) if v == "compose" => Some(RuntimeKind::Compose),
            Ok(v) if v == "firecracker" => Some(RuntimeKind::Firecracker),
            Ok(v) if v.is_empty() => None,
            Ok(other) => anyhow::bail!("unknown runtime.override: {other}"),
            Err(_) => None,
        };

        let dev_unsafe_allow_no_jailer = env_parse_or("OCTOLAB_DEV_UNSAFE_ALLOW_NO_JAILER", false);
        if dev_unsafe_allow_no_jailer && is_production_mode() {
            anyhow::bail!(
                "dev.unsafe_allow_no_jailer is refused when OCTOLAB_PRODUCTION is set"
            );
        }

        let admin_emails = env_or("OCTOLAB_ADMIN_EMAILS", "")
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            runtime_default,
            runtime_override,
            microvm: MicrovmConfig {
                kernel_path: env_or("OCTOLAB_MICROVM_KERNEL_PATH", "/var/lib/octolab/vmlinux"),
                rootfs_base_path: env_or(
                    "OCTOLAB_MICROVM_ROOTFS_BASE_PATH",
                    "/var/lib/octolab/rootfs.ext4",
                ),
                state_dir: env_or("OCTOLAB_MICROVM_STATE_DIR", "/var/lib/octolab/labs"),
                vcpu_count: env_parse_or("OCTOLAB_MICROVM_VCPU_COUNT", 2),
                mem_mib: env_parse_or("OCTOLAB_MICROVM_MEM_MIB", 1024),
                boot_timeout_secs: env_parse_or("OCTOLAB_MICROVM_BOOT_TIMEOUT_SECS", 30),
                vsock_port: env_parse_or("OCTOLAB_MICROVM_VSOCK_PORT", 5000),
            },
            dev_unsafe_allow_no_jailer,
            teardown_worker: TeardownWorkerConfig {
                enabled: env_parse_or("OCTOLAB_TEARDOWN_WORKER_ENABLED", true),
                interval_seconds: env_parse_or("OCTOLAB_TEARDOWN_WORKER_INTERVAL_SECONDS", 5.0),
                batch_size: env_parse_or("OCTOLAB_TEARDOWN_WORKER_BATCH_SIZE", 3),
                startup_tick: env_parse_or("OCTOLAB_TEARDOWN_WORKER_STARTUP_TICK", true),
            },
            admin_emails,
            netd_socket_path: env_or(
                "OCTOLAB_NETD_SOCKET_PATH",
                crate::protocol::NETD_SOCKET_PATH,
            ),
            database_url: env_or(
                "OCTOLAB_DATABASE_URL",
                "postgres://octolab@localhost/octolab",
            ),
        })
    }

    pub fn effective_runtime(&self) -> RuntimeKind {
        self.runtime_override.unwrap_or(self.runtime_default)
    }

    pub fn is_admin(&self, email: &str) -> bool {
        self.admin_emails.contains(&email.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_runtime_prefers_override() {
        let mut cfg = sample_config();
        cfg.runtime_default = RuntimeKind::Compose;
        cfg.runtime_override = Some(RuntimeKind::Firecracker);
        assert_eq!(cfg.effective_runtime(), RuntimeKind::Firecracker);
    }

    #[test]
    fn test_effective_runtime_falls_back_to_default() {
        let mut cfg = sample_config();
        cfg.runtime_default = RuntimeKind::Compose;
        cfg.runtime_override = None;
        assert_eq!(cfg.effective_runtime(), RuntimeKind::Compose);
    }

    #[test]
    fn test_is_admin_case_insensitive() {
        let mut cfg = sample_config();
        cfg.admin_emails = vec!["ops@example.com".to_string()];
        assert!(cfg.is_admin("OPS@example.com"));
        assert!(!cfg.is_admin("other@example.com"));
    }

    fn sample_config() -> Config {
        Config {
            runtime_default: RuntimeKind::Compose,
            runtime_override: None,
            microvm: MicrovmConfig {
                kernel_path: "/k".into(),
                rootfs_base_path: "/r".into(),
                state_dir: "/s".into(),
                vcpu_count: 2,
                mem_mib: 1024,
                boot_timeout_secs: 30,
                vsock_port: 5000,
            },
            dev_unsafe_allow_no_jailer: false,
            teardown_worker: TeardownWorkerConfig {
                enabled: true,
                interval_seconds: 5.0,
                batch_size: 3,
                startup_tick: true,
            },
            admin_emails: vec![],
            netd_socket_path: "/run/octolab/microvm-netd.sock".into(),
            database_url: "postgres://x".into(),
        }
    }
}
