//! Launching the `firecracker` process, optionally under `jailer`.
//! In production the jailer is mandatory; `dev.unsafe_allow_no_jailer`
//! disables it only on non-production builds (the doctor refuses the
//! flag otherwise).

use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};

const JAILER_PATH: &str = "/usr/sbin/jailer";
const FIRECRACKER_PATH: &str = "/usr/bin/firecracker";

pub fn jailer_available() -> bool {
    Path::new(JAILER_PATH).exists()
}

/// Derive a uid/gid for the jail from the lab's hex prefix. Collisions are
/// astronomically unlikely (10 hex chars of a v4 UUID) and harmless if
/// they occur since jails are chroot-isolated per lab id, not per uid.
fn jail_uid(hex_prefix: &str) -> u32 {
    let truncated = &hex_prefix[..hex_prefix.len().min(8)];
    10_000 + (u32::from_str_radix(truncated, 16).unwrap_or(0) % 50_000)
}

/// Launch firecracker under jailer with a chroot at `<state_dir>/jail`.
/// Returns (pid, api_socket_path).
pub fn launch_jailed(state_dir: &Path, lab_id_hex: &str, log_path: &Path) -> Result<(u32, String)> {
    if !jailer_available() {
        bail!("jailer binary not found at {JAILER_PATH}");
    }
    let uid = jail_uid(lab_id_hex);
    let jail_base = state_dir.join("jail");
    std::fs::create_dir_all(&jail_base)
        .with_context(|| format!("failed to create jail base {}", jail_base.display()))?;

    let child = Command::new(JAILER_PATH)
        .args([
            "--id",
            lab_id_hex,
            "--exec-file",
            FIRECRACKER_PATH,
            "--uid",
            &uid.to_string(),
            "--gid",
            &uid.to_string(),
            "--chroot-base-dir",
        ])
        .arg(&jail_base)
        .args(["--", "--api-sock", "/firecracker.sock"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(
            std::fs::File::create(log_path)
                .with_context(|| format!("failed to create log file {}", log_path.display()))?,
        ))
        .spawn()
        .context("failed to spawn jailer")?;

    // We don't wait() on `child`: lifecycle is tracked via the PID file and
    // cmdline check in octolab-security, not via this handle.
    let pid = child.id();
    drop(child);

    let socket_path = jail_base
        .join(lab_id_hex)
        .join("root")
        .join("firecracker.sock")
        .to_string_lossy()
        .into_owned();
    Ok((pid, socket_path))
}

/// Launch firecracker directly, no jailer. Only permitted in development
/// builds (enforced by the caller's doctor check on
/// `dev.unsafe_allow_no_jailer`, not by this function).
pub fn launch_direct(state_dir: &Path, log_path: &Path) -> Result<(u32, String)> {
    let socket_path = state_dir.join("firecracker.sock");
    if socket_path.exists() {
        std::fs::remove_file(&socket_path).ok();
    }

    let child = Command::new(FIRECRACKER_PATH)
        .args(["--api-sock"])
        .arg(&socket_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(
            std::fs::File::create(log_path)
                .with_context(|| format!("failed to create log file {}", log_path.display()))?,
        ))
        .spawn()
        .context("failed to spawn firecracker")?;

    let pid = child.id();
    drop(child);
    Ok((pid, socket_path.to_string_lossy().into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jail_uid_deterministic() {
        assert_eq!(jail_uid("abcdef0123"), jail_uid("abcdef0123"));
    }

    #[test]
    fn test_jail_uid_in_unprivileged_range() {
        let uid = jail_uid("ffffffffff");
        assert!(uid >= 10_000);
        assert!(uid < 60_000);
    }
}
