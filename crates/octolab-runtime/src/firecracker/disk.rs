//! Per-lab rootfs overlay management. The base rootfs image is never
//! written to directly — each lab gets a copy-on-write overlay that is
//! discarded on teardown.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};

/// Create a qcow2-less copy-on-write overlay by making a sparse copy of
/// the base rootfs. (A real qcow2 backing-file overlay would need qemu-img;
/// Firecracker only speaks raw block devices, so the overlay here is a
/// reflink/sparse copy that is cheap on filesystems supporting it and a
/// full copy otherwise.)
pub fn create_overlay(base_rootfs: &Path, state_dir: &Path) -> Result<PathBuf> {
    let overlay_path = state_dir.join("rootfs.overlay.ext4");
    if overlay_path.exists() {
        return Ok(overlay_path);
    }

    let status = Command::new("cp")
        .args(["--reflink=auto"])
        .arg(base_rootfs)
        .arg(&overlay_path)
        .status()
        .with_context(|| format!("failed to spawn cp for overlay at {}", overlay_path.display()))?;
    if !status.success() {
        bail!("failed to create rootfs overlay at {}", overlay_path.display());
    }
    Ok(overlay_path)
}

pub fn remove_overlay(state_dir: &Path) -> Result<()> {
    let overlay_path = state_dir.join("rootfs.overlay.ext4");
    if overlay_path.exists() {
        std::fs::remove_file(&overlay_path)
            .with_context(|| format!("failed to remove overlay at {}", overlay_path.display()))?;
    }
    Ok(())
}

/// Create the per-lab state directory with mode 0700.
pub fn ensure_state_dir(state_dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("failed to create state dir {}", state_dir.display()))?;
    std::fs::set_permissions(state_dir, std::fs::Permissions::from_mode(0o700))
        .with_context(|| format!("failed to chmod state dir {}", state_dir.display()))?;
    Ok(())
}

pub fn remove_state_dir(state_dir: &Path) -> Result<()> {
    if state_dir.exists() {
        std::fs::remove_dir_all(state_dir)
            .with_context(|| format!("failed to remove state dir {}", state_dir.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_and_remove_state_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let state_dir = tmp.path().join("lab-state");
        ensure_state_dir(&state_dir).unwrap();
        assert!(state_dir.exists());
        remove_state_dir(&state_dir).unwrap();
        assert!(!state_dir.exists());
    }

    #[test]
    fn test_remove_state_dir_missing_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let state_dir = tmp.path().join("never-created");
        assert!(remove_state_dir(&state_dir).is_ok());
    }
}
