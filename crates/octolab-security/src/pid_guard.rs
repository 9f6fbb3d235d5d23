//! Verify a recorded PID still belongs to the process we launched before
//! signaling it. Firecracker PIDs are persisted to a per-lab `pid` file;
//! PIDs get reused by the kernel, so re-reading the file and checking
//! `/proc/<pid>/cmdline` immediately before sending a signal is what
//! keeps teardown from killing an unrelated process.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};

/// Read the PID recorded for a lab's firecracker process.
pub fn read_pid_file(pid_path: &Path) -> Result<u32> {
    let content = fs::read_to_string(pid_path)
        .with_context(|| format!("failed to read pid file {}", pid_path.display()))?;
    content
        .trim()
        .parse()
        .with_context(|| format!("invalid pid in {}", pid_path.display()))
}

/// True if `/proc/<pid>/cmdline` looks like a firecracker invocation for
/// `lab_id`. On non-Linux targets this always returns false (there is no
/// `/proc`), which is intentionally fail-closed: we refuse to sign a PID
/// we can't verify.
pub fn cmdline_matches_lab(pid: u32, lab_id: &str) -> Result<bool> {
    #[cfg(target_os = "linux")]
    {
        let path = format!("/proc/{pid}/cmdline");
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e).with_context(|| format!("failed to read {path}")),
        };
        let args: Vec<String> = raw
            .split(|b| *b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect();
        let is_firecracker = args
            .first()
            .map(|a| a.ends_with("firecracker") || a.ends_with("jailer"))
            .unwrap_or(false);
        let has_lab_id = args.iter().any(|a| a.contains(lab_id));
        Ok(is_firecracker && has_lab_id)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (pid, lab_id);
        Ok(false)
    }
}

/// Re-read the PID file and verify the cmdline before returning a PID
/// that is safe to signal. Call this immediately before SIGTERM/SIGKILL,
/// not at allocation time, since the process may have exited and its PID
/// been reused in the interim.
pub fn verify_before_signal(pid_path: &Path, lab_id: &str) -> Result<u32> {
    let pid = read_pid_file(pid_path)?;
    if !cmdline_matches_lab(pid, lab_id)? {
        bail!(
            "refusing to signal pid {pid}: cmdline does not match a firecracker process for lab {lab_id}"
        );
    }
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_pid_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "12345").unwrap();
        let pid = read_pid_file(f.path()).unwrap();
        assert_eq!(pid, 12345);
    }

    #[test]
    fn test_read_pid_file_invalid_content() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "not-a-pid").unwrap();
        assert!(read_pid_file(f.path()).is_err());
    }

    #[test]
    fn test_verify_before_signal_missing_process_fails() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        // PID 1 exists but will never have our lab id in its cmdline.
        writeln!(f, "1").unwrap();
        let result = verify_before_signal(f.path(), "definitely-not-present-lab-id");
        assert!(result.is_err());
    }
}
