//! Evidence directory layout (§6 "On-disk layout per lab"). The lab
//! service and teardown worker only need the path convention and the
//! terminal `evidence_state` a teardown outcome implies; collecting the
//! actual command log/timings is the guest agent's and the runtime's
//! concern during the lab's lifetime.

use uuid::Uuid;

/// Path to a firecracker lab's evidence directory, relative to its
/// per-lab state directory.
pub fn evidence_dir(lab_state_dir: &str, lab_id: Uuid) -> String {
    format!("{lab_state_dir}/{lab_id}/evidence")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evidence_dir_shape() {
        let id = Uuid::new_v4();
        let dir = evidence_dir("/var/lib/octolab/labs", id);
        assert!(dir.ends_with("/evidence"));
        assert!(dir.contains(&id.to_string()));
    }
}
