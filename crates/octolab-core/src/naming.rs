//! Deterministic, client-proof names for the kernel network resources a lab owns.
//!
//! Names are derived only from the lab id: same id always yields the same
//! bridge/TAP pair, and no other input can influence them. This is what
//! makes netd's `create`/`destroy` idempotent and prevents cross-lab
//! interface collisions.

use uuid::Uuid;

/// Number of hex characters taken from the lab id (dashes stripped).
const NAME_HEX_LEN: usize = 10;

pub fn hex_prefix(lab_id: Uuid) -> String {
    lab_id.simple().to_string()[..NAME_HEX_LEN].to_string()
}

/// Bridge name for a lab: `obr<10hex>`, 13 chars, fits `IFNAMSIZ=15`.
pub fn bridge_name(lab_id: Uuid) -> String {
    format!("obr{}", hex_prefix(lab_id))
}

/// TAP name for a lab: `otp<10hex>`, 13 chars, fits `IFNAMSIZ=15`.
pub fn tap_name(lab_id: Uuid) -> String {
    format!("otp{}", hex_prefix(lab_id))
}

/// Docker compose project name for a lab (compose runtime).
pub fn compose_project_name(lab_id: Uuid) -> String {
    format!("octolab_{}", lab_id.simple())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeNetworkKind {
    LabNet,
    EgressNet,
}

impl ComposeNetworkKind {
    fn as_str(self) -> &'static str {
        match self {
            ComposeNetworkKind::LabNet => "lab_net",
            ComposeNetworkKind::EgressNet => "egress_net",
        }
    }
}

/// Network name for a lab: `octolab_<uuid>_(lab_net|egress_net)`. Compose
/// teardown refuses to touch anything that doesn't match this exact shape.
pub fn compose_network_name(lab_id: Uuid, kind: ComposeNetworkKind) -> String {
    format!("octolab_{}_{}", lab_id, kind.as_str())
}

/// Matches the strict compose network naming pattern.
pub fn is_valid_compose_network_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix("octolab_") else {
        return false;
    };
    let uuid_part = if let Some(stripped) = rest.strip_suffix("_lab_net") {
        stripped
    } else if let Some(stripped) = rest.strip_suffix("_egress_net") {
        stripped
    } else {
        return false;
    };
    Uuid::parse_str(uuid_part).is_ok()
}

/// The container label every compose-runtime container carries.
pub fn lab_id_label(lab_id: Uuid) -> String {
    format!("octolab.lab_id={lab_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_and_tap_name_shape() {
        let id = Uuid::new_v4();
        let bridge = bridge_name(id);
        let tap = tap_name(id);
        assert_eq!(bridge.len(), 13);
        assert_eq!(tap.len(), 13);
        assert!(bridge.starts_with("obr"));
        assert!(tap.starts_with("otp"));
    }

    #[test]
    fn test_names_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(bridge_name(id), bridge_name(id));
        assert_eq!(tap_name(id), tap_name(id));
    }

    #[test]
    fn test_names_match_regex_shape() {
        let id = Uuid::new_v4();
        let bridge = bridge_name(id);
        let tap = tap_name(id);
        assert!(bridge[3..].chars().all(|c| c.is_ascii_hexdigit()));
        assert!(tap[3..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(bridge[3..].len(), 10);
        assert_eq!(tap[3..].len(), 10);
    }

    #[test]
    fn test_different_ids_different_names() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(bridge_name(a), bridge_name(b));
    }

    #[test]
    fn test_compose_network_name_roundtrip() {
        let id = Uuid::new_v4();
        let lab = compose_network_name(id, ComposeNetworkKind::LabNet);
        let egress = compose_network_name(id, ComposeNetworkKind::EgressNet);
        assert!(is_valid_compose_network_name(&lab));
        assert!(is_valid_compose_network_name(&egress));
    }

    #[test]
    fn test_invalid_compose_network_name_rejected() {
        assert!(!is_valid_compose_network_name("some_other_net"));
        assert!(!is_valid_compose_network_name("octolab_not-a-uuid_lab_net"));
    }

    #[test]
    fn test_lab_id_label() {
        let id = Uuid::new_v4();
        assert_eq!(lab_id_label(id), format!("octolab.lab_id={id}"));
    }
}
