//! The lab entity and its status state machine.
//!
//! `validate_transition` is the single authority for which `(from, to)`
//! edges are legal; nothing else in the workspace should special-case a
//! transition.

use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabStatus {
    Requested,
    Provisioning,
    Ready,
    Degraded,
    Ending,
    Finished,
    Failed,
}

impl fmt::Display for LabStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LabStatus::Requested => "requested",
            LabStatus::Provisioning => "provisioning",
            LabStatus::Ready => "ready",
            LabStatus::Degraded => "degraded",
            LabStatus::Ending => "ending",
            LabStatus::Finished => "finished",
            LabStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl LabStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, LabStatus::Finished)
    }

    /// States in which a lab owns exclusive network resources keyed by id.
    pub fn owns_network_resources(self) -> bool {
        !matches!(self, LabStatus::Requested | LabStatus::Finished)
    }

    /// States from which `TerminateLab` is legal.
    pub fn terminable(self) -> bool {
        matches!(
            self,
            LabStatus::Requested
                | LabStatus::Provisioning
                | LabStatus::Ready
                | LabStatus::Degraded
                | LabStatus::Failed
        )
    }
}

/// Validate a status transition against the table in the lab lifecycle
/// contract. `Failed -> Ending` is the one admin-initiated retry edge;
/// every other edge out of a non-terminal state is enumerated explicitly
/// (there is no blanket "any -> terminal" shortcut, because `Ending` is
/// not terminal and `Failed` is not reachable from `Ready`/`Degraded`
/// without going through `Ending` first per the table).
pub fn validate_transition(from: LabStatus, to: LabStatus) -> Result<()> {
    use LabStatus::*;

    let legal = matches!(
        (from, to),
        (Requested, Provisioning)
            | (Requested, Failed)
            | (Requested, Ending)
            | (Provisioning, Ready)
            | (Provisioning, Degraded)
            | (Provisioning, Failed)
            | (Provisioning, Ending)
            | (Ready, Degraded)
            | (Ready, Ending)
            | (Degraded, Ready)
            | (Degraded, Ending)
            | (Ending, Finished)
            | (Ending, Failed)
            | (Failed, Ending)
    );

    if legal {
        Ok(())
    } else {
        bail!("illegal lab status transition: {from} -> {to}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    Compose,
    Firecracker,
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeKind::Compose => write!(f, "compose"),
            RuntimeKind::Firecracker => write!(f, "firecracker"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceState {
    Collecting,
    Ready,
    Partial,
    Unavailable,
}

/// Server-owned metadata about the allocated runtime resources for a lab.
/// Never populated from client input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeMeta {
    /// Firecracker labs: per-lab microVM id (== lab id, kept explicit for clarity).
    #[serde(default)]
    pub vm_id: Option<Uuid>,
    /// Firecracker labs: basename of the per-lab state dir, never the full path.
    #[serde(default)]
    pub state_dir_basename: Option<String>,
    #[serde(default)]
    pub firecracker_pid: Option<u32>,
    /// Compose labs: the compose project name.
    #[serde(default)]
    pub compose_project: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lab {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub recipe_id: Uuid,
    pub status: LabStatus,
    pub runtime: Option<RuntimeKind>,
    #[serde(default)]
    pub runtime_meta: RuntimeMeta,
    pub connection_url: Option<String>,
    /// Structured recipe overrides; bounded to 64 KiB serialized.
    pub requested_intent: serde_json::Value,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub evidence_state: EvidenceState,
    pub evidence_finalized_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Maximum serialized size of `requested_intent`, per the intent size bound.
pub const MAX_INTENT_BYTES: usize = 64 * 1024;

impl Lab {
    /// A lab in `Ready`/`Degraded` must have a non-null `connection_url`.
    pub fn connection_url_invariant_holds(&self) -> bool {
        match self.status {
            LabStatus::Ready | LabStatus::Degraded => self.connection_url.is_some(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_statuses() -> Vec<LabStatus> {
        vec![
            LabStatus::Requested,
            LabStatus::Provisioning,
            LabStatus::Ready,
            LabStatus::Degraded,
            LabStatus::Ending,
            LabStatus::Finished,
            LabStatus::Failed,
        ]
    }

    #[test]
    fn test_valid_transitions() {
        use LabStatus::*;
        let edges = [
            (Requested, Provisioning),
            (Requested, Failed),
            (Requested, Ending),
            (Provisioning, Ready),
            (Provisioning, Degraded),
            (Provisioning, Failed),
            (Provisioning, Ending),
            (Ready, Degraded),
            (Ready, Ending),
            (Degraded, Ready),
            (Degraded, Ending),
            (Ending, Finished),
            (Ending, Failed),
            (Failed, Ending),
        ];
        for (from, to) in edges {
            assert!(
                validate_transition(from, to).is_ok(),
                "{from} -> {to} should be legal"
            );
        }
    }

    #[test]
    fn test_invalid_transitions() {
        use LabStatus::*;
        let edges = [
            (Requested, Ready),
            (Ready, Provisioning),
            (Ready, Failed),
            (Degraded, Failed),
            (Finished, Ending),
            (Finished, Requested),
            (Failed, Ready),
            (Ending, Ready),
        ];
        for (from, to) in edges {
            assert!(
                validate_transition(from, to).is_err(),
                "{from} -> {to} should be illegal"
            );
        }
    }

    #[test]
    fn test_no_transition_out_of_finished() {
        for to in all_statuses() {
            if to == Finished {
                continue;
            }
            assert!(validate_transition(LabStatus::Finished, to).is_err());
        }
    }

    #[test]
    fn test_self_transitions_all_illegal() {
        for s in all_statuses() {
            assert!(validate_transition(s, s).is_err(), "{s} -> {s} self-loop");
        }
    }

    #[test]
    fn test_status_display() {
        assert_eq!(LabStatus::Requested.to_string(), "requested");
        assert_eq!(LabStatus::Ending.to_string(), "ending");
    }

    #[test]
    fn test_status_json_roundtrip() {
        let json = serde_json::to_string(&LabStatus::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
        let back: LabStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, LabStatus::Degraded);
    }

    #[test]
    fn test_terminable_states() {
        assert!(LabStatus::Requested.terminable());
        assert!(LabStatus::Ready.terminable());
        assert!(LabStatus::Failed.terminable());
        assert!(!LabStatus::Ending.terminable());
        assert!(!LabStatus::Finished.terminable());
    }

    #[test]
    fn test_connection_url_invariant() {
        let mut lab = sample_lab();
        lab.status = LabStatus::Ready;
        lab.connection_url = None;
        assert!(!lab.connection_url_invariant_holds());
        lab.connection_url = Some("https://example".into());
        assert!(lab.connection_url_invariant_holds());
    }

    fn sample_lab() -> Lab {
        let now = chrono::Utc::now();
        Lab {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            recipe_id: Uuid::new_v4(),
            status: LabStatus::Requested,
            runtime: None,
            runtime_meta: RuntimeMeta::default(),
            connection_url: None,
            requested_intent: serde_json::json!({}),
            expires_at: None,
            evidence_state: EvidenceState::Collecting,
            evidence_finalized_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
