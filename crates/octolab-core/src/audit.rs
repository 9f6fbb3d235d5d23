use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit event types for lab lifecycle logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuditAction {
    LabRequested,
    LabProvisioning,
    LabReady,
    LabDegraded,
    LabEnding,
    LabFinished,
    LabFailed,
    DoctorRun,
    SmokeRun,
    RuntimeOverrideChanged,
    EvidenceFinalized,
}

/// A single audit log entry, written for every lab status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub lab_id: Uuid,
    pub owner_id: Option<Uuid>,
    pub action: AuditAction,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_entry_serialization() {
        let entry = AuditEntry {
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            lab_id: Uuid::new_v4(),
            owner_id: Some(Uuid::new_v4()),
            action: AuditAction::LabReady,
            detail: Some("connection_url set".to_string()),
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"LabReady\""));
    }

    #[test]
    fn test_audit_entry_no_optionals() {
        let entry = AuditEntry {
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            lab_id: Uuid::new_v4(),
            owner_id: None,
            action: AuditAction::LabFailed,
            detail: None,
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"owner_id\":null"));
    }

    #[test]
    fn test_all_audit_actions_serialize() {
        let actions = vec![
            AuditAction::LabRequested,
            AuditAction::LabProvisioning,
            AuditAction::LabReady,
            AuditAction::LabDegraded,
            AuditAction::LabEnding,
            AuditAction::LabFinished,
            AuditAction::LabFailed,
            AuditAction::DoctorRun,
            AuditAction::SmokeRun,
            AuditAction::RuntimeOverrideChanged,
            AuditAction::EvidenceFinalized,
        ];

        for action in actions {
            let json = serde_json::to_string(&action).unwrap();
            assert!(!json.is_empty());
        }
    }
}
