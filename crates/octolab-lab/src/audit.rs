//! Structured audit logging for lab lifecycle transitions. Grounded on
//! `octolab_core::audit::AuditEntry`'s shape; emitted through `tracing`
//! rather than a separate audit table, since nothing downstream of this
//! core reads an audit log back out.

pub use octolab_core::audit::AuditAction;
use octolab_core::audit::AuditEntry;
use octolab_core::lab::Lab;
use octolab_core::time::utc_now;
use tracing::info;

pub fn log(lab: &Lab, action: AuditAction, detail: Option<String>) {
    let entry = AuditEntry {
        timestamp: utc_now(),
        lab_id: lab.id,
        owner_id: Some(lab.owner_id),
        action,
        detail,
    };
    info!(
        lab_id = %entry.lab_id,
        owner_id = ?entry.owner_id,
        action = ?entry.action,
        detail = ?entry.detail,
        "lab audit event"
    );
}
