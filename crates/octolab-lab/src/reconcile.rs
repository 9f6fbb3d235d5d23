//! Startup provisioning reconciliation (SPEC_FULL §2).
//!
//! Grounded on `TenantManager::recover`'s pattern (reload persisted rows,
//! check whether the resource they claim is actually alive, demote the
//! ones that aren't): any lab found `REQUESTED`/`PROVISIONING` at process
//! start had its provisioning interrupted by a crash or a hard kill, so
//! there is no live runtime resource to hand back to. Demote it rather
//! than let the lab service reopen the transaction to something no
//! runtime call will recognize.

use std::sync::Arc;

use chrono::Utc;
use octolab_core::lab::LabStatus;
use tracing::{info, warn};

use crate::audit::{self, AuditAction};
use crate::store::PgLabStore;

/// Demote every in-flight `REQUESTED`/`PROVISIONING` lab to `FAILED` with
/// reason `orphaned_on_restart`. Returns the number of labs demoted.
pub async fn reconcile_on_startup(store: &Arc<PgLabStore>) -> anyhow::Result<usize> {
    let in_flight = store.list_in_flight_provisioning().await?;
    if in_flight.is_empty() {
        return Ok(0);
    }

    warn!(
        count = in_flight.len(),
        "found labs stuck in REQUESTED/PROVISIONING at startup; demoting to FAILED"
    );

    let mut demoted = 0;
    for mut lab in in_flight {
        lab.status = LabStatus::Failed;
        lab.updated_at = Utc::now();
        match store.update(&lab).await {
            Ok(()) => {
                audit::log(
                    &lab,
                    AuditAction::LabFailed,
                    Some("orphaned_on_restart".to_string()),
                );
                demoted += 1;
            }
            Err(e) => {
                warn!(lab_id = %lab.id, error = %e, "failed to demote orphaned lab");
            }
        }
    }

    info!(demoted, "startup provisioning reconciliation complete");
    Ok(demoted)
}
