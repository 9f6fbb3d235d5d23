//! The background teardown worker: §4.7. Tick loop grounded on
//! `mvm-coordinator::health::health_check_loop`'s sleep-then-sweep shape;
//! the `FOR UPDATE SKIP LOCKED` claim itself lives in
//! [`crate::store::PgLabStore::begin_teardown_batch`].

use std::sync::Arc;
use std::time::Duration;

use octolab_core::lab::{EvidenceState, Lab, LabStatus, RuntimeKind};
use octolab_runtime::Runtime;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::audit::{self, AuditAction};
use crate::store::PgLabStore;

#[derive(Debug, Clone)]
pub struct TeardownWorkerConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub batch_size: i64,
    pub startup_tick: bool,
    pub per_lab_timeout: Duration,
}

impl Default for TeardownWorkerConfig {
    fn default() -> Self {
        TeardownWorkerConfig {
            enabled: true,
            interval: Duration::from_secs(5),
            batch_size: 3,
            startup_tick: true,
            per_lab_timeout: Duration::from_secs(600),
        }
    }
}

pub struct TeardownWorker {
    store: Arc<PgLabStore>,
    compose: Arc<dyn Runtime>,
    firecracker: Arc<dyn Runtime>,
    config: TeardownWorkerConfig,
}

impl TeardownWorker {
    pub fn new(
        store: Arc<PgLabStore>,
        compose: Arc<dyn Runtime>,
        firecracker: Arc<dyn Runtime>,
        config: TeardownWorkerConfig,
    ) -> Self {
        TeardownWorker {
            store,
            compose,
            firecracker,
            config,
        }
    }

    fn runtime_for(&self, lab: &Lab) -> Option<Arc<dyn Runtime>> {
        match lab.runtime {
            Some(RuntimeKind::Compose) => Some(self.compose.clone()),
            Some(RuntimeKind::Firecracker) => Some(self.firecracker.clone()),
            None => None,
        }
    }

    /// Run the worker until `shutdown` fires. Per §4.7's cancellation
    /// contract: a shutdown mid-batch lets the in-progress tick finish
    /// committing whatever it has claimed, then the loop exits without
    /// starting a new tick. Labs claimed by a tick that was itself
    /// interrupted (process killed, not cooperatively shut down) stay
    /// `ENDING` and are retried by the next process's startup tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            info!("teardown worker disabled by configuration");
            return;
        }

        if self.config.startup_tick {
            info!("running teardown worker startup tick");
            if let Err(e) = self.tick().await {
                error!(error = %e, "teardown worker startup tick failed");
            }
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "teardown worker tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("teardown worker shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// One claim-process-commit cycle. Public so tests and the startup
    /// tick can invoke it directly without running the full sleep loop.
    pub async fn tick(&self) -> anyhow::Result<usize> {
        let mut batch = self.store.begin_teardown_batch(self.config.batch_size).await?;
        let labs: Vec<Lab> = batch.labs().to_vec();
        let claimed = labs.len();

        for lab in &labs {
            let (status, evidence, reason) = self.destroy_one(lab).await;
            if let Err(e) = batch.finish(lab.id, status, evidence, reason.as_deref()).await {
                error!(lab_id = %lab.id, error = %e, "failed to record teardown outcome");
            }
        }

        batch.commit().await?;
        if claimed > 0 {
            info!(claimed, "teardown worker processed batch");
        }
        Ok(claimed)
    }

    async fn destroy_one(&self, lab: &Lab) -> (LabStatus, EvidenceState, Option<String>) {
        let Some(runtime) = self.runtime_for(lab) else {
            warn!(lab_id = %lab.id, "ending lab has no runtime set; marking failed");
            return (
                LabStatus::Failed,
                EvidenceState::Unavailable,
                Some("lab has no runtime assigned".to_string()),
            );
        };

        match tokio::time::timeout(self.config.per_lab_timeout, runtime.destroy_lab(lab)).await {
            Ok(Ok(())) => {
                audit::log(lab, AuditAction::LabFinished, None);
                audit::log(lab, AuditAction::EvidenceFinalized, None);
                (LabStatus::Finished, EvidenceState::Ready, None)
            }
            Ok(Err(e)) => {
                warn!(lab_id = %lab.id, error = %e, "destroy_lab failed");
                audit::log(lab, AuditAction::LabFailed, Some(e.to_string()));
                (LabStatus::Failed, EvidenceState::Partial, Some(e.to_string()))
            }
            Err(_) => {
                warn!(lab_id = %lab.id, timeout_secs = self.config.per_lab_timeout.as_secs(), "destroy_lab timed out");
                audit::log(lab, AuditAction::LabFailed, Some("teardown_timeout".to_string()));
                (
                    LabStatus::Failed,
                    EvidenceState::Partial,
                    Some("teardown_timeout".to_string()),
                )
            }
        }
    }
}
