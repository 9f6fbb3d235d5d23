//! The `Runtime` boundary: a polymorphic interface over the two lab
//! backends, plus the process-wide selector that gates the firecracker
//! backend on a passing doctor report. "NO FALLBACK" is load-bearing here:
//! a failing doctor for the firecracker backend must never cause a silent
//! switch to compose.

use std::sync::RwLock;

use anyhow::Result;
use octolab_core::lab::{Lab, RuntimeKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Fatal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorCheck {
    pub name: String,
    pub ok: bool,
    pub severity: Severity,
    pub details: String,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DoctorReport {
    pub checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    /// A report is `ok` iff no check carries `severity = fatal`.
    pub fn ok(&self) -> bool {
        !self
            .checks
            .iter()
            .any(|c| c.severity == Severity::Fatal && !c.ok)
    }

    pub fn push(&mut self, name: impl Into<String>, ok: bool, severity: Severity, details: impl Into<String>) {
        self.checks.push(DoctorCheck {
            name: name.into(),
            ok,
            severity,
            details: details.into(),
            hint: None,
        });
    }

    pub fn push_with_hint(
        &mut self,
        name: impl Into<String>,
        ok: bool,
        severity: Severity,
        details: impl Into<String>,
        hint: impl Into<String>,
    ) {
        self.checks.push(DoctorCheck {
            name: name.into(),
            ok,
            severity,
            details: details.into(),
            hint: Some(hint.into()),
        });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokePhase {
    pub name: String,
    pub ok: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeReport {
    pub ok: bool,
    pub phases: Vec<SmokePhase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub healthy: bool,
    pub detail: String,
}

/// Capability set shared by `ComposeRuntime` and `FirecrackerRuntime`.
/// Async everywhere except `Doctor`, which is a pure read-only check and
/// must never mutate state.
#[async_trait::async_trait]
pub trait Runtime: Send + Sync {
    fn name(&self) -> RuntimeKind;

    async fn doctor(&self) -> DoctorReport;

    async fn smoke(&self) -> Result<SmokeReport>;

    async fn provision_lab(&self, lab: &mut Lab) -> Result<()>;

    async fn destroy_lab(&self, lab: &Lab) -> Result<()>;

    async fn inspect_lab(&self, lab: &Lab) -> Result<RuntimeStatus>;
}

/// Process-wide selector: `effective = override ?? default`. Holds the
/// last doctor result for the admin surface; does not re-run doctor on
/// every read.
pub struct RuntimeSelector {
    default_runtime: RuntimeKind,
    override_runtime: RwLock<Option<RuntimeKind>>,
    last_doctor: RwLock<Option<DoctorReport>>,
}

impl RuntimeSelector {
    pub fn new(default_runtime: RuntimeKind, override_runtime: Option<RuntimeKind>) -> Self {
        RuntimeSelector {
            default_runtime,
            override_runtime: RwLock::new(override_runtime),
            last_doctor: RwLock::new(None),
        }
    }

    pub fn effective(&self) -> RuntimeKind {
        self.override_runtime
            .read()
            .expect("runtime selector lock poisoned")
            .unwrap_or(self.default_runtime)
    }

    pub fn set_override(&self, runtime: Option<RuntimeKind>) {
        *self.override_runtime.write().expect("runtime selector lock poisoned") = runtime;
    }

    pub fn record_doctor(&self, report: DoctorReport) {
        *self.last_doctor.write().expect("runtime selector lock poisoned") = Some(report);
    }

    pub fn last_doctor(&self) -> Option<DoctorReport> {
        self.last_doctor.read().expect("runtime selector lock poisoned").clone()
    }

    /// The hard gate: firecracker must never run with a failing or
    /// missing doctor report. There is no fallback path out of this
    /// function — a fatal doctor is a hard refusal to select firecracker.
    pub fn may_select_firecracker(&self) -> bool {
        self.last_doctor()
            .map(|r| r.ok())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doctor_report_ok_with_no_checks() {
        let report = DoctorReport::default();
        assert!(report.ok());
    }

    #[test]
    fn test_doctor_report_fatal_not_ok() {
        let mut report = DoctorReport::default();
        report.push("kernel image", false, Severity::Fatal, "missing file");
        assert!(!report.ok());
    }

    #[test]
    fn test_doctor_report_warn_still_ok() {
        let mut report = DoctorReport::default();
        report.push("disk space", false, Severity::Warn, "low disk space");
        assert!(report.ok());
    }

    #[test]
    fn test_selector_override_wins_over_default() {
        let sel = RuntimeSelector::new(RuntimeKind::Compose, Some(RuntimeKind::Firecracker));
        assert_eq!(sel.effective(), RuntimeKind::Firecracker);
    }

    #[test]
    fn test_selector_falls_back_to_default_when_no_override() {
        let sel = RuntimeSelector::new(RuntimeKind::Compose, None);
        assert_eq!(sel.effective(), RuntimeKind::Compose);
    }

    #[test]
    fn test_may_select_firecracker_requires_recorded_ok_doctor() {
        let sel = RuntimeSelector::new(RuntimeKind::Firecracker, None);
        assert!(!sel.may_select_firecracker());

        let mut report = DoctorReport::default();
        report.push("kvm", true, Severity::Info, "ok");
        sel.record_doctor(report);
        assert!(sel.may_select_firecracker());
    }

    #[test]
    fn test_may_select_firecracker_refuses_on_fatal() {
        let sel = RuntimeSelector::new(RuntimeKind::Firecracker, None);
        let mut report = DoctorReport::default();
        report.push("kernel image", false, Severity::Fatal, "missing");
        sel.record_doctor(report);
        assert!(!sel.may_select_firecracker());
    }
}
