pub mod completion;
pub mod creation;
pub mod dependency;
pub mod ensure;
pub mod fsm;
pub mod owner;
pub mod phase_gate;
pub mod runner;
pub mod status;
pub mod status_reducer;

pub use runner::run_controllers;

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::access::{AccessError, AdminBinding, ClusterAccess, SubjectKind};
use crate::children::{ChildKind, ObjectKey};
use crate::config::TcmConfig;
use crate::metrics::{ReconcileMetrics, ReconcileStage};
use crate::reporter::{
    REASON_RECONCILE_ERROR, ReportContext, Severity, StatusSink,
    report_best_effort,
};
use crate::store::{ResourceStore, StoreError};
use crate::templates::{ManifestRenderer, TemplateError};

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("render error: {0}")]
    Render(#[from] TemplateError),
    #[error("{kind} {key} has {owners} TestCluster owners, expected at most one")]
    Ownership {
        kind: ChildKind,
        key: ObjectKey,
        owners: usize,
    },
    #[error("cluster access error: {0}")]
    Access(#[from] AccessError),
    #[error("status of {key} still conflicting after {attempts} attempts")]
    ConflictRetriesExhausted { key: ObjectKey, attempts: u32 },
    #[error("invalid request {key}: {reason}")]
    InvalidRequest { key: ObjectKey, reason: String },
}

#[derive(Clone, Debug)]
pub struct ReconcileSettings {
    pub status_update_attempts: u32,
    pub admin_binding: AdminBinding,
    pub error_requeue: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            status_update_attempts: 5,
            admin_binding: AdminBinding::new("tcm-operator", SubjectKind::User),
            error_requeue: Duration::from_secs(15),
        }
    }
}

impl ReconcileSettings {
    pub fn from_config(cfg: &TcmConfig) -> Self {
        Self {
            status_update_attempts: cfg.reconcile.status_update_attempts.max(1),
            admin_binding: cfg.admin_binding(),
            error_requeue: cfg.error_requeue(),
        }
    }
}

/// Collaborators shared by every handler.
#[derive(Clone)]
pub struct ControllerContext {
    pub store: Arc<dyn ResourceStore>,
    pub renderer: Arc<dyn ManifestRenderer>,
    pub sink: Arc<dyn StatusSink>,
    pub metrics: Arc<dyn ReconcileMetrics>,
    pub access: Arc<dyn ClusterAccess>,
    pub settings: ReconcileSettings,
}

impl ControllerContext {
    /// Count, report and hand back a failure.
    pub(crate) async fn fail(
        &self,
        stage: ReconcileStage,
        report: ReportContext,
        err: ReconcileErr,
    ) -> ReconcileErr {
        warn!(stage = stage.as_str(), request = %report.request, error = %err, "reconcile failed");
        self.metrics.reconcile_error(stage);
        let report = ReportContext {
            reason: REASON_RECONCILE_ERROR.to_string(),
            ..report
        };
        report_best_effort(
            self.sink.as_ref(),
            Severity::Error,
            &err.to_string(),
            &report,
        )
        .await;
        err
    }
}
