use std::collections::HashMap;
use std::sync::Mutex;

use kube::Resource;
use kube::runtime::watcher;
use tracing::{debug, info, instrument, warn};

use super::owner::{owned_by, recorded_owner, resolve_owner};
use super::{ControllerContext, ReconcileErr};
use crate::children::{ChildKind, JobOutcome, ObjectKey};
use crate::metrics::ReconcileStage;
use crate::reporter::{
    REASON_RECONCILE_ERROR, REASON_WORKLOAD_COMPLETED, REASON_WORKLOAD_FAILED,
    ReportContext, Severity, report_best_effort,
};

/// Lets an object through only when its resource version moved since the
/// last admitted event for the same key.
#[derive(Debug, Default)]
pub struct ResourceVersionFilter {
    seen: Mutex<HashMap<ObjectKey, String>>,
}

impl ResourceVersionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&self, key: &ObjectKey, resource_version: Option<&str>) -> bool {
        let Some(rv) = resource_version else {
            return true;
        };
        let Ok(mut seen) = self.seen.lock() else {
            return true;
        };
        match seen.get(key) {
            Some(prev) if prev == rv => false,
            _ => {
                seen.insert(key.clone(), rv.to_string());
                true
            }
        }
    }

    pub fn forget(&self, key: &ObjectKey) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.remove(key);
        }
    }

    /// Drop entries for deleted objects; a relist starts over.
    pub fn observe<K: Resource>(&self, event: &watcher::Event<K>) {
        match event {
            watcher::Event::Delete(obj) => {
                if let Some(key) = ObjectKey::from_meta(obj.meta()) {
                    self.forget(&key);
                }
            }
            watcher::Event::Init => {
                if let Ok(mut seen) = self.seen.lock() {
                    seen.clear();
                }
            }
            _ => {}
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CompletionOutcome {
    NotFound,
    Unowned,
    Running,
    OwnerGone,
    TornDown(JobOutcome),
}

/// Tear down the owning Request once its workload reaches a terminal state.
#[instrument(skip_all, fields(ns = %key.namespace, name = %key.name))]
pub async fn reconcile_job(
    ctx: &ControllerContext,
    key: &ObjectKey,
) -> Result<CompletionOutcome, ReconcileErr> {
    let Some(job) = ctx.store.get_child(ChildKind::Job, key).await? else {
        return Ok(CompletionOutcome::NotFound);
    };
    // a de-linked job still names its Request until that Request is gone
    let owner = match resolve_owner(&job) {
        Ok(Some(link)) => link,
        Ok(None) => match recorded_owner(&job) {
            Some(link) => link,
            None => return Ok(CompletionOutcome::Unowned),
        },
        Err(e) => {
            let report = ReportContext::new(key.clone(), REASON_RECONCILE_ERROR)
                .with_subject(ChildKind::Job.dependency_key(key));
            return Err(ctx.fail(ReconcileStage::Completion, report, e).await);
        }
    };
    let Some(outcome) = job.terminal_state() else {
        debug!("workload still running");
        return Ok(CompletionOutcome::Running);
    };

    let report = ReportContext::new(owner.key.clone(), REASON_RECONCILE_ERROR);
    let request = match ctx.store.get_request(&owner.key).await {
        Ok(Some(r)) => r,
        Ok(None) => return Ok(CompletionOutcome::OwnerGone),
        Err(e) => {
            return Err(ctx
                .fail(ReconcileStage::Completion, report, e.into())
                .await);
        }
    };
    if request.is_deleting() || !owned_by(&request, &owner) {
        debug!(request = %owner.key, "owner already going away");
        return Ok(CompletionOutcome::OwnerGone);
    }

    if let Err(e) = ctx.store.remove_owner_references(ChildKind::Job, key).await
    {
        warn!(error = %e, "failed to de-link workload, continuing with teardown");
    }
    match ctx.store.delete_request(&owner.key).await {
        Ok(true) => info!(request = %owner.key, ?outcome, "request deleted"),
        Ok(false) => debug!(request = %owner.key, "request already deleted"),
        Err(e) => {
            return Err(ctx
                .fail(ReconcileStage::Completion, report, e.into())
                .await);
        }
    }

    let (severity, reason, verb) = match outcome {
        JobOutcome::Completed => {
            (Severity::Info, REASON_WORKLOAD_COMPLETED, "completed")
        }
        JobOutcome::Failed => (Severity::Warning, REASON_WORKLOAD_FAILED, "failed"),
    };
    report_best_effort(
        ctx.sink.as_ref(),
        severity,
        &format!("Workload {} {verb}; tearing down", key.name),
        &ReportContext::for_request(&request, reason).with_subject(key.name.clone()),
    )
    .await;
    Ok(CompletionOutcome::TornDown(outcome))
}
