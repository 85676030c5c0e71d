use tracing::{debug, instrument, trace};

use super::fsm::{GateAction, gate_actions};
use super::owner::{first_claimed_request, owned_by, resolve_owner};
use super::phase_gate::{GateOutcome, run_gate};
use super::status::{StatusWrite, update_request_status};
use super::status_reducer::record_dependency;
use super::{ControllerContext, ReconcileErr};
use crate::children::{ChildKind, ObjectKey};
use crate::conditions;
use crate::crd::TestCluster;
use crate::metrics::ReconcileStage;
use crate::reporter::{REASON_RECONCILE_ERROR, ReportContext};

#[derive(Debug, PartialEq, Eq)]
pub enum DependencyOutcome {
    NotFound,
    /// No TestCluster owner; not ours.
    Unowned,
    ChildDeleting,
    /// The child has no conditions yet.
    NotPopulated,
    /// Owner absent, being deleted, or replaced by a new incarnation.
    OwnerGone,
    Recorded { written: bool, gate: Vec<GateOutcome> },
}

/// Propagate a tracked child's conditions to its owning Request.
#[instrument(skip_all, fields(kind = %kind, ns = %key.namespace, name = %key.name))]
pub async fn reconcile_dependency(
    ctx: &ControllerContext,
    kind: ChildKind,
    key: &ObjectKey,
) -> Result<DependencyOutcome, ReconcileErr> {
    let Some(child) = ctx.store.get_child(kind, key).await? else {
        return Ok(DependencyOutcome::NotFound);
    };

    let subject = kind.dependency_key(key);
    let owner = match resolve_owner(&child) {
        Ok(Some(link)) => link,
        Ok(None) => {
            trace!("no TestCluster owner");
            return Ok(DependencyOutcome::Unowned);
        }
        Err(e) => {
            // attribute the anomaly to the first claiming Request
            let request =
                first_claimed_request(&child).unwrap_or_else(|| key.clone());
            let report = ReportContext::new(request, REASON_RECONCILE_ERROR)
                .with_subject(subject);
            return Err(ctx.fail(ReconcileStage::Dependency, report, e).await);
        }
    };

    if child.is_deleting() {
        debug!("dependency deleting");
        return Ok(DependencyOutcome::ChildDeleting);
    }
    let Some(observed) = child.observed_conditions().map(<[_]>::to_vec) else {
        trace!("status not populated yet");
        return Ok(DependencyOutcome::NotPopulated);
    };

    let report = ReportContext::new(owner.key.clone(), REASON_RECONCILE_ERROR)
        .with_subject(subject.clone());
    let write = match record(ctx, &owner, &subject, &observed).await {
        Ok(w) => w,
        Err(e) => {
            return Err(ctx.fail(ReconcileStage::Dependency, report, e).await);
        }
    };
    let (request, written) = match write {
        Recorded::Owner(request, written) => (request, written),
        Recorded::Gone => return Ok(DependencyOutcome::OwnerGone),
    };

    let mut gate = Vec::new();
    if conditions::has_ready(&observed) {
        let actions: Vec<GateAction> =
            gate_actions(kind, request.spec.workload.is_some());
        for action in actions {
            gate.push(run_gate(ctx, &request, action).await?);
        }
    }
    Ok(DependencyOutcome::Recorded { written, gate })
}

enum Recorded {
    Owner(TestCluster, bool),
    Gone,
}

async fn record(
    ctx: &ControllerContext,
    owner: &super::owner::OwnerLink,
    subject: &str,
    observed: &[conditions::Condition],
) -> Result<Recorded, ReconcileErr> {
    let mut stale = false;
    let write = update_request_status(ctx, &owner.key, |request| {
        if !owned_by(request, owner) {
            stale = true;
            return Ok(None);
        }
        let Some(generated) = request.generated_name() else {
            return Err(ReconcileErr::InvalidRequest {
                key: request.key(),
                reason: "owns children but has no generatedName".into(),
            });
        };
        let expected =
            ctx.renderer.expected_dependencies(&request.spec, generated)?;
        Ok(Some(record_dependency(
            request.status.as_ref(),
            subject,
            observed.to_vec(),
            expected,
        )))
    })
    .await?;

    if stale {
        debug!(request = %owner.key, "owner uid changed");
        return Ok(Recorded::Gone);
    }
    Ok(match write {
        StatusWrite::Missing | StatusWrite::Deleting => Recorded::Gone,
        StatusWrite::Unchanged(r) => Recorded::Owner(r, false),
        StatusWrite::Written(r) => Recorded::Owner(r, true),
    })
}
