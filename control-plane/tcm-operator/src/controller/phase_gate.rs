use tracing::{debug, info};

use super::ensure::ensure_children;
use super::fsm::GateAction;
use super::owner::bind_all;
use super::status::update_request_status;
use super::status_reducer::record_workload;
use super::{ControllerContext, ReconcileErr};
use crate::access::BindingOutcome;
use crate::children::{ChildKind, ObjectKey};
use crate::crd::TestCluster;
use crate::metrics::ReconcileStage;
use crate::reporter::{
    REASON_RECONCILE_ERROR, REASON_WORKLOAD_CREATED, ReportContext, Severity,
    report_best_effort,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateOutcome {
    ClusterAdmin(BindingOutcome),
    WorkloadCreated(String),
    WorkloadPresent(String),
}

pub async fn run_gate(
    ctx: &ControllerContext,
    request: &TestCluster,
    action: GateAction,
) -> Result<GateOutcome, ReconcileErr> {
    let result = match action {
        GateAction::EnsureClusterAdmin => ensure_cluster_admin(ctx, request).await,
        GateAction::CreateWorkload => create_workload(ctx, request).await,
    };
    match result {
        Ok(o) => Ok(o),
        Err(e) => {
            let report = ReportContext::for_request(request, REASON_RECONCILE_ERROR);
            Err(ctx.fail(ReconcileStage::PhaseGate, report, e).await)
        }
    }
}

fn generated(request: &TestCluster) -> Result<&str, ReconcileErr> {
    request
        .generated_name()
        .ok_or_else(|| ReconcileErr::InvalidRequest {
            key: request.key(),
            reason: "phase gate reached without generatedName".into(),
        })
}

async fn ensure_cluster_admin(
    ctx: &ControllerContext,
    request: &TestCluster,
) -> Result<GateOutcome, ReconcileErr> {
    let cluster = ObjectKey::new(request.key().namespace, generated(request)?);
    let outcome = ctx
        .access
        .ensure_cluster_admin(&cluster, &ctx.settings.admin_binding)
        .await?;
    match outcome {
        BindingOutcome::Created => {
            info!(%cluster, binding = %ctx.settings.admin_binding.name, "cluster-admin binding created")
        }
        BindingOutcome::AlreadyPresent => {
            debug!(%cluster, "cluster-admin binding present")
        }
    }
    Ok(GateOutcome::ClusterAdmin(outcome))
}

async fn create_workload(
    ctx: &ControllerContext,
    request: &TestCluster,
) -> Result<GateOutcome, ReconcileErr> {
    let generated = generated(request)?;
    let mut manifests = ctx.renderer.render_workload(&request.spec, generated)?;
    bind_all(&mut manifests, request)?;
    let job_name = manifests
        .iter()
        .find(|m| m.kind == ChildKind::Job)
        .map(|m| m.name().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ReconcileErr::InvalidRequest {
            key: request.key(),
            reason: "workload tier rendered no Job".into(),
        })?;

    let summary = ensure_children(ctx, &manifests).await?;
    let fresh = summary.all_created();
    if fresh {
        ctx.metrics.workload_created();
        info!(job = %job_name, "workload created");
        report_best_effort(
            ctx.sink.as_ref(),
            Severity::Info,
            &format!("Created workload {job_name}"),
            &ReportContext::for_request(request, REASON_WORKLOAD_CREATED)
                .with_subject(job_name.clone()),
        )
        .await;
    }

    update_request_status(ctx, &request.key(), |current| {
        if current.metadata.uid != request.metadata.uid {
            return Ok(None);
        }
        Ok(Some(record_workload(current.status.as_ref(), &job_name)))
    })
    .await?;

    Ok(if fresh {
        GateOutcome::WorkloadCreated(job_name)
    } else {
        GateOutcome::WorkloadPresent(job_name)
    })
}
