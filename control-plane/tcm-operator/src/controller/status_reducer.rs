use super::fsm::{EvalInput, Phase, evaluate};
use crate::conditions::{self, Condition, READY};
use crate::crd::TestClusterStatus;

/// Record the generated name; `clusterName` mirrors it.
pub fn assign_generated_name(
    current: Option<&TestClusterStatus>,
    generated_name: &str,
) -> TestClusterStatus {
    let mut next = current.cloned().unwrap_or_default();
    next.generated_name = Some(generated_name.to_string());
    next.cluster_name = Some(generated_name.to_string());
    next.phase = Some(Phase::Pending.to_string());
    next
}

/// Replace the condition list stored under `key` and recompute the aggregated
/// `Ready` condition and phase.
pub fn record_dependency(
    current: Option<&TestClusterStatus>,
    key: &str,
    observed: Vec<Condition>,
    expected_dependencies: usize,
) -> TestClusterStatus {
    let mut next = current.cloned().unwrap_or_default();
    next.dependency_conditions.insert(key.to_string(), observed);
    reaggregate(next, expected_dependencies)
}

/// Record the workload created by the phase gate.
pub fn record_workload(
    current: Option<&TestClusterStatus>,
    workload_name: &str,
) -> TestClusterStatus {
    let mut next = current.cloned().unwrap_or_default();
    next.workload_name = Some(workload_name.to_string());
    next.phase = Some(Phase::Running.to_string());
    next
}

fn reaggregate(
    mut status: TestClusterStatus,
    expected_dependencies: usize,
) -> TestClusterStatus {
    let out = evaluate(EvalInput {
        generated_name: status.generated_name.as_deref(),
        dependencies: &status.dependency_conditions,
        expected_dependencies,
        workload_name: status.workload_name.as_deref(),
    });
    let previous = conditions::find(&status.conditions, READY);
    let ready = conditions::ready_condition(out.ready, &out.not_ready, previous);
    status.conditions = conditions::upsert(&status.conditions, ready);
    status.phase = Some(out.phase.to_string());
    status
}
