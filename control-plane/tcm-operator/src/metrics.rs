use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Meter};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::children::ChildKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileStage {
    Creation,
    Dependency,
    PhaseGate,
    Completion,
}

impl ReconcileStage {
    pub const ALL: [ReconcileStage; 4] = [
        ReconcileStage::Creation,
        ReconcileStage::Dependency,
        ReconcileStage::PhaseGate,
        ReconcileStage::Completion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileStage::Creation => "creation",
            ReconcileStage::Dependency => "dependency",
            ReconcileStage::PhaseGate => "phase_gate",
            ReconcileStage::Completion => "completion",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Monotonic reconcile counters. Injected into handlers; never global.
pub trait ReconcileMetrics: Send + Sync {
    fn resource_created(&self, kind: ChildKind);
    fn cluster_created(&self);
    fn workload_created(&self);
    fn reconcile_error(&self, stage: ReconcileStage);
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub resources_created: u64,
    pub clusters_created: u64,
    pub workloads_created: u64,
    pub errors: u64,
}

/// Process-local counters backing `/metrics`.
#[derive(Debug, Default)]
pub struct CounterSet {
    resources: [AtomicU64; ChildKind::ALL.len()],
    clusters: AtomicU64,
    workloads: AtomicU64,
    errors: [AtomicU64; ReconcileStage::ALL.len()],
}

fn kind_index(kind: ChildKind) -> usize {
    ChildKind::ALL
        .iter()
        .position(|k| *k == kind)
        .unwrap_or_default()
}

impl CounterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resources_created_of(&self, kind: ChildKind) -> u64 {
        self.resources[kind_index(kind)].load(Ordering::Relaxed)
    }

    pub fn errors_of(&self, stage: ReconcileStage) -> u64 {
        self.errors[stage.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let sum = |a: &[AtomicU64]| {
            a.iter().map(|c| c.load(Ordering::Relaxed)).sum::<u64>()
        };
        CounterSnapshot {
            resources_created: sum(&self.resources),
            clusters_created: self.clusters.load(Ordering::Relaxed),
            workloads_created: self.workloads.load(Ordering::Relaxed),
            errors: sum(&self.errors),
        }
    }

    /// Prometheus text exposition.
    pub fn render_prometheus(&self) -> String {
        Exposition(self).to_string()
    }
}

struct Exposition<'a>(&'a CounterSet);

impl fmt::Display for Exposition<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = self.0;
        writeln!(
            f,
            "# HELP tcm_resources_created_total Child resources created.\n# TYPE tcm_resources_created_total counter"
        )?;
        for kind in ChildKind::ALL {
            writeln!(
                f,
                "tcm_resources_created_total{{kind=\"{}\"}} {}",
                kind,
                set.resources_created_of(kind)
            )?;
        }
        writeln!(
            f,
            "# HELP tcm_clusters_created_total Clusters whose first tier was created in full.\n# TYPE tcm_clusters_created_total counter\ntcm_clusters_created_total {}",
            set.clusters.load(Ordering::Relaxed)
        )?;
        writeln!(
            f,
            "# HELP tcm_workloads_created_total Workload jobs created.\n# TYPE tcm_workloads_created_total counter\ntcm_workloads_created_total {}",
            set.workloads.load(Ordering::Relaxed)
        )?;
        writeln!(
            f,
            "# HELP tcm_reconcile_errors_total Failed reconcile invocations.\n# TYPE tcm_reconcile_errors_total counter"
        )?;
        for stage in ReconcileStage::ALL {
            writeln!(
                f,
                "tcm_reconcile_errors_total{{stage=\"{}\"}} {}",
                stage.as_str(),
                set.errors_of(stage)
            )?;
        }
        Ok(())
    }
}

impl ReconcileMetrics for CounterSet {
    fn resource_created(&self, kind: ChildKind) {
        self.resources[kind_index(kind)].fetch_add(1, Ordering::Relaxed);
    }
    fn cluster_created(&self) {
        self.clusters.fetch_add(1, Ordering::Relaxed);
    }
    fn workload_created(&self) {
        self.workloads.fetch_add(1, Ordering::Relaxed);
    }
    fn reconcile_error(&self, stage: ReconcileStage) {
        self.errors[stage.index()].fetch_add(1, Ordering::Relaxed);
    }
}

/// OpenTelemetry counters; exported when an OTLP meter provider is installed.
#[derive(Clone)]
pub struct OtelCounters {
    resources_created: Counter<u64>,
    clusters_created: Counter<u64>,
    workloads_created: Counter<u64>,
    errors: Counter<u64>,
}

impl OtelCounters {
    pub fn new(meter: &Meter) -> Self {
        Self {
            resources_created: meter
                .u64_counter("tcm.resources.created")
                .with_description("Child resources created")
                .build(),
            clusters_created: meter
                .u64_counter("tcm.clusters.created")
                .with_description("Clusters whose first tier was created in full")
                .build(),
            workloads_created: meter
                .u64_counter("tcm.workloads.created")
                .with_description("Workload jobs created")
                .build(),
            errors: meter
                .u64_counter("tcm.reconcile.errors")
                .with_description("Failed reconcile invocations")
                .build(),
        }
    }

    pub fn from_global() -> Self {
        Self::new(&opentelemetry::global::meter("tcm-operator"))
    }
}

impl ReconcileMetrics for OtelCounters {
    fn resource_created(&self, kind: ChildKind) {
        self.resources_created
            .add(1, &[KeyValue::new("kind", kind.kind())]);
    }
    fn cluster_created(&self) {
        self.clusters_created.add(1, &[]);
    }
    fn workload_created(&self) {
        self.workloads_created.add(1, &[]);
    }
    fn reconcile_error(&self, stage: ReconcileStage) {
        self.errors.add(1, &[KeyValue::new("stage", stage.as_str())]);
    }
}

/// Fans out to the local counters and the OTel instruments.
pub struct OperatorMetrics {
    local: Arc<CounterSet>,
    otel: Option<OtelCounters>,
}

impl OperatorMetrics {
    pub fn new(local: Arc<CounterSet>, otel: Option<OtelCounters>) -> Self {
        Self { local, otel }
    }

    fn each(&self, f: impl Fn(&dyn ReconcileMetrics)) {
        f(self.local.as_ref());
        if let Some(o) = &self.otel {
            f(o);
        }
    }
}

impl ReconcileMetrics for OperatorMetrics {
    fn resource_created(&self, kind: ChildKind) {
        self.each(|m| m.resource_created(kind));
    }
    fn cluster_created(&self) {
        self.each(|m| m.cluster_created());
    }
    fn workload_created(&self) {
        self.each(|m| m.workload_created());
    }
    fn reconcile_error(&self, stage: ReconcileStage) {
        self.each(|m| m.reconcile_error(stage));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_render() {
        let set = Arc::new(CounterSet::new());
        let metrics = OperatorMetrics::new(set.clone(), None);
        metrics.resource_created(ChildKind::ComputeNetwork);
        metrics.resource_created(ChildKind::Job);
        metrics.cluster_created();
        metrics.reconcile_error(ReconcileStage::Dependency);

        assert_eq!(set.snapshot(), CounterSnapshot {
            resources_created: 2,
            clusters_created: 1,
            workloads_created: 0,
            errors: 1,
        });
        let text = set.render_prometheus();
        assert!(text.contains("tcm_resources_created_total{kind=\"Job\"} 1"));
        assert!(text.contains("tcm_clusters_created_total 1"));
        assert!(text.contains("tcm_reconcile_errors_total{stage=\"dependency\"} 1"));
    }

    #[test]
    fn otel_counters_work_without_exporter() {
        let otel = OtelCounters::from_global();
        let metrics = OperatorMetrics::new(Arc::new(CounterSet::new()), Some(otel));
        metrics.workload_created();
        metrics.reconcile_error(ReconcileStage::Completion);
    }
}
