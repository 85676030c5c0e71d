#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tcm_operator::access::{
    AccessError, AdminBinding, BindingOutcome, ClusterAccess,
};
use tcm_operator::children::{ChildKind, ObjectKey};
use tcm_operator::controller::completion::{
    ResourceVersionFilter, reconcile_job,
};
use tcm_operator::controller::creation::reconcile_request;
use tcm_operator::controller::dependency::reconcile_dependency;
use tcm_operator::controller::{
    ControllerContext, ReconcileErr, ReconcileSettings,
};
use tcm_operator::crd::{TestCluster, TestClusterSpec, WorkloadSpec};
use tcm_operator::metrics::CounterSet;
use tcm_operator::reporter::{
    ReportContext, ReportError, Severity, StatusSink,
};
use tcm_operator::store::{
    MemoryStore, ResourceStore, StoreEvent, WatchKind,
};
use tcm_operator::templates::{TemplateDefaults, TemplateManager};
use tokio::sync::broadcast::{self, error::TryRecvError};

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

pub const NS: &str = "ci";
pub const PROJECT: &str = "tcm-test";

/// Upper bound on events handled by one drain; a livelock fails the test
/// instead of hanging it.
const MAX_EVENTS: usize = 2_000;

#[derive(Clone, Debug)]
pub struct Report {
    pub severity: Severity,
    pub message: String,
    pub ctx: ReportContext,
}

#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<Report>>,
}

impl RecordingSink {
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }

    pub fn with_reason(&self, reason: &str) -> Vec<Report> {
        self.reports()
            .into_iter()
            .filter(|r| r.ctx.reason == reason)
            .collect()
    }

    pub fn errors(&self) -> Vec<Report> {
        self.reports()
            .into_iter()
            .filter(|r| r.severity == Severity::Error)
            .collect()
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn report(
        &self,
        severity: Severity,
        message: &str,
        ctx: &ReportContext,
    ) -> Result<(), ReportError> {
        self.reports.lock().unwrap().push(Report {
            severity,
            message: message.to_string(),
            ctx: ctx.clone(),
        });
        Ok(())
    }
}

/// In-memory stand-in for the provisioned clusters' RBAC API.
#[derive(Default)]
pub struct MemoryClusterAccess {
    bindings: Mutex<HashSet<(ObjectKey, String)>>,
    calls: Mutex<usize>,
}

impl MemoryClusterAccess {
    pub fn has_binding(&self, cluster: &ObjectKey, name: &str) -> bool {
        self.bindings
            .lock()
            .unwrap()
            .contains(&(cluster.clone(), name.to_string()))
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ClusterAccess for MemoryClusterAccess {
    async fn ensure_cluster_admin(
        &self,
        cluster: &ObjectKey,
        binding: &AdminBinding,
    ) -> Result<BindingOutcome, AccessError> {
        *self.calls.lock().unwrap() += 1;
        let inserted = self
            .bindings
            .lock()
            .unwrap()
            .insert((cluster.clone(), binding.name.clone()));
        Ok(if inserted {
            BindingOutcome::Created
        } else {
            BindingOutcome::AlreadyPresent
        })
    }
}

/// Errors returned by handlers while draining, tagged with the handler.
#[derive(Debug)]
pub struct HandlerError {
    pub handler: &'static str,
    pub key: ObjectKey,
    pub error: ReconcileErr,
}

/// Drives the handlers from the store's change feed the way the controller
/// runtime would, one event at a time.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub sink: Arc<RecordingSink>,
    pub counters: Arc<CounterSet>,
    pub access: Arc<MemoryClusterAccess>,
    pub ctx: ControllerContext,
    events: Mutex<broadcast::Receiver<StoreEvent>>,
    job_filter: ResourceVersionFilter,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let counters = Arc::new(CounterSet::new());
        let access = Arc::new(MemoryClusterAccess::default());
        let renderer = TemplateManager::new(TemplateDefaults {
            project: Some(PROJECT.to_string()),
            ..Default::default()
        });
        let ctx = ControllerContext {
            store: store.clone(),
            renderer: Arc::new(renderer),
            sink: sink.clone(),
            metrics: counters.clone(),
            access: access.clone(),
            settings: ReconcileSettings {
                error_requeue: Duration::from_millis(10),
                ..Default::default()
            },
        };
        let events = Mutex::new(store.subscribe());
        Self {
            store,
            sink,
            counters,
            access,
            ctx,
            events,
            job_filter: ResourceVersionFilter::new(),
        }
    }

    /// Handle every pending change notification, including the ones the
    /// handlers themselves cause, until the feed is quiet.
    pub async fn drain(&self) -> Vec<HandlerError> {
        let mut errors = Vec::new();
        for _ in 0..MAX_EVENTS {
            let next = self.events.lock().unwrap().try_recv();
            let event = match next {
                Ok(ev) => ev,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => {
                    return errors;
                }
                Err(TryRecvError::Lagged(n)) => {
                    panic!("harness lagged behind by {n} events")
                }
            };
            if let Some(e) = self.dispatch(event).await {
                errors.push(e);
            }
        }
        panic!("store never settled after {MAX_EVENTS} events");
    }

    async fn dispatch(&self, event: StoreEvent) -> Option<HandlerError> {
        let (kind, key) = match event {
            StoreEvent::Applied { kind, key } => (kind, key),
            StoreEvent::Deleted { kind, key } => {
                if kind == WatchKind::Child(ChildKind::Job) {
                    self.job_filter.forget(&key);
                }
                return None;
            }
        };
        let (handler, res) = match kind {
            WatchKind::Request => (
                "creation",
                reconcile_request(&self.ctx, &key).await.map(|_| ()),
            ),
            WatchKind::Child(ChildKind::Job) => {
                let rv = self
                    .store
                    .get_child(ChildKind::Job, &key)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|j| j.metadata.resource_version);
                if !self.job_filter.admit(&key, rv.as_deref()) {
                    return None;
                }
                ("completion", reconcile_job(&self.ctx, &key).await.map(|_| ()))
            }
            WatchKind::Child(k) if k.is_tracked() => (
                "dependency",
                reconcile_dependency(&self.ctx, k, &key).await.map(|_| ()),
            ),
            WatchKind::Child(_) => return None,
        };
        res.err().map(|error| HandlerError {
            handler,
            key,
            error,
        })
    }

    /// Insert a Request and run everything it triggers.
    pub async fn submit(&self, request: &TestCluster) -> TestCluster {
        let stored = self
            .store
            .insert_request(request)
            .await
            .expect("insert request");
        let errors = self.drain().await;
        assert!(errors.is_empty(), "unexpected handler errors: {errors:?}");
        self.store
            .get_request(&stored.key())
            .await
            .unwrap()
            .expect("request present after submit")
    }

    /// Jobs the completion filter still remembers.
    pub fn tracked_jobs(&self) -> usize {
        self.job_filter.len()
    }

    pub async fn request(&self, key: &ObjectKey) -> Option<TestCluster> {
        self.store.get_request(key).await.unwrap()
    }

    /// Report conditions on a child as its external manager would.
    pub async fn set_conditions(
        &self,
        kind: ChildKind,
        key: &ObjectKey,
        conditions: Value,
    ) {
        self.store
            .set_child_status(kind, key, json!({ "conditions": conditions }))
            .await
            .expect("set child status");
    }

    /// Mark every tracked dependency of `generated` as ready and drain.
    pub async fn make_ready(&self, generated: &str) -> Vec<HandlerError> {
        let key = ObjectKey::new(NS, generated);
        for kind in ChildKind::TRACKED {
            self.set_conditions(kind, &key, ready("UpToDate")).await;
        }
        self.drain().await
    }

    pub async fn complete_job(&self, name: &str) {
        self.store
            .set_child_status(
                ChildKind::Job,
                &ObjectKey::new(NS, name),
                json!({
                    "succeeded": 1,
                    "completionTime": "2024-05-01T12:00:00Z",
                    "conditions": [{"type": "Complete", "status": "True"}]
                }),
            )
            .await
            .expect("complete job");
    }

    pub async fn fail_job(&self, name: &str) {
        self.store
            .set_child_status(
                ChildKind::Job,
                &ObjectKey::new(NS, name),
                json!({
                    "failed": 2,
                    "conditions": [{"type": "Failed", "status": "True", "reason": "BackoffLimitExceeded"}]
                }),
            )
            .await
            .expect("fail job");
    }
}

pub fn condition(status: &str, reason: &str) -> Value {
    json!([{
        "type": "Ready",
        "status": status,
        "reason": reason,
        "message": format!("{reason} reported"),
        "lastTransitionTime": "2024-05-01T12:00:00Z"
    }])
}

pub fn ready(reason: &str) -> Value {
    condition("True", reason)
}

pub fn spec(location: &str, nodes: i32) -> TestClusterSpec {
    TestClusterSpec {
        location: location.to_string(),
        nodes,
        ..Default::default()
    }
}

pub fn workload() -> WorkloadSpec {
    WorkloadSpec {
        image: "ghcr.io/example/e2e-suite:1.4".into(),
        command: vec!["/run-tests".into()],
        args: vec!["--focus".into(), "smoke".into()],
        env: BTreeMap::from([("SUITE".to_string(), "smoke".to_string())]),
        backoff_limit: Some(0),
        observability: false,
    }
}

pub fn test_cluster(name: &str, spec: TestClusterSpec) -> TestCluster {
    let mut tc = TestCluster::new(name, spec);
    tc.metadata.namespace = Some(NS.to_string());
    tc
}

pub fn generated(tc: &TestCluster) -> String {
    tc.generated_name()
        .expect("generated name assigned")
        .to_string()
}

pub fn is_generated_for(base: &str, name: &str) -> bool {
    let Some(suffix) = name
        .strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('-'))
    else {
        return false;
    };
    suffix.len() == 5
        && suffix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}
