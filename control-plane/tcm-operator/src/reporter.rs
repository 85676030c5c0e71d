use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::{error, info, warn};

use crate::children::ObjectKey;
use crate::crd::TestCluster;

pub const REASON_CREATED: &str = "Created";
pub const REASON_WORKLOAD_CREATED: &str = "WorkloadCreated";
pub const REASON_WORKLOAD_COMPLETED: &str = "WorkloadCompleted";
pub const REASON_WORKLOAD_FAILED: &str = "WorkloadFailed";
pub const REASON_RECONCILE_ERROR: &str = "ReconcileError";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// What a report is about: the Request it belongs to plus an optional
/// subject (the child resource that triggered it).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportContext {
    pub request: ObjectKey,
    pub request_uid: Option<String>,
    pub reason: String,
    pub subject: Option<String>,
}

impl ReportContext {
    pub fn new(request: ObjectKey, reason: &str) -> Self {
        Self {
            request,
            request_uid: None,
            reason: reason.to_string(),
            subject: None,
        }
    }

    pub fn for_request(request: &TestCluster, reason: &str) -> Self {
        Self {
            request: request.key(),
            request_uid: request.meta().uid.clone(),
            reason: reason.to_string(),
            subject: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to publish report: {0}")]
    Publish(String),
}

#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn report(
        &self,
        severity: Severity,
        message: &str,
        ctx: &ReportContext,
    ) -> Result<(), ReportError>;
}

/// Report and swallow failures; reporting never fails a reconcile.
pub async fn report_best_effort(
    sink: &dyn StatusSink,
    severity: Severity,
    message: &str,
    ctx: &ReportContext,
) {
    if let Err(e) = sink.report(severity, message, ctx).await {
        warn!(request = %ctx.request, reason = %ctx.reason, error = %e, "status report dropped");
    }
}

/// Logs reports through `tracing` only.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

#[async_trait]
impl StatusSink for LogSink {
    async fn report(
        &self,
        severity: Severity,
        message: &str,
        ctx: &ReportContext,
    ) -> Result<(), ReportError> {
        let subject = ctx.subject.as_deref().unwrap_or("-");
        match severity {
            Severity::Info => {
                info!(request = %ctx.request, reason = %ctx.reason, %subject, "{message}")
            }
            Severity::Warning => {
                warn!(request = %ctx.request, reason = %ctx.reason, %subject, "{message}")
            }
            Severity::Error => {
                error!(request = %ctx.request, reason = %ctx.reason, %subject, "{message}")
            }
        }
        Ok(())
    }
}

/// Publishes reports as Kubernetes Events on the Request.
#[derive(Clone)]
pub struct EventSink {
    recorder: Recorder,
}

impl EventSink {
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

fn request_ref(ctx: &ReportContext) -> ObjectReference {
    ObjectReference {
        api_version: Some(TestCluster::api_version(&()).to_string()),
        kind: Some(TestCluster::kind(&()).to_string()),
        name: Some(ctx.request.name.clone()),
        namespace: Some(ctx.request.namespace.clone()),
        uid: ctx.request_uid.clone(),
        ..Default::default()
    }
}

#[async_trait]
impl StatusSink for EventSink {
    async fn report(
        &self,
        severity: Severity,
        message: &str,
        ctx: &ReportContext,
    ) -> Result<(), ReportError> {
        let type_ = match severity {
            Severity::Info => EventType::Normal,
            Severity::Warning | Severity::Error => EventType::Warning,
        };
        let note = match &ctx.subject {
            Some(s) => format!("{s}: {message}"),
            None => message.to_string(),
        };
        self.recorder
            .publish(
                &Event {
                    type_,
                    reason: ctx.reason.clone(),
                    note: Some(note),
                    action: "Reconcile".into(),
                    secondary: None,
                },
                &request_ref(ctx),
            )
            .await
            .map_err(|e| ReportError::Publish(e.to_string()))
    }
}
