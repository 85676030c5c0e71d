use envconfig::Envconfig;
use std::time::Duration;

use crate::access::{AdminBinding, SubjectKind};
use crate::templates::{DEFAULT_COLLECTOR_IMAGE, TemplateDefaults};

#[derive(Envconfig, Clone, Debug)]
pub struct TcmConfig {
    #[envconfig(from = "HTTP_PORT", default = "8088")]
    pub http_port: u16,

    /// Restrict watches to one namespace; all namespaces when unset or empty.
    /// Env: TCM_WATCH_NAMESPACE
    #[envconfig(from = "TCM_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Project used when a TestCluster omits `spec.project`.
    #[envconfig(from = "TCM_DEFAULT_PROJECT")]
    pub default_project: Option<String>,

    #[envconfig(from = "TCM_DEFAULT_TEMPLATE", default = "standard")]
    pub default_template: String,

    #[envconfig(nested)]
    pub admin: AdminConfig,

    #[envconfig(nested)]
    pub reconcile: ReconcileConfig,

    #[envconfig(nested)]
    pub workload: WorkloadConfig,

    /// Publish reports as Kubernetes Events (otherwise log only).
    #[envconfig(from = "TCM_EVENTS", default = "true")]
    pub events: bool,

    #[envconfig(from = "TCM_LOG_JSON", default = "false")]
    pub log_json: bool,
}

/// Subject granted cluster-admin inside every provisioned cluster.
#[derive(Envconfig, Clone, Debug)]
pub struct AdminConfig {
    #[envconfig(from = "TCM_ADMIN_SUBJECT", default = "tcm-operator")]
    pub subject: String,
    /// User | Group | ServiceAccount (`<ns>/<name>` subject)
    #[envconfig(from = "TCM_ADMIN_SUBJECT_KIND", default = "User")]
    pub subject_kind: String,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ReconcileConfig {
    /// Requeue delay after a failed invocation.
    #[envconfig(from = "TCM_ERROR_REQUEUE_SECS", default = "15")]
    pub error_requeue_secs: u64,
    /// Attempts for a status read-modify-write before giving up on conflicts.
    #[envconfig(from = "TCM_STATUS_UPDATE_ATTEMPTS", default = "5")]
    pub status_update_attempts: u32,
}

#[derive(Envconfig, Clone, Debug)]
pub struct WorkloadConfig {
    #[envconfig(from = "TCM_JOB_TTL_SECS", default = "3600")]
    pub job_ttl_secs: i32,
    #[envconfig(from = "TCM_COLLECTOR_IMAGE")]
    pub collector_image: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("TCM_STATUS_UPDATE_ATTEMPTS must be at least 1")]
    ZeroAttempts,
    #[error("TCM_ADMIN_SUBJECT_KIND: {0}")]
    SubjectKind(String),
    #[error("TCM_ADMIN_SUBJECT must not be empty")]
    EmptySubject,
    #[error("TCM_JOB_TTL_SECS must not be negative")]
    NegativeTtl,
}

impl TcmConfig {
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.reconcile.status_update_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.admin.subject.trim().is_empty() {
            return Err(ConfigError::EmptySubject);
        }
        self.admin
            .subject_kind
            .parse::<SubjectKind>()
            .map_err(ConfigError::SubjectKind)?;
        if self.workload.job_ttl_secs < 0 {
            return Err(ConfigError::NegativeTtl);
        }
        Ok(self)
    }

    pub fn watch_namespace(&self) -> Option<&str> {
        self.watch_namespace
            .as_deref()
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.reconcile.error_requeue_secs)
    }

    pub fn admin_binding(&self) -> AdminBinding {
        let kind = self
            .admin
            .subject_kind
            .parse()
            .unwrap_or(SubjectKind::User);
        AdminBinding::new(&self.admin.subject, kind)
    }

    pub fn template_defaults(&self) -> TemplateDefaults {
        TemplateDefaults {
            project: self
                .default_project
                .clone()
                .filter(|p| !p.trim().is_empty()),
            template: self.default_template.clone(),
            job_ttl_secs: self.workload.job_ttl_secs,
            collector_image: self
                .workload
                .collector_image
                .clone()
                .unwrap_or_else(|| DEFAULT_COLLECTOR_IMAGE.to_string()),
        }
    }
}
