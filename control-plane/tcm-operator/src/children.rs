use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::core::{ApiResource, GroupVersionKind};
use serde_json::Value;
use std::fmt;

use crate::conditions::{self, Condition};

/// Namespaced identity of an object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn from_meta(meta: &ObjectMeta) -> Option<Self> {
        Some(Self::new(
            meta.namespace.clone().unwrap_or_else(|| "default".to_string()),
            meta.name.clone()?,
        ))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Every resource kind the operator creates on behalf of a Request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChildKind {
    ComputeNetwork,
    ComputeSubnetwork,
    ContainerCluster,
    ContainerNodePool,
    IAMPolicyMember,
    Job,
    ConfigMap,
}

impl ChildKind {
    /// Kinds that participate in readiness and get a dependency watcher.
    pub const TRACKED: [ChildKind; 5] = [
        ChildKind::ComputeNetwork,
        ChildKind::ComputeSubnetwork,
        ChildKind::ContainerCluster,
        ChildKind::ContainerNodePool,
        ChildKind::IAMPolicyMember,
    ];

    pub const ALL: [ChildKind; 7] = [
        ChildKind::ComputeNetwork,
        ChildKind::ComputeSubnetwork,
        ChildKind::ContainerCluster,
        ChildKind::ContainerNodePool,
        ChildKind::IAMPolicyMember,
        ChildKind::Job,
        ChildKind::ConfigMap,
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            ChildKind::ComputeNetwork => "ComputeNetwork",
            ChildKind::ComputeSubnetwork => "ComputeSubnetwork",
            ChildKind::ContainerCluster => "ContainerCluster",
            ChildKind::ContainerNodePool => "ContainerNodePool",
            ChildKind::IAMPolicyMember => "IAMPolicyMember",
            ChildKind::Job => "Job",
            ChildKind::ConfigMap => "ConfigMap",
        }
    }

    pub fn group(&self) -> &'static str {
        match self {
            ChildKind::ComputeNetwork | ChildKind::ComputeSubnetwork => {
                "compute.cnrm.cloud.google.com"
            }
            ChildKind::ContainerCluster | ChildKind::ContainerNodePool => {
                "container.cnrm.cloud.google.com"
            }
            ChildKind::IAMPolicyMember => "iam.cnrm.cloud.google.com",
            ChildKind::Job => "batch",
            ChildKind::ConfigMap => "",
        }
    }

    pub fn version(&self) -> &'static str {
        match self {
            ChildKind::Job | ChildKind::ConfigMap => "v1",
            _ => "v1beta1",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ChildKind::ComputeNetwork => "computenetworks",
            ChildKind::ComputeSubnetwork => "computesubnetworks",
            ChildKind::ContainerCluster => "containerclusters",
            ChildKind::ContainerNodePool => "containernodepools",
            ChildKind::IAMPolicyMember => "iampolicymembers",
            ChildKind::Job => "jobs",
            ChildKind::ConfigMap => "configmaps",
        }
    }

    pub fn api_version(&self) -> String {
        if self.group().is_empty() {
            self.version().to_string()
        } else {
            format!("{}/{}", self.group(), self.version())
        }
    }

    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(self.group(), self.version(), self.kind());
        ApiResource::from_gvk_with_plural(&gvk, self.plural())
    }

    pub fn is_tracked(&self) -> bool {
        Self::TRACKED.contains(self)
    }

    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.kind() == kind)
    }

    /// Key used in a Request's `dependencyConditions`.
    pub fn dependency_key(&self, key: &ObjectKey) -> String {
        format!("{}:{}", self.kind(), key)
    }
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
}

/// Typed partial view of a child resource, decoded at the store boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct ChildObject {
    pub kind: ChildKind,
    pub metadata: ObjectMeta,
    /// `None` while the resource has no `status` yet.
    pub conditions: Option<Vec<Condition>>,
    pub completion_time: Option<String>,
}

impl ChildObject {
    pub fn from_value(
        kind: ChildKind,
        value: &Value,
    ) -> Result<Self, serde_json::Error> {
        let metadata: ObjectMeta = serde_json::from_value(
            value.get("metadata").cloned().unwrap_or(Value::Null),
        )?;
        let status = value.get("status").filter(|s| !s.is_null());
        let conditions = match status {
            Some(s) => Some(match s.get("conditions") {
                Some(c) if !c.is_null() => {
                    serde_json::from_value::<Vec<Condition>>(c.clone())?
                }
                _ => Vec::new(),
            }),
            None => None,
        };
        let completion_time = status
            .and_then(|s| s.get("completionTime"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Self {
            kind,
            metadata,
            conditions,
            completion_time,
        })
    }

    pub fn key(&self) -> Option<ObjectKey> {
        ObjectKey::from_meta(&self.metadata)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn owner_references(&self) -> &[OwnerReference] {
        self.metadata.owner_references.as_deref().unwrap_or(&[])
    }

    /// Observed conditions, `None` when not yet populated or empty.
    pub fn observed_conditions(&self) -> Option<&[Condition]> {
        self.conditions.as_deref().filter(|c| !c.is_empty())
    }

    pub fn terminal_state(&self) -> Option<JobOutcome> {
        if self.completion_time.is_some() {
            return Some(JobOutcome::Completed);
        }
        let failed = self
            .conditions
            .as_deref()
            .map(|c| conditions::is_true(c, conditions::FAILED))
            .unwrap_or(false);
        failed.then_some(JobOutcome::Failed)
    }
}
