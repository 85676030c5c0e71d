use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::v1alpha1;
use crate::children::ObjectKey;
use crate::conditions::{Condition, DependencyConditions};

pub const API_GROUP: &str = "tcm.dev";
pub const STORAGE_VERSION: &str = "v1beta1";
pub const DEFAULT_MACHINE_TYPE: &str = "e2-standard-4";

/// Ephemeral test cluster request (storage version).
#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq,
)]
#[kube(
    group = "tcm.dev",
    version = "v1beta1",
    kind = "TestCluster",
    plural = "testclusters",
    shortname = "tc",
    namespaced,
    status = "TestClusterStatus",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".status.generatedName"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TestClusterSpec {
    /// Cloud project; the operator default applies when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Zone or region, e.g. `europe-west2-b`.
    #[serde(default)]
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
    #[serde(default = "default_nodes")]
    pub nodes: i32,
    /// Template selector (`standard`, `spot`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default)]
    pub private_nodes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<WorkloadSpec>,
}

fn default_nodes() -> i32 {
    1
}

impl Default for TestClusterSpec {
    fn default() -> Self {
        Self {
            project: None,
            location: String::new(),
            machine_type: None,
            nodes: default_nodes(),
            template: None,
            private_nodes: false,
            workload: None,
        }
    }
}

impl TestClusterSpec {
    pub fn machine_type(&self) -> &str {
        self.machine_type.as_deref().unwrap_or(DEFAULT_MACHINE_TYPE)
    }
}

#[derive(
    Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq,
)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_limit: Option<i32>,
    /// Render the observability collector sidecar and its ConfigMap.
    #[serde(default)]
    pub observability: bool,
}

#[derive(
    Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq,
)]
#[serde(rename_all = "camelCase")]
pub struct TestClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependency_conditions: DependencyConditions,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_name: Option<String>,
}

impl TestCluster {
    pub fn generated_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.generated_name.as_deref())
            .filter(|n| !n.is_empty())
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(
            self.namespace().unwrap_or_else(|| "default".to_string()),
            self.name_any(),
        )
    }
}

/// Decode a stored Request of any served version into the storage version.
pub fn decode_request(value: Value) -> Result<TestCluster, serde_json::Error> {
    let api_version = value
        .get("apiVersion")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if api_version == format!("{API_GROUP}/v1alpha1") {
        let old: v1alpha1::TestCluster = serde_json::from_value(value)?;
        return Ok(old.into());
    }
    serde_json::from_value(value)
}
