//! Historical `v1alpha1` shape of `TestCluster`, still served by the CRD.
//!
//! Conversion into the storage version is one-directional and total:
//! - `zone` becomes `location`
//! - `nodeCount` becomes `nodes` (absent: 1)
//! - `jobImage` + `jobCommand` become `workload` (no image: no workload)
//! - `privateNodes` did not exist and converts to `false`
//! - `clusterName` fills both `generatedName` and `clusterName`

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::test_cluster as v1beta1;
use crate::conditions::Condition;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "tcm.dev",
    version = "v1alpha1",
    kind = "TestCluster",
    plural = "testclusters",
    shortname = "tc",
    namespaced,
    status = "TestClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TestClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default)]
    pub zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_count: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub job_command: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct TestClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl From<TestClusterSpec> for v1beta1::TestClusterSpec {
    fn from(old: TestClusterSpec) -> Self {
        let workload = old.job_image.map(|image| v1beta1::WorkloadSpec {
            image,
            command: old.job_command,
            ..Default::default()
        });
        Self {
            project: old.project,
            location: old.zone,
            machine_type: old.machine_type,
            nodes: old.node_count.unwrap_or(1),
            template: None,
            private_nodes: false,
            workload,
        }
    }
}

impl From<TestClusterStatus> for v1beta1::TestClusterStatus {
    fn from(old: TestClusterStatus) -> Self {
        Self {
            generated_name: old.cluster_name.clone(),
            cluster_name: old.cluster_name,
            conditions: old.conditions,
            ..Default::default()
        }
    }
}

impl From<TestCluster> for v1beta1::TestCluster {
    fn from(old: TestCluster) -> Self {
        let mut converted = v1beta1::TestCluster::new("", old.spec.into());
        converted.metadata = old.metadata;
        converted.status = old.status.map(Into::into);
        converted
    }
}
