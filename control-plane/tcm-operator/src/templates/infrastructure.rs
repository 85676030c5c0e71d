//! Config Connector manifests for the first tier.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{Value, json};
use std::collections::BTreeMap;

use super::{Manifest, RenderContext, TemplateError};
use crate::children::ChildKind;

pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_CLUSTER: &str = "tcm.dev/cluster";
pub const MANAGED_BY: &str = "tcm";

const ANNOTATION_PROJECT: &str = "cnrm.cloud.google.com/project-id";
const ANNOTATION_REMOVE_DEFAULT_POOL: &str =
    "cnrm.cloud.google.com/remove-default-node-pool";

const NODE_CIDR: &str = "10.10.0.0/20";
const POD_RANGE: (&str, &str) = ("pods", "10.20.0.0/14");
const SERVICE_RANGE: (&str, &str) = ("services", "10.24.0.0/20");
const MASTER_CIDR: &str = "172.16.0.32/28";

/// Node pool variations between templates.
#[derive(Clone, Copy, Debug, Default)]
pub struct NodePoolProfile {
    pub spot: bool,
    pub auto_upgrade: bool,
}

pub fn labels(generated_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
        (LABEL_CLUSTER.to_string(), generated_name.to_string()),
    ])
}

fn meta(ctx: &RenderContext<'_>) -> ObjectMeta {
    ObjectMeta {
        name: Some(ctx.generated_name.to_string()),
        labels: Some(labels(ctx.generated_name)),
        annotations: Some(BTreeMap::from([(
            ANNOTATION_PROJECT.to_string(),
            ctx.project.to_string(),
        )])),
        ..Default::default()
    }
}

/// `europe-west2-b` → `europe-west2`; regions pass through.
pub fn region_of(location: &str) -> &str {
    match location.rsplit_once('-') {
        Some((region, zone))
            if zone.len() == 1
                && zone.chars().all(|c| c.is_ascii_lowercase())
                && region.contains('-') =>
        {
            region
        }
        _ => location,
    }
}

pub fn render_with(
    ctx: &RenderContext<'_>,
    profile: NodePoolProfile,
) -> Result<Vec<Manifest>, TemplateError> {
    Ok(vec![
        network(ctx),
        subnetwork(ctx),
        cluster(ctx),
        node_pool(ctx, profile),
        access_binding(ctx),
    ])
}

fn name_ref(name: &str) -> Value {
    json!({ "name": name })
}

fn network(ctx: &RenderContext<'_>) -> Manifest {
    Manifest::new(ChildKind::ComputeNetwork, meta(ctx)).with(
        "spec",
        json!({
            "autoCreateSubnetworks": false,
            "routingMode": "REGIONAL",
            "description": format!("tcm test network {}", ctx.generated_name),
        }),
    )
}

fn subnetwork(ctx: &RenderContext<'_>) -> Manifest {
    Manifest::new(ChildKind::ComputeSubnetwork, meta(ctx)).with(
        "spec",
        json!({
            "ipCidrRange": NODE_CIDR,
            "region": region_of(&ctx.spec.location),
            "networkRef": name_ref(ctx.generated_name),
            "privateIpGoogleAccess": ctx.spec.private_nodes,
            "secondaryIpRange": [
                {"rangeName": POD_RANGE.0, "ipCidrRange": POD_RANGE.1},
                {"rangeName": SERVICE_RANGE.0, "ipCidrRange": SERVICE_RANGE.1},
            ],
        }),
    )
}

fn cluster(ctx: &RenderContext<'_>) -> Manifest {
    let mut metadata = meta(ctx);
    if let Some(a) = metadata.annotations.as_mut() {
        a.insert(ANNOTATION_REMOVE_DEFAULT_POOL.to_string(), "true".to_string());
    }
    let mut spec = json!({
        "location": ctx.spec.location,
        "initialNodeCount": 1,
        "networkRef": name_ref(ctx.generated_name),
        "subnetworkRef": name_ref(ctx.generated_name),
        "networkingMode": "VPC_NATIVE",
        "ipAllocationPolicy": {
            "clusterSecondaryRangeName": POD_RANGE.0,
            "servicesSecondaryRangeName": SERVICE_RANGE.0,
        },
        "releaseChannel": {"channel": "REGULAR"},
        "workloadIdentityConfig": {
            "workloadPool": format!("{}.svc.id.goog", ctx.project),
        },
    });
    if ctx.spec.private_nodes {
        spec["privateClusterConfig"] = json!({
            "enablePrivateNodes": true,
            "enablePrivateEndpoint": false,
            "masterIpv4CidrBlock": MASTER_CIDR,
        });
    }
    Manifest::new(ChildKind::ContainerCluster, metadata).with("spec", spec)
}

fn node_pool(ctx: &RenderContext<'_>, profile: NodePoolProfile) -> Manifest {
    Manifest::new(ChildKind::ContainerNodePool, meta(ctx)).with(
        "spec",
        json!({
            "location": ctx.spec.location,
            "clusterRef": name_ref(ctx.generated_name),
            "nodeCount": ctx.spec.nodes,
            "management": {
                "autoRepair": true,
                "autoUpgrade": profile.auto_upgrade,
            },
            "nodeConfig": {
                "machineType": ctx.spec.machine_type(),
                "spot": profile.spot,
                "oauthScopes": ["https://www.googleapis.com/auth/cloud-platform"],
                "workloadMetadataConfig": {"mode": "GKE_METADATA"},
                "labels": {LABEL_CLUSTER: ctx.generated_name},
            },
        }),
    )
}

/// Workload identity of the test Job may write metrics and logs.
fn access_binding(ctx: &RenderContext<'_>) -> Manifest {
    Manifest::new(ChildKind::IAMPolicyMember, meta(ctx)).with(
        "spec",
        json!({
            "member": format!(
                "serviceAccount:{}.svc.id.goog[default/{}]",
                ctx.project, ctx.generated_name
            ),
            "role": "roles/monitoring.metricWriter",
            "resourceRef": {
                "kind": "Project",
                "external": format!("projects/{}", ctx.project),
            },
        }),
    )
}
