use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EnvVar, PodSpec,
    PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

use super::infrastructure::labels;
use super::{Manifest, RenderContext, TemplateError};
use crate::children::ChildKind;

pub const WORKLOAD_CONTAINER: &str = "workload";
pub const COLLECTOR_CONTAINER: &str = "otel-collector";
const COLLECTOR_CONFIG_KEY: &str = "collector.yaml";
const COLLECTOR_MOUNT: &str = "/etc/otelcol";
const COLLECTOR_VOLUME: &str = "collector-config";

pub fn collector_config_name(generated_name: &str) -> String {
    format!("{generated_name}-collector")
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn collector_config(ctx: &RenderContext<'_>) -> String {
    format!(
        "receivers:\n  otlp:\n    protocols:\n      grpc:\n        endpoint: 0.0.0.0:4317\nprocessors:\n  batch: {{}}\n  resource:\n    attributes:\n      - key: tcm.cluster\n        value: {name}\n        action: upsert\nexporters:\n  googlecloud:\n    project: {project}\nservice:\n  pipelines:\n    metrics:\n      receivers: [otlp]\n      processors: [resource, batch]\n      exporters: [googlecloud]\n    traces:\n      receivers: [otlp]\n      processors: [resource, batch]\n      exporters: [googlecloud]\n",
        name = ctx.generated_name,
        project = ctx.project,
    )
}

/// Render the batch Job and, when observability is requested, the collector
/// ConfigMap and native sidecar. The ConfigMap comes first so the Job's
/// volume resolves on creation.
pub fn render_workload(
    ctx: &RenderContext<'_>,
) -> Result<Vec<Manifest>, TemplateError> {
    let wl = ctx.workload()?;
    let name = ctx.generated_name;
    let lbls = labels(name);

    let mut env = vec![
        env_var("TCM_CLUSTER_NAME", name),
        env_var("TCM_PROJECT", ctx.project),
        env_var("TCM_LOCATION", &ctx.spec.location),
    ];
    env.extend(wl.env.iter().map(|(k, v)| env_var(k, v)));

    let mut main = Container {
        name: WORKLOAD_CONTAINER.to_string(),
        image: Some(wl.image.clone()),
        command: (!wl.command.is_empty()).then(|| wl.command.clone()),
        args: (!wl.args.is_empty()).then(|| wl.args.clone()),
        ..Default::default()
    };

    let mut out = Vec::new();
    let mut init_containers = None;
    let mut volumes = None;

    if wl.observability {
        let cm_name = collector_config_name(name);
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(cm_name.clone()),
                labels: Some(lbls.clone()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                COLLECTOR_CONFIG_KEY.to_string(),
                collector_config(ctx),
            )])),
            ..Default::default()
        };
        out.push(Manifest::from_resource(ChildKind::ConfigMap, &cm)?);

        env.push(env_var(
            "OTEL_EXPORTER_OTLP_ENDPOINT",
            "http://localhost:4317",
        ));
        init_containers = Some(vec![Container {
            name: COLLECTOR_CONTAINER.to_string(),
            image: Some(ctx.defaults.collector_image.clone()),
            args: Some(vec![format!(
                "--config={COLLECTOR_MOUNT}/{COLLECTOR_CONFIG_KEY}"
            )]),
            restart_policy: Some("Always".to_string()),
            volume_mounts: Some(vec![VolumeMount {
                name: COLLECTOR_VOLUME.to_string(),
                mount_path: COLLECTOR_MOUNT.to_string(),
                read_only: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        }]);
        volumes = Some(vec![Volume {
            name: COLLECTOR_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: cm_name,
                ..Default::default()
            }),
            ..Default::default()
        }]);
    }
    main.env = Some(env);

    let job = Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(lbls.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: wl.backoff_limit,
            ttl_seconds_after_finished: Some(ctx.defaults.job_ttl_secs),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(lbls),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    init_containers,
                    containers: vec![main],
                    volumes,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    };
    out.push(Manifest::from_resource(ChildKind::Job, &job)?);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{TestClusterSpec, WorkloadSpec};
    use crate::templates::TemplateDefaults;

    fn render(spec: &TestClusterSpec) -> Vec<Manifest> {
        let defaults = TemplateDefaults {
            job_ttl_secs: 600,
            ..Default::default()
        };
        let ctx = RenderContext {
            spec,
            generated_name: "r1-abcde",
            project: "proj",
            defaults: &defaults,
        };
        render_workload(&ctx).unwrap()
    }

    fn spec(observability: bool) -> TestClusterSpec {
        TestClusterSpec {
            location: "europe-west2-b".into(),
            workload: Some(WorkloadSpec {
                image: "ghcr.io/acme/e2e:1".into(),
                command: vec!["run-tests".into()],
                env: BTreeMap::from([("SUITE".to_string(), "smoke".to_string())]),
                backoff_limit: Some(0),
                observability,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn plain_workload_is_a_single_job() {
        let out = render(&spec(false));
        assert_eq!(out.len(), 1);
        let job = &out[0];
        assert_eq!(job.kind, ChildKind::Job);
        assert_eq!(job.name(), "r1-abcde");
        let s = &job.body["spec"];
        assert_eq!(s["ttlSecondsAfterFinished"], 600);
        assert_eq!(s["backoffLimit"], 0);
        let pod = &s["template"]["spec"];
        assert_eq!(pod["restartPolicy"], "Never");
        assert!(pod.get("initContainers").is_none());
        let env = pod["containers"][0]["env"].as_array().unwrap();
        assert_eq!(env[0]["name"], "TCM_CLUSTER_NAME");
        assert_eq!(env[0]["value"], "r1-abcde");
        assert!(env.iter().any(|e| e["name"] == "SUITE"));
    }

    #[test]
    fn observability_adds_configmap_and_sidecar() {
        let out = render(&spec(true));
        let kinds: Vec<ChildKind> = out.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![ChildKind::ConfigMap, ChildKind::Job]);
        assert_eq!(out[0].name(), "r1-abcde-collector");
        let pod = &out[1].body["spec"]["template"]["spec"];
        assert_eq!(pod["initContainers"][0]["restartPolicy"], "Always");
        assert_eq!(pod["volumes"][0]["configMap"]["name"], "r1-abcde-collector");
    }
}
