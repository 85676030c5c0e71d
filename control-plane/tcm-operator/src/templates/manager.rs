use super::{Manifest, SpotTemplate, StandardTemplate, TemplateError, workload};
use crate::crd::{TestClusterSpec, WorkloadSpec};

pub const DEFAULT_COLLECTOR_IMAGE: &str =
    "otel/opentelemetry-collector-contrib:0.111.0";

/// Renders the child manifests of a Request. Implementations must be pure:
/// the same (spec, generated name) always yields the same manifests.
pub trait ManifestRenderer: Send + Sync {
    /// First tier: network, subnetwork, cluster, node pool, access binding.
    fn render_infrastructure(
        &self,
        spec: &TestClusterSpec,
        generated_name: &str,
    ) -> Result<Vec<Manifest>, TemplateError>;

    /// Workload tier: the batch Job plus optional observability resources.
    fn render_workload(
        &self,
        spec: &TestClusterSpec,
        generated_name: &str,
    ) -> Result<Vec<Manifest>, TemplateError>;

    /// Number of tracked dependencies the first tier produces.
    fn expected_dependencies(
        &self,
        spec: &TestClusterSpec,
        generated_name: &str,
    ) -> Result<usize, TemplateError> {
        Ok(self
            .render_infrastructure(spec, generated_name)?
            .iter()
            .filter(|m| m.kind.is_tracked())
            .count())
    }
}

pub trait Template: std::fmt::Debug {
    fn name(&self) -> &'static str;
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }
    fn render_infrastructure(
        &self,
        ctx: &RenderContext<'_>,
    ) -> Result<Vec<Manifest>, TemplateError>;
    fn render_workload(
        &self,
        ctx: &RenderContext<'_>,
    ) -> Result<Vec<Manifest>, TemplateError> {
        workload::render_workload(ctx)
    }
}

#[derive(Clone, Debug)]
pub struct TemplateDefaults {
    pub project: Option<String>,
    pub template: String,
    pub job_ttl_secs: i32,
    pub collector_image: String,
}

impl Default for TemplateDefaults {
    fn default() -> Self {
        Self {
            project: None,
            template: "standard".to_string(),
            job_ttl_secs: 3600,
            collector_image: DEFAULT_COLLECTOR_IMAGE.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RenderContext<'a> {
    pub spec: &'a TestClusterSpec,
    pub generated_name: &'a str,
    pub project: &'a str,
    pub defaults: &'a TemplateDefaults,
}

impl RenderContext<'_> {
    pub fn workload(&self) -> Result<&WorkloadSpec, TemplateError> {
        let wl = self
            .spec
            .workload
            .as_ref()
            .ok_or(TemplateError::MissingField("workload"))?;
        if wl.image.trim().is_empty() {
            return Err(TemplateError::MissingField("workload.image"));
        }
        Ok(wl)
    }
}

#[derive(Debug)]
pub struct TemplateManager {
    templates: Vec<Box<dyn Template + Send + Sync>>,
    defaults: TemplateDefaults,
}

impl TemplateManager {
    pub fn new(defaults: TemplateDefaults) -> Self {
        let templates: Vec<Box<dyn Template + Send + Sync>> = vec![
            Box::new(StandardTemplate),
            Box::new(SpotTemplate),
        ];
        Self {
            templates,
            defaults,
        }
    }

    pub fn defaults(&self) -> &TemplateDefaults {
        &self.defaults
    }

    fn find(&self, hint: &str) -> Option<&(dyn Template + Send + Sync)> {
        self.templates
            .iter()
            .find(|t| {
                t.name().eq_ignore_ascii_case(hint)
                    || t.aliases().iter().any(|a| a.eq_ignore_ascii_case(hint))
            })
            .map(|t| t.as_ref())
    }

    /// Explicit selector first, then the configured default, then the first
    /// registered template.
    pub fn select_template(
        &self,
        spec: &TestClusterSpec,
    ) -> &(dyn Template + Send + Sync) {
        spec.template
            .as_deref()
            .and_then(|h| self.find(h))
            .or_else(|| self.find(&self.defaults.template))
            .unwrap_or_else(|| self.templates[0].as_ref())
    }

    fn context<'a>(
        &'a self,
        spec: &'a TestClusterSpec,
        generated_name: &'a str,
    ) -> Result<RenderContext<'a>, TemplateError> {
        if generated_name.is_empty() {
            return Err(TemplateError::MissingField("generatedName"));
        }
        if spec.location.trim().is_empty() {
            return Err(TemplateError::MissingField("location"));
        }
        if spec.nodes < 1 {
            return Err(TemplateError::Invalid {
                field: "nodes",
                reason: format!("must be at least 1, got {}", spec.nodes),
            });
        }
        let project = spec
            .project
            .as_deref()
            .or(self.defaults.project.as_deref())
            .filter(|p| !p.trim().is_empty())
            .ok_or(TemplateError::MissingField("project"))?;
        Ok(RenderContext {
            spec,
            generated_name,
            project,
            defaults: &self.defaults,
        })
    }
}

impl ManifestRenderer for TemplateManager {
    fn render_infrastructure(
        &self,
        spec: &TestClusterSpec,
        generated_name: &str,
    ) -> Result<Vec<Manifest>, TemplateError> {
        let ctx = self.context(spec, generated_name)?;
        self.select_template(spec).render_infrastructure(&ctx)
    }

    fn render_workload(
        &self,
        spec: &TestClusterSpec,
        generated_name: &str,
    ) -> Result<Vec<Manifest>, TemplateError> {
        let ctx = self.context(spec, generated_name)?;
        self.select_template(spec).render_workload(&ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::children::ChildKind;
    use crate::crd::WorkloadSpec;

    fn spec() -> TestClusterSpec {
        TestClusterSpec {
            project: Some("proj".into()),
            location: "europe-west2-b".into(),
            nodes: 2,
            ..Default::default()
        }
    }

    fn tm() -> TemplateManager {
        TemplateManager::new(TemplateDefaults::default())
    }

    #[test]
    fn selects_by_hint_then_default() {
        let tm = tm();
        let mut s = spec();
        assert_eq!(tm.select_template(&s).name(), "standard");
        s.template = Some("SPOT".into());
        assert_eq!(tm.select_template(&s).name(), "spot");
        s.template = Some("preemptible".into());
        assert_eq!(tm.select_template(&s).name(), "spot");
        s.template = Some("gpu".into());
        assert_eq!(tm.select_template(&s).name(), "standard");
    }

    #[test]
    fn first_tier_has_five_tracked_manifests_named_after_cluster() {
        let out = tm().render_infrastructure(&spec(), "r1-abcde").unwrap();
        let kinds: Vec<ChildKind> = out.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, ChildKind::TRACKED.to_vec());
        assert!(out.iter().all(|m| m.name() == "r1-abcde"));
        assert_eq!(tm().expected_dependencies(&spec(), "r1-abcde").unwrap(), 5);
    }

    #[test]
    fn rendering_is_deterministic() {
        let mut s = spec();
        s.workload = Some(WorkloadSpec {
            image: "busybox".into(),
            observability: true,
            env: [("B", "2"), ("A", "1")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        });
        let tm = tm();
        let serialize = |out: Vec<Manifest>| -> Vec<String> {
            out.iter()
                .map(|m| serde_json::to_string(&m.to_value().unwrap()).unwrap())
                .collect()
        };
        assert_eq!(
            serialize(tm.render_infrastructure(&s, "r1-abcde").unwrap()),
            serialize(tm.render_infrastructure(&s, "r1-abcde").unwrap())
        );
        assert_eq!(
            serialize(tm.render_workload(&s, "r1-abcde").unwrap()),
            serialize(tm.render_workload(&s, "r1-abcde").unwrap())
        );
    }

    #[test]
    fn missing_fields_surface_as_errors() {
        let tm = tm();
        let mut s = spec();
        s.project = None;
        assert!(matches!(
            tm.render_infrastructure(&s, "r1-abcde"),
            Err(TemplateError::MissingField("project"))
        ));

        let tm_default = TemplateManager::new(TemplateDefaults {
            project: Some("fallback".into()),
            ..Default::default()
        });
        assert!(tm_default.render_infrastructure(&s, "r1-abcde").is_ok());

        let mut s = spec();
        s.location.clear();
        assert!(matches!(
            tm.render_infrastructure(&s, "r1-abcde"),
            Err(TemplateError::MissingField("location"))
        ));

        let mut s = spec();
        s.nodes = 0;
        assert!(matches!(
            tm.render_infrastructure(&s, "r1-abcde"),
            Err(TemplateError::Invalid { field: "nodes", .. })
        ));

        assert!(matches!(
            tm.render_workload(&spec(), "r1-abcde"),
            Err(TemplateError::MissingField("workload"))
        ));
    }
}
