use super::infrastructure::{NodePoolProfile, render_with};
use super::manager::{RenderContext, Template};
use super::{Manifest, TemplateError};

/// Spot nodes, automatic upgrades off.
#[derive(Clone, Debug, Default)]
pub struct SpotTemplate;

impl Template for SpotTemplate {
    fn name(&self) -> &'static str {
        "spot"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["preemptible"]
    }
    fn render_infrastructure(
        &self,
        ctx: &RenderContext<'_>,
    ) -> Result<Vec<Manifest>, TemplateError> {
        render_with(
            ctx,
            NodePoolProfile {
                spot: true,
                auto_upgrade: false,
            },
        )
    }
}
