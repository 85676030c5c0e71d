use super::infrastructure::{NodePoolProfile, render_with};
use super::manager::{RenderContext, Template};
use super::{Manifest, TemplateError};

/// On-demand nodes with automatic upgrades.
#[derive(Clone, Debug, Default)]
pub struct StandardTemplate;

impl Template for StandardTemplate {
    fn name(&self) -> &'static str {
        "standard"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["default", "on-demand"]
    }
    fn render_infrastructure(
        &self,
        ctx: &RenderContext<'_>,
    ) -> Result<Vec<Manifest>, TemplateError> {
        render_with(
            ctx,
            NodePoolProfile {
                spot: false,
                auto_upgrade: true,
            },
        )
    }
}
