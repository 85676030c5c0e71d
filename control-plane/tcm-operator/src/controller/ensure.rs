use tracing::debug;

use super::ControllerContext;
use crate::children::ChildKind;
use crate::store::StoreError;
use crate::templates::Manifest;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnsureSummary {
    pub created: Vec<ChildKind>,
    pub present: Vec<ChildKind>,
}

impl EnsureSummary {
    /// Every manifest was created by this invocation.
    pub fn all_created(&self) -> bool {
        self.present.is_empty() && !self.created.is_empty()
    }
}

/// Create-if-absent for each manifest, in order. Existing objects are never
/// updated; losing a create race counts as present.
pub async fn ensure_children(
    ctx: &ControllerContext,
    manifests: &[Manifest],
) -> Result<EnsureSummary, StoreError> {
    let mut summary = EnsureSummary::default();
    for m in manifests {
        let key = m.key().ok_or_else(|| {
            StoreError::InvalidObject(format!("{} manifest without a name", m.kind))
        })?;
        if ctx.store.get_child(m.kind, &key).await?.is_some() {
            debug!(kind = %m.kind, %key, "already present");
            summary.present.push(m.kind);
            continue;
        }
        match ctx.store.create_child(m).await {
            Ok(_) => {
                ctx.metrics.resource_created(m.kind);
                summary.created.push(m.kind);
            }
            Err(e) if e.is_already_exists() => {
                debug!(kind = %m.kind, %key, "lost create race");
                summary.present.push(m.kind);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(summary)
}
