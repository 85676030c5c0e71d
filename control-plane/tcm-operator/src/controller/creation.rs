use nanoid::nanoid;
use tracing::{debug, info, instrument};

use super::ensure::{EnsureSummary, ensure_children};
use super::owner::bind_all;
use super::status::{StatusWrite, update_request_status};
use super::status_reducer::assign_generated_name;
use super::{ControllerContext, ReconcileErr};
use crate::children::ObjectKey;
use crate::crd::TestCluster;
use crate::metrics::ReconcileStage;
use crate::reporter::{
    REASON_CREATED, ReportContext, Severity, report_best_effort,
};

const SUFFIX_LEN: usize = 5;
const MAX_NAME_LEN: usize = 63;

const SUFFIX_ALPHABET: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o',
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3',
    '4', '5', '6', '7', '8', '9',
];

#[derive(Debug, PartialEq, Eq)]
pub enum CreationOutcome {
    NotFound,
    Deleting,
    /// A generated name was persisted; rendering waits for the next event.
    NameAssigned(String),
    Ensured(EnsureSummary),
}

/// `<base>-<5 lowercase alphanumerics>`, kept within the DNS label limit.
pub fn generate_name(base: &str) -> String {
    let keep = MAX_NAME_LEN - SUFFIX_LEN - 1;
    let trimmed = if base.len() > keep {
        base[..keep].trim_end_matches('-')
    } else {
        base
    };
    format!("{}-{}", trimmed, nanoid!(SUFFIX_LEN, &SUFFIX_ALPHABET))
}

#[instrument(skip_all, fields(ns = %key.namespace, name = %key.name))]
pub async fn reconcile_request(
    ctx: &ControllerContext,
    key: &ObjectKey,
) -> Result<CreationOutcome, ReconcileErr> {
    let report = ReportContext::new(key.clone(), REASON_CREATED);
    match reconcile_inner(ctx, key).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => Err(ctx.fail(ReconcileStage::Creation, report, e).await),
    }
}

async fn reconcile_inner(
    ctx: &ControllerContext,
    key: &ObjectKey,
) -> Result<CreationOutcome, ReconcileErr> {
    let Some(request) = ctx.store.get_request(key).await? else {
        debug!("request gone");
        return Ok(CreationOutcome::NotFound);
    };
    if request.is_deleting() {
        debug!("request deleting; cascade handles children");
        return Ok(CreationOutcome::Deleting);
    }

    let Some(generated) = request.generated_name().map(str::to_string) else {
        return assign_name(ctx, key).await;
    };

    let mut manifests = ctx
        .renderer
        .render_infrastructure(&request.spec, &generated)?;
    bind_all(&mut manifests, &request)?;
    let summary = ensure_children(ctx, &manifests).await?;

    if summary.all_created() {
        ctx.metrics.cluster_created();
        info!(%generated, resources = summary.created.len(), "infrastructure created");
        report_best_effort(
            ctx.sink.as_ref(),
            Severity::Info,
            &format!("Created infrastructure for cluster {generated}"),
            &ReportContext::for_request(&request, REASON_CREATED)
                .with_subject(generated.clone()),
        )
        .await;
    } else {
        debug!(
            created = summary.created.len(),
            present = summary.present.len(),
            "infrastructure ensured"
        );
    }
    Ok(CreationOutcome::Ensured(summary))
}

async fn assign_name(
    ctx: &ControllerContext,
    key: &ObjectKey,
) -> Result<CreationOutcome, ReconcileErr> {
    let mut candidate: Option<String> = None;
    let write = update_request_status(ctx, key, |current: &TestCluster| {
        // a concurrent writer may have assigned one already
        if current.generated_name().is_some() {
            return Ok(None);
        }
        let name = candidate
            .get_or_insert_with(|| generate_name(&current.key().name))
            .clone();
        Ok(Some(assign_generated_name(current.status.as_ref(), &name)))
    })
    .await?;

    Ok(match write {
        StatusWrite::Missing => CreationOutcome::NotFound,
        StatusWrite::Deleting => CreationOutcome::Deleting,
        StatusWrite::Unchanged(r) | StatusWrite::Written(r) => {
            let name = r.generated_name().unwrap_or_default().to_string();
            info!(generated = %name, "assigned generated name");
            CreationOutcome::NameAssigned(name)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_suffix(s: &str) -> bool {
        s.len() == SUFFIX_LEN
            && s.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    }

    #[test]
    fn generated_name_has_random_suffix() {
        let n = generate_name("r1");
        let (base, suffix) = n.rsplit_once('-').unwrap();
        assert_eq!(base, "r1");
        assert!(is_suffix(suffix), "bad suffix {suffix}");
    }

    #[test]
    fn generated_names_differ() {
        let a = generate_name("r1");
        let b = generate_name("r1");
        let c = generate_name("r1");
        assert!(a != b || b != c);
    }

    #[test]
    fn long_base_is_truncated() {
        let base = format!("{}-yy", "x".repeat(56));
        let n = generate_name(&base);
        assert!(n.len() <= MAX_NAME_LEN);
        let (head, suffix) = n.rsplit_once('-').unwrap();
        assert_eq!(head, "x".repeat(56));
        assert!(is_suffix(suffix));
    }
}
