use tracing::{debug, trace};

use super::{ControllerContext, ReconcileErr};
use crate::children::ObjectKey;
use crate::crd::{TestCluster, TestClusterStatus};

#[derive(Debug)]
pub enum StatusWrite {
    /// The Request does not exist.
    Missing,
    /// The Request carries a deletion marker; nothing was written.
    Deleting,
    Unchanged(TestCluster),
    Written(TestCluster),
}

impl StatusWrite {
    pub fn request(&self) -> Option<&TestCluster> {
        match self {
            StatusWrite::Unchanged(r) | StatusWrite::Written(r) => Some(r),
            _ => None,
        }
    }

    pub fn written(&self) -> bool {
        matches!(self, StatusWrite::Written(_))
    }
}

/// Read-modify-write of a Request's status guarded by its resource version.
///
/// `mutate` sees the freshly read Request and returns the desired status, or
/// `None` to leave it alone. A conflicting write re-reads and reapplies, up to
/// the configured number of attempts.
pub async fn update_request_status<F>(
    ctx: &ControllerContext,
    key: &ObjectKey,
    mut mutate: F,
) -> Result<StatusWrite, ReconcileErr>
where
    F: FnMut(&TestCluster) -> Result<Option<TestClusterStatus>, ReconcileErr>,
{
    let attempts = ctx.settings.status_update_attempts.max(1);
    for attempt in 1..=attempts {
        let Some(request) = ctx.store.get_request(key).await? else {
            return Ok(StatusWrite::Missing);
        };
        if request.is_deleting() {
            return Ok(StatusWrite::Deleting);
        }
        let Some(desired) = mutate(&request)? else {
            return Ok(StatusWrite::Unchanged(request));
        };
        if request.status.as_ref() == Some(&desired) {
            trace!(%key, "status unchanged");
            return Ok(StatusWrite::Unchanged(request));
        }
        match ctx.store.update_request_status(&request, &desired).await {
            Ok(updated) => return Ok(StatusWrite::Written(updated)),
            Err(e) if e.is_conflict() => {
                debug!(%key, attempt, "status conflict, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ReconcileErr::ConflictRetriesExhausted {
        key: key.clone(),
        attempts,
    })
}
