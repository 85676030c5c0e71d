use serde_json::json;
use tcm_operator::children::{ChildKind, JobOutcome, ObjectKey};
use tcm_operator::controller::ReconcileErr;
use tcm_operator::controller::completion::{CompletionOutcome, reconcile_job};
use tcm_operator::crd::TestClusterSpec;
use tcm_operator::metrics::ReconcileStage;
use tcm_operator::reporter::{
    REASON_RECONCILE_ERROR, REASON_WORKLOAD_COMPLETED, REASON_WORKLOAD_FAILED,
    Severity,
};
use tcm_operator::store::{ResourceStore, StoreError, StoreOp, WatchKind};

mod common;
use common::{Harness, NS, generated, is_generated_for, spec, test_cluster, workload};

fn with_workload() -> TestClusterSpec {
    TestClusterSpec {
        workload: Some(workload()),
        ..spec("europe-west2-b", 2)
    }
}

/// Submit a Request, make every dependency ready and return the generated
/// name once the workload exists.
async fn provisioned(h: &Harness, name: &str) -> String {
    let tc = h.submit(&test_cluster(name, with_workload())).await;
    let gn = generated(&tc);
    assert!(is_generated_for(name, &gn));
    let errors = h.make_ready(&gn).await;
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(h.store.count(ChildKind::Job).await, 1);
    gn
}

#[test_log::test(tokio::test)]
async fn completed_workload_tears_everything_down() {
    let h = Harness::new();
    let gn = provisioned(&h, "r1").await;
    let key = ObjectKey::new(NS, &gn);
    for kind in ChildKind::TRACKED {
        assert_eq!(h.store.count(kind).await, 1, "{kind}");
    }

    h.complete_job(&gn).await;
    let errors = h.drain().await;
    assert!(errors.is_empty(), "{errors:?}");

    assert!(h.request(&ObjectKey::new(NS, "r1")).await.is_none());
    for kind in ChildKind::TRACKED {
        assert_eq!(h.store.count(kind).await, 0, "{kind} survived");
    }
    // the finished job is de-linked first and left for its TTL
    let job = h
        .store
        .get_child(ChildKind::Job, &key)
        .await
        .unwrap()
        .expect("job retained");
    assert!(job.owner_references().is_empty());

    let done = h.sink.with_reason(REASON_WORKLOAD_COMPLETED);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].severity, Severity::Info);
    assert_eq!(h.counters.snapshot().errors, 0);
}

#[test_log::test(tokio::test)]
async fn failed_workload_also_tears_down() {
    let h = Harness::new();
    let gn = provisioned(&h, "r2").await;

    h.fail_job(&gn).await;
    assert!(h.drain().await.is_empty());

    assert!(h.request(&ObjectKey::new(NS, "r2")).await.is_none());
    assert_eq!(h.store.count(ChildKind::ContainerCluster).await, 0);
    let failed = h.sink.with_reason(REASON_WORKLOAD_FAILED);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].severity, Severity::Warning);
    assert!(h.sink.with_reason(REASON_WORKLOAD_COMPLETED).is_empty());
}

#[test_log::test(tokio::test)]
async fn running_workload_is_left_alone() {
    let h = Harness::new();
    let gn = provisioned(&h, "r3").await;
    let key = ObjectKey::new(NS, &gn);

    assert_eq!(
        reconcile_job(&h.ctx, &key).await.unwrap(),
        CompletionOutcome::Running
    );
    assert!(h.request(&ObjectKey::new(NS, "r3")).await.is_some());
    assert_eq!(
        reconcile_job(&h.ctx, &ObjectKey::new(NS, "missing")).await.unwrap(),
        CompletionOutcome::NotFound
    );
}

#[test_log::test(tokio::test)]
async fn deleting_owner_is_not_deleted_twice() {
    let h = Harness::new();
    let gn = provisioned(&h, "r4").await;
    let request = ObjectKey::new(NS, "r4");
    h.store
        .mark_deleting(WatchKind::Request, &request)
        .await
        .unwrap();
    assert!(h.drain().await.is_empty());

    h.complete_job(&gn).await;
    assert!(h.drain().await.is_empty());
    assert_eq!(
        reconcile_job(&h.ctx, &ObjectKey::new(NS, &gn)).await.unwrap(),
        CompletionOutcome::OwnerGone
    );
    // still held by its finalizer, and the job keeps its owner
    assert!(h.request(&request).await.is_some());
    let job = h
        .store
        .get_child(ChildKind::Job, &ObjectKey::new(NS, &gn))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.owner_references().len(), 1);
    assert!(h.sink.with_reason(REASON_WORKLOAD_COMPLETED).is_empty());
}

#[test_log::test(tokio::test)]
async fn completed_teardown_is_idempotent() {
    let h = Harness::new();
    let gn = provisioned(&h, "r5").await;
    let key = ObjectKey::new(NS, &gn);
    h.complete_job(&gn).await;
    assert!(h.drain().await.is_empty());

    // replays after the owner is gone find nothing to do
    assert_eq!(
        reconcile_job(&h.ctx, &key).await.unwrap(),
        CompletionOutcome::OwnerGone
    );
    assert_eq!(h.sink.with_reason(REASON_WORKLOAD_COMPLETED).len(), 1);
}

#[test_log::test(tokio::test)]
async fn external_delete_cascades_to_all_children() {
    let h = Harness::new();
    let gn = provisioned(&h, "r6").await;

    let removed = h
        .store
        .delete(WatchKind::Request, &ObjectKey::new(NS, "r6"))
        .await;
    // the request, the first tier and the workload
    assert_eq!(removed, 1 + ChildKind::TRACKED.len() + 1);
    assert!(h.drain().await.is_empty());
    for kind in ChildKind::ALL {
        assert_eq!(h.store.count(kind).await, 0, "{kind} survived");
    }
    assert_eq!(
        reconcile_job(&h.ctx, &ObjectKey::new(NS, &gn)).await.unwrap(),
        CompletionOutcome::NotFound
    );
    assert_eq!(h.tracked_jobs(), 0);
}

#[test_log::test(tokio::test)]
async fn failed_request_delete_is_retried() {
    let h = Harness::new();
    let gn = provisioned(&h, "r9").await;
    let key = ObjectKey::new(NS, &gn);
    let request = ObjectKey::new(NS, "r9");
    h.store.inject_failures(StoreOp::DeleteRequest, 1).await;
    h.complete_job(&gn).await;

    let err = reconcile_job(&h.ctx, &key).await.unwrap_err();
    assert!(
        matches!(err, ReconcileErr::Store(StoreError::Unavailable(_))),
        "{err}"
    );
    assert!(h.request(&request).await.is_some());
    assert_eq!(h.counters.errors_of(ReconcileStage::Completion), 1);
    assert_eq!(h.sink.with_reason(REASON_RECONCILE_ERROR).len(), 1);
    let job = h
        .store
        .get_child(ChildKind::Job, &key)
        .await
        .unwrap()
        .unwrap();
    assert!(job.owner_references().is_empty());

    // the de-linked job still leads back to its request
    assert_eq!(
        reconcile_job(&h.ctx, &key).await.unwrap(),
        CompletionOutcome::TornDown(JobOutcome::Completed)
    );
    assert!(h.request(&request).await.is_none());
    for kind in ChildKind::TRACKED {
        assert_eq!(h.store.count(kind).await, 0, "{kind} survived");
    }
    assert_eq!(h.store.count(ChildKind::Job).await, 1);
    assert!(h.drain().await.is_empty());
    assert_eq!(h.sink.with_reason(REASON_WORKLOAD_COMPLETED).len(), 1);
}

#[test_log::test(tokio::test)]
async fn delink_failure_does_not_block_teardown() {
    let h = Harness::new();
    let gn = provisioned(&h, "r10").await;
    h.store
        .inject_failures(StoreOp::RemoveOwnerReferences, 1)
        .await;
    h.complete_job(&gn).await;
    let errors = h.drain().await;

    assert!(errors.is_empty(), "{errors:?}");
    assert!(h.request(&ObjectKey::new(NS, "r10")).await.is_none());
    for kind in ChildKind::TRACKED {
        assert_eq!(h.store.count(kind).await, 0, "{kind} survived");
    }
    // still owned when the request went, so the cascade took it
    assert_eq!(h.store.count(ChildKind::Job).await, 0);
    assert_eq!(h.sink.with_reason(REASON_WORKLOAD_COMPLETED).len(), 1);
    assert_eq!(h.counters.snapshot().errors, 0);
}

#[test_log::test(tokio::test)]
async fn job_from_previous_incarnation_does_not_delete_new_request() {
    let h = Harness::new();
    let tc = h.submit(&test_cluster("r7", spec("europe-west2-b", 1))).await;
    // a finished job still pointing at an earlier request with the same name
    h.store
        .insert_child(
            ChildKind::Job,
            json!({
                "metadata": {
                    "name": "r7-old00",
                    "namespace": NS,
                    "ownerReferences": [{
                        "apiVersion": "tcm.dev/v1beta1",
                        "kind": "TestCluster",
                        "name": "r7",
                        "uid": "uid-stale"
                    }]
                },
                "status": {"completionTime": "2024-05-01T12:00:00Z"}
            }),
        )
        .await
        .unwrap();
    assert!(h.drain().await.is_empty());

    assert_eq!(
        reconcile_job(&h.ctx, &ObjectKey::new(NS, "r7-old00")).await.unwrap(),
        CompletionOutcome::OwnerGone
    );
    let still = h.request(&tc.key()).await.expect("request kept");
    assert_eq!(still.metadata.uid, tc.metadata.uid);
    assert_eq!(h.store.count(ChildKind::ContainerCluster).await, 1);
}

#[test_log::test(tokio::test)]
async fn garbage_collector_sweeps_missed_orphans() {
    let h = Harness::new();
    // dependents whose owner vanished without a cascade
    for name in ["orphan-a", "orphan-b"] {
        h.store
            .insert_child(
                ChildKind::ComputeNetwork,
                json!({
                    "metadata": {
                        "name": name,
                        "namespace": NS,
                        "ownerReferences": [{
                            "apiVersion": "tcm.dev/v1beta1",
                            "kind": "TestCluster",
                            "name": "long-gone",
                            "uid": "uid-missing"
                        }]
                    }
                }),
            )
            .await
            .unwrap();
    }
    let tc = h.submit(&test_cluster("r8", spec("europe-west2-b", 1))).await;
    assert_eq!(h.store.count(ChildKind::ComputeNetwork).await, 3);

    assert_eq!(h.store.sweep().await, 2);
    assert_eq!(h.store.count(ChildKind::ComputeNetwork).await, 1);
    assert!(h.request(&tc.key()).await.is_some());
    assert!(h.drain().await.is_empty());
}
