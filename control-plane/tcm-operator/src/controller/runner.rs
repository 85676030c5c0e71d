use std::fmt::Debug;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt, join_all};
use futures_util::{StreamExt, TryStreamExt};
use k8s_openapi::api::batch::v1::Job;
use kube::core::DynamicObject;
use kube::runtime::controller::Action;
use kube::runtime::reflector::{self, ObjectRef};
use kube::runtime::watcher::{self, watcher};
use kube::runtime::{Controller, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{error, info, trace};

use super::completion::{ResourceVersionFilter, reconcile_job};
use super::creation::reconcile_request;
use super::dependency::reconcile_dependency;
use super::{ControllerContext, ReconcileErr};
use crate::children::{ChildKind, ObjectKey};
use crate::crd::TestCluster;
use crate::templates::{LABEL_MANAGED_BY, MANAGED_BY};

fn key_of<K: Resource>(obj: &K) -> ObjectKey {
    ObjectKey::new(
        obj.namespace().unwrap_or_else(|| "default".to_string()),
        obj.name_any(),
    )
}

fn error_policy<K>(
    obj: Arc<K>,
    err: &ReconcileErr,
    ctx: Arc<ControllerContext>,
) -> Action
where
    K: Resource,
{
    error!(object = %key_of(obj.as_ref()), error = %err, "reconcile error, requeueing");
    Action::requeue(ctx.settings.error_requeue)
}

async fn log_results<K, E, S>(stream: S, controller: &'static str)
where
    K: Resource,
    E: Debug,
    S: futures_util::Stream<Item = Result<(ObjectRef<K>, Action), E>>,
{
    stream
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    trace!(controller, object = %obj_ref.name, ?action, "reconciled")
                }
                Err(e) => error!(controller, error = ?e, "controller error"),
            }
        })
        .await;
}

fn request_api(client: &Client, namespace: Option<&str>) -> Api<TestCluster> {
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn child_api(
    client: &Client,
    kind: ChildKind,
    namespace: Option<&str>,
) -> Api<DynamicObject> {
    let ar = kind.api_resource();
    match namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &ar),
        None => Api::all_with(client.clone(), &ar),
    }
}

fn request_controller(
    client: &Client,
    ctx: Arc<ControllerContext>,
    namespace: Option<&str>,
) -> BoxFuture<'static, ()> {
    let api = request_api(client, namespace);
    let stream = Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(
            |obj: Arc<TestCluster>, ctx: Arc<ControllerContext>| async move {
                reconcile_request(&ctx, &obj.key()).await?;
                Ok::<_, ReconcileErr>(Action::await_change())
            },
            error_policy::<TestCluster>,
            ctx,
        );
    log_results(stream, "testcluster").boxed()
}

fn dependency_controller(
    client: &Client,
    ctx: Arc<ControllerContext>,
    kind: ChildKind,
    namespace: Option<&str>,
) -> BoxFuture<'static, ()> {
    let api = child_api(client, kind, namespace);
    let stream =
        Controller::new_with(api, watcher::Config::default(), kind.api_resource())
            .shutdown_on_signal()
            .run(
                move |obj: Arc<DynamicObject>, ctx: Arc<ControllerContext>| async move {
                    reconcile_dependency(&ctx, kind, &key_of(obj.as_ref())).await?;
                    Ok::<_, ReconcileErr>(Action::await_change())
                },
                error_policy::<DynamicObject>,
                ctx,
            );
    log_results(stream, kind.kind()).boxed()
}

fn job_controller(
    client: &Client,
    ctx: Arc<ControllerContext>,
    namespace: Option<&str>,
) -> BoxFuture<'static, ()> {
    let api: Api<Job> = match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let selector = format!("{LABEL_MANAGED_BY}={MANAGED_BY}");
    let filter = Arc::new(ResourceVersionFilter::new());
    let tracker = filter.clone();
    let (reader, writer) = reflector::store();
    let jobs = watcher(api, watcher::Config::default().labels(&selector))
        .default_backoff()
        .reflect(writer)
        .inspect_ok(move |event| tracker.observe(event))
        .applied_objects()
        .try_filter(move |job: &Job| {
            let admit =
                filter.admit(&key_of(job), job.meta().resource_version.as_deref());
            future::ready(admit)
        });
    let stream = Controller::for_stream(jobs, reader)
        .shutdown_on_signal()
        .run(
            |job: Arc<Job>, ctx: Arc<ControllerContext>| async move {
                reconcile_job(&ctx, &key_of(job.as_ref())).await?;
                Ok::<_, ReconcileErr>(Action::await_change())
            },
            error_policy::<Job>,
            ctx,
        );
    log_results(stream, "job").boxed()
}

/// Run the request controller, one dependency controller per tracked kind,
/// and the workload completion controller until shutdown.
pub async fn run_controllers(
    client: Client,
    ctx: Arc<ControllerContext>,
    namespace: Option<String>,
) -> anyhow::Result<()> {
    let ns = namespace.as_deref();
    let mut loops = vec![request_controller(&client, ctx.clone(), ns)];
    for kind in ChildKind::TRACKED {
        loops.push(dependency_controller(&client, ctx.clone(), kind, ns));
    }
    loops.push(job_controller(&client, ctx, ns));

    info!(
        controllers = loops.len(),
        namespace = ns.unwrap_or("*"),
        "starting controllers"
    );
    join_all(loops).await;
    info!("controllers stopped");
    Ok(())
}
