use async_trait::async_trait;
use kube::{
    Client, Resource, ResourceExt,
    api::{
        Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams,
        PostParams,
    },
};
use serde_json::json;
use tracing::debug;

use super::{ResourceStore, StoreError};
use crate::children::{ChildKind, ChildObject, ObjectKey};
use crate::crd::{TestCluster, TestClusterStatus};
use crate::templates::Manifest;

/// [`ResourceStore`] backed by the Kubernetes API. Cascading deletion is left
/// to the cluster's garbage collector.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn requests(&self, ns: &str) -> Api<TestCluster> {
        Api::namespaced(self.client.clone(), ns)
    }

    fn children(&self, kind: ChildKind, ns: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), ns, &kind.api_resource())
    }
}

fn decode_child(
    kind: ChildKind,
    obj: &DynamicObject,
) -> Result<ChildObject, StoreError> {
    let value = serde_json::to_value(obj)?;
    Ok(ChildObject::from_value(kind, &value)?)
}

fn map_write_err(kind: &str, key: &ObjectKey, e: kube::Error) -> StoreError {
    match e {
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            StoreError::AlreadyExists {
                kind: kind.to_string(),
                key: key.clone(),
            }
        }
        kube::Error::Api(ae) if ae.code == 409 => {
            StoreError::Conflict { key: key.clone() }
        }
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound {
            kind: kind.to_string(),
            key: key.clone(),
        },
        other => StoreError::Kube(other),
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_request(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<TestCluster>, StoreError> {
        Ok(self.requests(&key.namespace).get_opt(&key.name).await?)
    }

    async fn update_request_status(
        &self,
        request: &TestCluster,
        status: &TestClusterStatus,
    ) -> Result<TestCluster, StoreError> {
        let key = request.key();
        let body = json!({
            "apiVersion": TestCluster::api_version(&()),
            "kind": TestCluster::kind(&()),
            "metadata": {
                "name": key.name,
                "namespace": key.namespace,
                "resourceVersion": request.resource_version(),
            },
            "status": status,
        });
        let data = serde_json::to_vec(&body)?;
        self.requests(&key.namespace)
            .replace_status(&key.name, &PostParams::default(), data)
            .await
            .map_err(|e| map_write_err("TestCluster", &key, e))
    }

    async fn delete_request(&self, key: &ObjectKey) -> Result<bool, StoreError> {
        match self
            .requests(&key.namespace)
            .delete(&key.name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_child(
        &self,
        kind: ChildKind,
        key: &ObjectKey,
    ) -> Result<Option<ChildObject>, StoreError> {
        match self.children(kind, &key.namespace).get_opt(&key.name).await? {
            Some(obj) => Ok(Some(decode_child(kind, &obj)?)),
            None => Ok(None),
        }
    }

    async fn create_child(
        &self,
        manifest: &Manifest,
    ) -> Result<ChildObject, StoreError> {
        let key = manifest.key().ok_or_else(|| {
            StoreError::InvalidObject(format!(
                "{} manifest without a name",
                manifest.kind
            ))
        })?;
        let obj: DynamicObject = serde_json::from_value(manifest.to_value()?)?;
        let created = self
            .children(manifest.kind, &key.namespace)
            .create(&PostParams::default(), &obj)
            .await
            .map_err(|e| map_write_err(manifest.kind.kind(), &key, e))?;
        debug!(kind = %manifest.kind, %key, "created child");
        decode_child(manifest.kind, &created)
    }

    async fn remove_owner_references(
        &self,
        kind: ChildKind,
        key: &ObjectKey,
    ) -> Result<(), StoreError> {
        let patch = json!({"metadata": {"ownerReferences": null}});
        match self
            .children(kind, &key.namespace)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(obj) => {
                debug!(%kind, %key, name = %obj.name_any(), "owner references removed");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_children(
        &self,
        kind: ChildKind,
        namespace: &str,
    ) -> Result<Vec<ChildObject>, StoreError> {
        let list = self
            .children(kind, namespace)
            .list(&ListParams::default())
            .await?;
        list.items.iter().map(|o| decode_child(kind, o)).collect()
    }
}
