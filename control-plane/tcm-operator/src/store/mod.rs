pub mod kube_api;
pub mod memory;

pub use kube_api::KubeStore;
pub use memory::{MemoryStore, StoreEvent, StoreOp, WatchKind};

use async_trait::async_trait;

use crate::children::{ChildKind, ChildObject, ObjectKey};
use crate::crd::{TestCluster, TestClusterStatus};
use crate::templates::Manifest;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: ObjectKey },
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: ObjectKey },
    #[error("resource version conflict on {key}")]
    Conflict { key: ObjectKey },
    #[error("invalid object: {0}")]
    InvalidObject(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

/// CRUD over Requests and their children. Absence is `Ok(None)`, never an
/// error. Deleting an object lets the store collect dependents whose owners
/// are all gone.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_request(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<TestCluster>, StoreError>;

    /// Replace the status of `request`, guarded by its resource version.
    /// A stale version fails with [`StoreError::Conflict`].
    async fn update_request_status(
        &self,
        request: &TestCluster,
        status: &TestClusterStatus,
    ) -> Result<TestCluster, StoreError>;

    /// Returns `false` when the Request was already gone.
    async fn delete_request(&self, key: &ObjectKey) -> Result<bool, StoreError>;

    async fn get_child(
        &self,
        kind: ChildKind,
        key: &ObjectKey,
    ) -> Result<Option<ChildObject>, StoreError>;

    /// Fails with [`StoreError::AlreadyExists`] when the identity is taken.
    async fn create_child(
        &self,
        manifest: &Manifest,
    ) -> Result<ChildObject, StoreError>;

    /// Strip every owner reference from a child. Missing children are ignored.
    async fn remove_owner_references(
        &self,
        kind: ChildKind,
        key: &ObjectKey,
    ) -> Result<(), StoreError>;

    async fn list_children(
        &self,
        kind: ChildKind,
        namespace: &str,
    ) -> Result<Vec<ChildObject>, StoreError>;
}
