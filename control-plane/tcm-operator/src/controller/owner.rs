use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;

use super::ReconcileErr;
use crate::children::{ChildObject, ObjectKey};
use crate::crd::{API_GROUP, TestCluster};
use crate::templates::{ANNOTATION_REQUEST, ANNOTATION_REQUEST_UID, Manifest};

/// The Request a child belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerLink {
    pub key: ObjectKey,
    pub uid: String,
}

fn is_request_owner(r: &OwnerReference) -> bool {
    r.kind == TestCluster::kind(&())
        && r.api_version
            .split_once('/')
            .map(|(group, _)| group == API_GROUP)
            .unwrap_or(false)
}

fn request_owners(child: &ChildObject) -> impl Iterator<Item = &OwnerReference> {
    child.owner_references().iter().filter(|r| is_request_owner(r))
}

/// Key of the first TestCluster among the child's owners.
pub fn first_claimed_request(child: &ChildObject) -> Option<ObjectKey> {
    let ns = child.metadata.namespace.clone().unwrap_or_default();
    request_owners(child)
        .next()
        .map(|r| ObjectKey::new(ns, r.name.clone()))
}

/// Owner recorded by [`Manifest::bind`], readable after de-linking.
pub fn recorded_owner(child: &ChildObject) -> Option<OwnerLink> {
    let annotations = child.metadata.annotations.as_ref()?;
    let name = annotations.get(ANNOTATION_REQUEST)?;
    let uid = annotations.get(ANNOTATION_REQUEST_UID)?;
    let ns = child.metadata.namespace.clone()?;
    Some(OwnerLink {
        key: ObjectKey::new(ns, name.clone()),
        uid: uid.clone(),
    })
}

/// Zero TestCluster owners → `None`, one → its link, more → ownership error.
pub fn resolve_owner(
    child: &ChildObject,
) -> Result<Option<OwnerLink>, ReconcileErr> {
    let owners: Vec<&OwnerReference> = request_owners(child).collect();
    let child_key = child.key().unwrap_or_else(|| ObjectKey::new("", ""));
    match owners.as_slice() {
        [] => Ok(None),
        [owner] => Ok(Some(OwnerLink {
            key: ObjectKey::new(child_key.namespace, owner.name.clone()),
            uid: owner.uid.clone(),
        })),
        many => Err(ReconcileErr::Ownership {
            kind: child.kind,
            key: child_key,
            owners: many.len(),
        }),
    }
}

pub fn owner_reference(
    request: &TestCluster,
) -> Result<OwnerReference, ReconcileErr> {
    request
        .controller_owner_ref(&())
        .ok_or_else(|| ReconcileErr::InvalidRequest {
            key: request.key(),
            reason: "missing uid".into(),
        })
}

/// Place every manifest in the Request's namespace, owned by the Request.
pub fn bind_all(
    manifests: &mut [Manifest],
    request: &TestCluster,
) -> Result<(), ReconcileErr> {
    let owner = owner_reference(request)?;
    let ns = request.key().namespace;
    for m in manifests {
        m.bind(&ns, owner.clone());
    }
    Ok(())
}

pub fn owned_by(request: &TestCluster, link: &OwnerLink) -> bool {
    request.meta().uid.as_deref() == Some(link.uid.as_str())
}
