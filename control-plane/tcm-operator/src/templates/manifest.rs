use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde::Serialize;
use serde_json::{Map, Value};

use super::TemplateError;
use crate::children::{ChildKind, ObjectKey};

/// Owning Request name, kept after owner references are removed.
pub const ANNOTATION_REQUEST: &str = "tcm.dev/request";
pub const ANNOTATION_REQUEST_UID: &str = "tcm.dev/request-uid";

/// A rendered child object: typed kind and metadata plus the untyped body
/// (`spec`, `data`, ...). Only the store boundary sees the JSON form.
#[derive(Clone, Debug, PartialEq)]
pub struct Manifest {
    pub kind: ChildKind,
    pub metadata: ObjectMeta,
    pub body: Map<String, Value>,
}

impl Manifest {
    pub fn new(kind: ChildKind, metadata: ObjectMeta) -> Self {
        Self {
            kind,
            metadata,
            body: Map::new(),
        }
    }

    pub fn with(mut self, field: &str, value: Value) -> Self {
        self.body.insert(field.to_string(), value);
        self
    }

    /// Build from a typed k8s-openapi object.
    pub fn from_resource<K: Serialize>(
        kind: ChildKind,
        resource: &K,
    ) -> Result<Self, TemplateError> {
        let mut body = match serde_json::to_value(resource)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        body.remove("apiVersion");
        body.remove("kind");
        let metadata: ObjectMeta = match body.remove("metadata") {
            Some(m) => serde_json::from_value(m)?,
            None => ObjectMeta::default(),
        };
        Ok(Self {
            kind,
            metadata,
            body,
        })
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn key(&self) -> Option<ObjectKey> {
        ObjectKey::from_meta(&self.metadata)
    }

    /// Place the manifest in `namespace` with `owner` as its controller and
    /// record the owner in annotations.
    pub fn bind(&mut self, namespace: &str, owner: OwnerReference) {
        self.metadata.namespace = Some(namespace.to_string());
        let annotations = self
            .metadata
            .annotations
            .get_or_insert_with(Default::default);
        annotations.insert(ANNOTATION_REQUEST.to_string(), owner.name.clone());
        annotations.insert(ANNOTATION_REQUEST_UID.to_string(), owner.uid.clone());
        self.metadata.owner_references = Some(vec![owner]);
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let mut obj = Map::new();
        obj.insert("apiVersion".into(), Value::String(self.kind.api_version()));
        obj.insert("kind".into(), Value::String(self.kind.kind().to_string()));
        obj.insert("metadata".into(), serde_json::to_value(&self.metadata)?);
        for (k, v) in &self.body {
            obj.insert(k.clone(), v.clone());
        }
        Ok(Value::Object(obj))
    }
}
