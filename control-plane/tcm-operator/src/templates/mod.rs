pub mod infrastructure;
pub mod manager;
pub mod manifest;
pub mod spot;
pub mod standard;
pub mod workload;

pub use infrastructure::{LABEL_CLUSTER, LABEL_MANAGED_BY, MANAGED_BY};
pub use manager::*;
pub use manifest::{ANNOTATION_REQUEST, ANNOTATION_REQUEST_UID, Manifest};
pub use spot::SpotTemplate;
pub use standard::StandardTemplate;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("manifest serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
