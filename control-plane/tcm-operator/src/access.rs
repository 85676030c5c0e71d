use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    Client, Config,
    api::{Api, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info};

use crate::children::ObjectKey;
use crate::templates::infrastructure::{LABEL_MANAGED_BY, MANAGED_BY};

pub const ADMIN_BINDING_NAME: &str = "tcm-cluster-admin";
pub const KUBECONFIG_KEY: &str = "kubeconfig";
const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubjectKind {
    User,
    Group,
    ServiceAccount,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "User",
            SubjectKind::Group => "Group",
            SubjectKind::ServiceAccount => "ServiceAccount",
        }
    }
}

impl FromStr for SubjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "User" => Ok(SubjectKind::User),
            "Group" => Ok(SubjectKind::Group),
            "ServiceAccount" => Ok(SubjectKind::ServiceAccount),
            other => Err(format!("unknown subject kind `{other}`")),
        }
    }
}

/// The fixed-name ClusterRoleBinding granted inside every provisioned cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminBinding {
    pub name: String,
    /// For service accounts: `<namespace>/<name>`.
    pub subject: String,
    pub subject_kind: SubjectKind,
}

impl AdminBinding {
    pub fn new(subject: &str, subject_kind: SubjectKind) -> Self {
        Self {
            name: ADMIN_BINDING_NAME.to_string(),
            subject: subject.to_string(),
            subject_kind,
        }
    }

    pub fn to_cluster_role_binding(&self) -> ClusterRoleBinding {
        let subject = match self.subject_kind {
            SubjectKind::ServiceAccount => {
                let (ns, name) = self
                    .subject
                    .split_once('/')
                    .unwrap_or(("default", self.subject.as_str()));
                Subject {
                    kind: SubjectKind::ServiceAccount.as_str().to_string(),
                    name: name.to_string(),
                    namespace: Some(ns.to_string()),
                    api_group: None,
                }
            }
            kind => Subject {
                kind: kind.as_str().to_string(),
                name: self.subject.clone(),
                namespace: None,
                api_group: Some(RBAC_GROUP.to_string()),
            },
        };
        ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                labels: Some(BTreeMap::from([(
                    LABEL_MANAGED_BY.to_string(),
                    MANAGED_BY.to_string(),
                )])),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: RBAC_GROUP.to_string(),
                kind: "ClusterRole".to_string(),
                name: "cluster-admin".to_string(),
            },
            subjects: Some(vec![subject]),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingOutcome {
    Created,
    AlreadyPresent,
}

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("credentials for {cluster} unavailable (secret `{secret}`)")]
    CredentialsUnavailable { cluster: ObjectKey, secret: String },
    #[error("invalid kubeconfig for {cluster}: {reason}")]
    InvalidKubeconfig { cluster: ObjectKey, reason: String },
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// Access to a provisioned cluster's API.
#[async_trait]
pub trait ClusterAccess: Send + Sync {
    /// Get-or-create the admin binding; an existing binding is success.
    async fn ensure_cluster_admin(
        &self,
        cluster: &ObjectKey,
        binding: &AdminBinding,
    ) -> Result<BindingOutcome, AccessError>;
}

/// Reads the `<cluster>-kubeconfig` Secret written by the credential
/// collaborator and talks to the provisioned cluster with it.
#[derive(Clone)]
pub struct KubeconfigSecretAccess {
    client: Client,
}

pub fn kubeconfig_secret_name(cluster: &str) -> String {
    format!("{cluster}-kubeconfig")
}

impl KubeconfigSecretAccess {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn remote_client(&self, cluster: &ObjectKey) -> Result<Client, AccessError> {
        let secret_name = kubeconfig_secret_name(&cluster.name);
        let unavailable = || AccessError::CredentialsUnavailable {
            cluster: cluster.clone(),
            secret: secret_name.clone(),
        };
        let secrets: Api<Secret> =
            Api::namespaced(self.client.clone(), &cluster.namespace);
        let secret = secrets.get_opt(&secret_name).await?.ok_or_else(unavailable)?;
        let raw = secret
            .data
            .as_ref()
            .and_then(|d| d.get(KUBECONFIG_KEY))
            .ok_or_else(unavailable)?;
        let invalid = |reason: String| AccessError::InvalidKubeconfig {
            cluster: cluster.clone(),
            reason,
        };
        let yaml = std::str::from_utf8(&raw.0).map_err(|e| invalid(e.to_string()))?;
        let kubeconfig = Kubeconfig::from_yaml(yaml).map_err(|e| invalid(e.to_string()))?;
        let config =
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| invalid(e.to_string()))?;
        Ok(Client::try_from(config)?)
    }
}

#[async_trait]
impl ClusterAccess for KubeconfigSecretAccess {
    async fn ensure_cluster_admin(
        &self,
        cluster: &ObjectKey,
        binding: &AdminBinding,
    ) -> Result<BindingOutcome, AccessError> {
        let remote = self.remote_client(cluster).await?;
        let api: Api<ClusterRoleBinding> = Api::all(remote);
        if api.get_opt(&binding.name).await?.is_some() {
            debug!(%cluster, binding = %binding.name, "admin binding present");
            return Ok(BindingOutcome::AlreadyPresent);
        }
        match api
            .create(&PostParams::default(), &binding.to_cluster_role_binding())
            .await
        {
            Ok(_) => {
                info!(%cluster, binding = %binding.name, subject = %binding.subject, "admin binding created");
                Ok(BindingOutcome::Created)
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Ok(BindingOutcome::AlreadyPresent)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_binding_targets_cluster_admin() {
        let crb = AdminBinding::new("ci-bot@example.com", SubjectKind::User)
            .to_cluster_role_binding();
        assert_eq!(crb.metadata.name.as_deref(), Some(ADMIN_BINDING_NAME));
        assert_eq!(crb.role_ref.name, "cluster-admin");
        let s = &crb.subjects.unwrap()[0];
        assert_eq!(s.kind, "User");
        assert_eq!(s.api_group.as_deref(), Some(RBAC_GROUP));
        assert!(s.namespace.is_none());
    }

    #[test]
    fn service_account_subject_splits_namespace() {
        let crb = AdminBinding::new("tcm-system/tcm-operator", SubjectKind::ServiceAccount)
            .to_cluster_role_binding();
        let s = &crb.subjects.unwrap()[0];
        assert_eq!(s.name, "tcm-operator");
        assert_eq!(s.namespace.as_deref(), Some("tcm-system"));
        assert!(s.api_group.is_none());
    }

    #[test]
    fn subject_kind_parsing() {
        assert_eq!("Group".parse::<SubjectKind>(), Ok(SubjectKind::Group));
        assert!("Robot".parse::<SubjectKind>().is_err());
        assert_eq!(kubeconfig_secret_name("r1-abcde"), "r1-abcde-kubeconfig");
    }
}
