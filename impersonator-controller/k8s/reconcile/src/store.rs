use async_trait::async_trait;
use impersonator_controller_k8s_api::{self as k8s, CredentialIssuer, CredentialIssuerStatus};

/// Access to the cluster resources the controller reads and mutates.
///
/// Reads are served from a watch-fed cache and never block; writes go to the
/// API server. All namespaced operations act on the controller namespace.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    fn credential_issuer(&self, name: &str) -> Option<CredentialIssuer>;

    fn service(&self, name: &str) -> Option<k8s::Service>;

    fn secret(&self, name: &str) -> Option<k8s::Secret>;

    async fn create_service(&self, service: k8s::Service) -> Result<(), StoreError>;

    async fn update_service(&self, service: k8s::Service) -> Result<(), StoreError>;

    async fn delete_service(&self, name: &str) -> Result<(), StoreError>;

    async fn create_secret(&self, secret: k8s::Secret) -> Result<(), StoreError>;

    async fn delete_secret(&self, name: &str) -> Result<(), StoreError>;

    /// Lists nodes live and reports whether any of them is a control plane
    /// node.
    async fn has_control_plane_nodes(&self) -> Result<bool, StoreError>;
}

/// Persists the `CredentialIssuer` status.
#[async_trait]
pub trait StatusSink: Send + Sync + 'static {
    async fn update_status(
        &self,
        name: &str,
        status: CredentialIssuerStatus,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("{kind} {name:?} was modified concurrently")]
    Conflict { kind: &'static str, name: String },

    #[error("no nodes found")]
    NoNodes,

    #[error("failed to access {kind} {name:?}: {source}")]
    Api {
        kind: &'static str,
        name: String,
        #[source]
        source: k8s::Error,
    },
}

// === impl StoreError ===

impl StoreError {
    /// Classifies an API error by its status code.
    pub fn from_api(kind: &'static str, name: impl ToString, error: k8s::Error) -> Self {
        let name = name.to_string();
        match error {
            k8s::Error::Api(ae) if ae.code == 404 => Self::NotFound { kind, name },
            k8s::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists { kind, name }
            }
            k8s::Error::Api(ae) if ae.code == 409 => Self::Conflict { kind, name },
            source => Self::Api { kind, name, source },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for races with another writer, which are retried rather
    /// than reported as failures.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. } | Self::Conflict { .. })
    }
}
