use crate::{
    cache::SharedIndex,
    store::{StatusSink, Store, StoreError},
};
use async_trait::async_trait;
use impersonator_controller_k8s_api::{
    self as k8s, CredentialIssuer, CredentialIssuerStatus, ResourceExt,
};

const CONTROL_PLANE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// A [`Store`] backed by the API server, reading through the watch cache.
#[derive(Clone)]
pub struct ClusterStore {
    client: k8s::Client,
    namespace: String,
    index: SharedIndex,
}

// === impl ClusterStore ===

impl ClusterStore {
    pub fn new(client: k8s::Client, namespace: impl ToString, index: SharedIndex) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            index,
        }
    }

    fn services(&self) -> k8s::Api<k8s::Service> {
        k8s::Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn secrets(&self) -> k8s::Api<k8s::Secret> {
        k8s::Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl Store for ClusterStore {
    fn credential_issuer(&self, name: &str) -> Option<CredentialIssuer> {
        self.index.read().credential_issuer(name)
    }

    fn service(&self, name: &str) -> Option<k8s::Service> {
        self.index.read().service(name)
    }

    fn secret(&self, name: &str) -> Option<k8s::Secret> {
        self.index.read().secret(name)
    }

    async fn create_service(&self, service: k8s::Service) -> Result<(), StoreError> {
        self.services()
            .create(&k8s::PostParams::default(), &service)
            .await
            .map_err(|e| StoreError::from_api("Service", service.name_any(), e))?;
        Ok(())
    }

    async fn update_service(&self, service: k8s::Service) -> Result<(), StoreError> {
        let name = service.name_any();
        self.services()
            .replace(&name, &k8s::PostParams::default(), &service)
            .await
            .map_err(|e| StoreError::from_api("Service", &name, e))?;
        Ok(())
    }

    async fn delete_service(&self, name: &str) -> Result<(), StoreError> {
        self.services()
            .delete(name, &k8s::DeleteParams::default())
            .await
            .map_err(|e| StoreError::from_api("Service", name, e))?;
        Ok(())
    }

    async fn create_secret(&self, secret: k8s::Secret) -> Result<(), StoreError> {
        self.secrets()
            .create(&k8s::PostParams::default(), &secret)
            .await
            .map_err(|e| StoreError::from_api("Secret", secret.name_any(), e))?;
        Ok(())
    }

    async fn delete_secret(&self, name: &str) -> Result<(), StoreError> {
        self.secrets()
            .delete(name, &k8s::DeleteParams::default())
            .await
            .map_err(|e| StoreError::from_api("Secret", name, e))?;
        Ok(())
    }

    async fn has_control_plane_nodes(&self) -> Result<bool, StoreError> {
        let nodes = k8s::Api::<k8s::Node>::all(self.client.clone())
            .list(&k8s::ListParams::default())
            .await
            .map_err(|e| StoreError::from_api("Node", "", e))?;
        if nodes.items.is_empty() {
            return Err(StoreError::NoNodes);
        }
        Ok(nodes.items.iter().any(|node| {
            let labels = node.labels();
            CONTROL_PLANE_LABELS.iter().any(|l| labels.contains_key(*l))
        }))
    }
}

#[async_trait]
impl StatusSink for ClusterStore {
    async fn update_status(
        &self,
        name: &str,
        status: CredentialIssuerStatus,
    ) -> Result<(), StoreError> {
        let patch = k8s::Patch::Merge(serde_json::json!({ "status": status }));
        k8s::Api::<CredentialIssuer>::all(self.client.clone())
            .patch_status(name, &k8s::PatchParams::default(), &patch)
            .await
            .map_err(|e| StoreError::from_api("CredentialIssuer", name, e))?;
        Ok(())
    }
}
