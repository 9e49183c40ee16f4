use crate::{queue::Queue, Config};
use impersonator_controller_k8s_api::{self as k8s, CredentialIssuer, ResourceExt};
use parking_lot::RwLock;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Caches the handful of resources the controller reads, keyed by name.
///
/// Every change to a watched resource triggers a sync; events for other
/// resources are dropped.
#[derive(Debug)]
pub struct Index {
    namespace: String,
    queue: Queue,
    credential_issuers: Cached<CredentialIssuer>,
    services: Cached<k8s::Service>,
    secrets: Cached<k8s::Secret>,
}

#[derive(Debug)]
struct Cached<T> {
    names: HashSet<String>,
    objects: HashMap<String, T>,
}

// === impl Index ===

impl Index {
    pub fn shared(config: &Config, queue: Queue) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            namespace: config.namespace.clone(),
            queue,
            credential_issuers: Cached::new([&config.credential_issuer]),
            services: Cached::new([&config.load_balancer_service, &config.cluster_ip_service]),
            secrets: Cached::new([
                &config.tls_secret,
                &config.ca_secret,
                &config.signer_secret,
            ]),
        }))
    }

    pub fn credential_issuer(&self, name: &str) -> Option<CredentialIssuer> {
        self.credential_issuers.get(name)
    }

    pub fn service(&self, name: &str) -> Option<k8s::Service> {
        self.services.get(name)
    }

    pub fn secret(&self, name: &str) -> Option<k8s::Secret> {
        self.secrets.get(name)
    }

    fn in_namespace(&self, namespace: Option<&str>) -> bool {
        namespace == Some(self.namespace.as_str())
    }

    fn notify(&self, changed: bool) {
        if changed {
            self.queue.add();
        }
    }
}

impl kubert::index::IndexClusterResource<CredentialIssuer> for Index {
    fn apply(&mut self, issuer: CredentialIssuer) {
        let changed = self.credential_issuers.apply(issuer);
        self.notify(changed);
    }

    fn delete(&mut self, name: String) {
        let changed = self.credential_issuers.delete(&name);
        self.notify(changed);
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Service> for Index {
    fn apply(&mut self, svc: k8s::Service) {
        if !self.in_namespace(svc.metadata.namespace.as_deref()) {
            return;
        }
        let changed = self.services.apply(svc);
        self.notify(changed);
    }

    fn delete(&mut self, namespace: String, name: String) {
        if !self.in_namespace(Some(&namespace)) {
            return;
        }
        let changed = self.services.delete(&name);
        self.notify(changed);
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Secret> for Index {
    fn apply(&mut self, secret: k8s::Secret) {
        if !self.in_namespace(secret.metadata.namespace.as_deref()) {
            return;
        }
        let changed = self.secrets.apply(secret);
        self.notify(changed);
    }

    fn delete(&mut self, namespace: String, name: String) {
        if !self.in_namespace(Some(&namespace)) {
            return;
        }
        let changed = self.secrets.delete(&name);
        self.notify(changed);
    }
}

// === impl Cached ===

impl<T: ResourceExt + Clone> Cached<T> {
    fn new<'n>(names: impl IntoIterator<Item = &'n String>) -> Self {
        Self {
            names: names.into_iter().cloned().collect(),
            objects: HashMap::new(),
        }
    }

    fn get(&self, name: &str) -> Option<T> {
        self.objects.get(name).cloned()
    }

    /// Stores the object if its name is watched. Returns true if it was.
    fn apply(&mut self, obj: T) -> bool {
        let name = obj.name_unchecked();
        if !self.names.contains(&name) {
            return false;
        }
        tracing::trace!(%name, "Updated cache");
        self.objects.insert(name, obj);
        true
    }

    fn delete(&mut self, name: &str) -> bool {
        if !self.names.contains(name) {
            return false;
        }
        tracing::trace!(%name, "Removed from cache");
        self.objects.remove(name);
        true
    }
}
