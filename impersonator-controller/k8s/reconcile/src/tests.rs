
use crate::{
    process::{ServerFactory, StartFn},
    store::{StatusSink, Store, StoreError},
    tls, Config, Controller, ControllerMetrics, Queue,
};
use async_trait::async_trait;
use futures::FutureExt;
use impersonator_controller_core::{
    CertificateAuthority, DynamicCert, APPROXIMATELY_ONE_HUNDRED_YEARS,
};
use impersonator_controller_k8s_api::{
    self as k8s, CredentialIssuer, CredentialIssuerSpec, CredentialIssuerStatus,
    ImpersonationProxyServiceSpec, ImpersonationProxySpec, LoadBalancerIngress,
    LoadBalancerStatus, ResourceExt, ServiceStatus,
};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::oneshot;

const NAMESPACE: &str = "impersonator";

#[derive(Clone, Debug, PartialEq, Eq)]
enum Mutation {
    CreateService(String),
    UpdateService(String),
    DeleteService(String),
    CreateSecret(String),
    DeleteSecret(String),
}

/// An in-memory store whose writes are immediately visible to reads.
#[derive(Default)]
struct FakeStore {
    issuers: Mutex<BTreeMap<String, CredentialIssuer>>,
    services: Mutex<BTreeMap<String, k8s::Service>>,
    secrets: Mutex<BTreeMap<String, k8s::Secret>>,
    has_control_plane: AtomicBool,
    node_queries: AtomicUsize,
    /// Simulates a create racing with another replica.
    reject_creates: AtomicBool,
    /// Objects another writer already deleted from the API while they are
    /// still cached here.
    deleted_elsewhere: Mutex<HashSet<String>>,
    mutations: Mutex<Vec<Mutation>>,
    status_writes: AtomicUsize,
}

/// Starts servers that run until stopped, or until `crash` is notified.
#[derive(Clone, Default)]
struct FakeFactory {
    created: Arc<AtomicUsize>,
    crash: Arc<tokio::sync::Notify>,
}

struct Harness {
    store: Arc<FakeStore>,
    factory: FakeFactory,
    serving: DynamicCert,
    signer: DynamicCert,
    metrics: ControllerMetrics,
    controller: Controller,
}

fn config() -> Config {
    Config {
        namespace: NAMESPACE.to_string(),
        credential_issuer: "issuer".to_string(),
        load_balancer_service: "proxy-lb".to_string(),
        cluster_ip_service: "proxy-cluster-ip".to_string(),
        tls_secret: "proxy-tls".to_string(),
        ca_secret: "proxy-ca".to_string(),
        signer_secret: "signer".to_string(),
        labels: [("app", "impersonator")].into_iter().collect(),
        proxy_port: crate::DEFAULT_PROXY_PORT,
    }
}

fn proxy_spec(mode: &str, type_: &str, external_endpoint: Option<&str>) -> ImpersonationProxySpec {
    ImpersonationProxySpec {
        mode: mode.to_string(),
        service: ImpersonationProxyServiceSpec {
            type_: type_.to_string(),
            ..Default::default()
        },
        external_endpoint: external_endpoint.map(String::from),
    }
}

fn ingress(hostname: Option<&str>, ip: Option<&str>) -> ServiceStatus {
    ServiceStatus {
        load_balancer: Some(LoadBalancerStatus {
            ingress: Some(vec![LoadBalancerIngress {
                hostname: hostname.map(String::from),
                ip: ip.map(String::from),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// === impl Harness ===

impl Harness {
    fn new(spec: ImpersonationProxySpec) -> Self {
        let store = Arc::new(FakeStore::default());
        store.set_spec(spec);
        store.insert_signer();

        let factory = FakeFactory::default();
        let serving = DynamicCert::new("serving");
        let signer = DynamicCert::new("signer");
        let metrics = ControllerMetrics::default();
        let controller = Controller::new(
            config(),
            store.clone(),
            store.clone(),
            Box::new(factory.clone()),
            serving.clone(),
            signer.clone(),
            Queue::default(),
            metrics.clone(),
        );
        Self {
            store,
            factory,
            serving,
            signer,
            metrics,
            controller,
        }
    }

    async fn sync(&mut self) -> Result<(), crate::Error> {
        self.controller.sync().await
    }

    fn strategy(&self) -> k8s::CredentialIssuerStrategy {
        let issuer = self.store.credential_issuer("issuer").expect("issuer");
        issuer
            .status
            .expect("status")
            .strategies
            .into_iter()
            .next()
            .expect("strategy")
    }
}

// === impl FakeStore ===

impl FakeStore {
    fn set_spec(&self, spec: ImpersonationProxySpec) {
        let mut issuers = self.issuers.lock();
        let issuer = issuers
            .entry("issuer".to_string())
            .or_insert_with(|| CredentialIssuer::new("issuer", CredentialIssuerSpec::default()));
        issuer.spec.impersonation_proxy = Some(spec);
    }

    fn insert_signer(&self) {
        let ca = CertificateAuthority::new("signer", APPROXIMATELY_ONE_HUNDRED_YEARS).unwrap();
        self.put_secret(
            "signer",
            [
                (tls::SIGNER_CERT_KEY, ca.bundle()),
                (tls::SIGNER_PRIVATE_KEY_KEY, ca.private_key_pem()),
            ],
        );
    }

    fn put_secret<'a>(&self, name: &str, data: impl IntoIterator<Item = (&'a str, &'a [u8])>) {
        let secret = k8s::Secret {
            metadata: k8s::ObjectMeta {
                namespace: Some(NAMESPACE.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            data: Some(
                data.into_iter()
                    .map(|(k, v)| (k.to_string(), k8s::ByteString(v.to_vec())))
                    .collect(),
            ),
            ..Default::default()
        };
        self.secrets.lock().insert(name.to_string(), secret);
    }

    fn set_service_status(&self, name: &str, status: ServiceStatus) {
        let mut services = self.services.lock();
        let svc = services.get_mut(name).expect("service must exist");
        svc.status = Some(status);
    }

    fn delete_behind_cache(&self, name: &str) {
        self.deleted_elsewhere.lock().insert(name.to_string());
    }

    /// Drops the cached copy of an object that was deleted elsewhere,
    /// returning true if the delete lost that race.
    fn lost_delete_race<T>(&self, cache: &Mutex<BTreeMap<String, T>>, name: &str) -> bool {
        if !self.deleted_elsewhere.lock().remove(name) {
            return false;
        }
        cache.lock().remove(name);
        true
    }

    fn take_mutations(&self) -> Vec<Mutation> {
        std::mem::take(&mut *self.mutations.lock())
    }

    fn record(&self, mutation: Mutation) {
        self.mutations.lock().push(mutation);
    }

    fn check_create(&self, kind: &'static str, name: &str) -> Result<(), StoreError> {
        if self.reject_creates.load(Ordering::SeqCst) {
            return Err(StoreError::AlreadyExists {
                kind,
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FakeStore {
    fn credential_issuer(&self, name: &str) -> Option<CredentialIssuer> {
        self.issuers.lock().get(name).cloned()
    }

    fn service(&self, name: &str) -> Option<k8s::Service> {
        self.services.lock().get(name).cloned()
    }

    fn secret(&self, name: &str) -> Option<k8s::Secret> {
        self.secrets.lock().get(name).cloned()
    }

    async fn create_service(&self, service: k8s::Service) -> Result<(), StoreError> {
        let name = service.name_any();
        self.check_create("Service", &name)?;
        let mut services = self.services.lock();
        if services.contains_key(&name) {
            return Err(StoreError::AlreadyExists {
                kind: "Service",
                name,
            });
        }
        self.record(Mutation::CreateService(name.clone()));
        services.insert(name, service);
        Ok(())
    }

    async fn update_service(&self, service: k8s::Service) -> Result<(), StoreError> {
        let name = service.name_any();
        self.record(Mutation::UpdateService(name.clone()));
        self.services.lock().insert(name, service);
        Ok(())
    }

    async fn delete_service(&self, name: &str) -> Result<(), StoreError> {
        self.record(Mutation::DeleteService(name.to_string()));
        if self.lost_delete_race(&self.services, name) {
            return Err(StoreError::NotFound {
                kind: "Service",
                name: name.to_string(),
            });
        }
        match self.services.lock().remove(name) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                kind: "Service",
                name: name.to_string(),
            }),
        }
    }

    async fn create_secret(&self, secret: k8s::Secret) -> Result<(), StoreError> {
        let name = secret.name_any();
        self.check_create("Secret", &name)?;
        let mut secrets = self.secrets.lock();
        if secrets.contains_key(&name) {
            return Err(StoreError::AlreadyExists { kind: "Secret", name });
        }
        self.record(Mutation::CreateSecret(name.clone()));
        secrets.insert(name, secret);
        Ok(())
    }

    async fn delete_secret(&self, name: &str) -> Result<(), StoreError> {
        self.record(Mutation::DeleteSecret(name.to_string()));
        if self.lost_delete_race(&self.secrets, name) {
            return Err(StoreError::NotFound {
                kind: "Secret",
                name: name.to_string(),
            });
        }
        match self.secrets.lock().remove(name) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                kind: "Secret",
                name: name.to_string(),
            }),
        }
    }

    async fn has_control_plane_nodes(&self) -> Result<bool, StoreError> {
        self.node_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.has_control_plane.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl StatusSink for FakeStore {
    async fn update_status(
        &self,
        name: &str,
        status: CredentialIssuerStatus,
    ) -> Result<(), StoreError> {
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        let mut issuers = self.issuers.lock();
        let issuer = issuers.get_mut(name).ok_or_else(|| StoreError::NotFound {
            kind: "CredentialIssuer",
            name: name.to_string(),
        })?;
        issuer.status = Some(status);
        Ok(())
    }
}

// === impl FakeFactory ===

impl FakeFactory {
    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ServerFactory for FakeFactory {
    fn new_server(&self, _: u16, _: DynamicCert, _: DynamicCert) -> anyhow::Result<StartFn> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let crash = self.crash.clone();
        Ok(Box::new(move |stop: oneshot::Receiver<()>| {
            async move {
                tokio::select! {
                    _ = stop => Ok(()),
                    _ = crash.notified() => Err(anyhow::anyhow!("listener failed")),
                }
            }
            .boxed()
        }))
    }
}
