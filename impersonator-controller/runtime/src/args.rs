use crate::{
    core::DynamicCert,
    k8s::{self, Client, CredentialIssuer, Labels, Resource},
    reconcile::{self, ClusterStore, Controller, ControllerMetrics, Index, Queue},
    ProxyServerFactory,
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, sync::Arc};
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "impersonator",
    about = "Reconciles the impersonation proxy for a CredentialIssuer"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "impersonator=info,warn",
        env = "IMPERSONATOR_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Namespace holding the generated Services and Secrets.
    #[clap(long, env = "POD_NAMESPACE")]
    namespace: String,

    #[clap(long, default_value = "impersonator-config")]
    credential_issuer: String,

    #[clap(long, default_value = "impersonator-proxy-load-balancer")]
    load_balancer_service: String,

    #[clap(long, default_value = "impersonator-proxy-cluster-ip")]
    cluster_ip_service: String,

    #[clap(long, default_value = "impersonator-proxy-tls-serving-certificate")]
    tls_secret: String,

    #[clap(long, default_value = "impersonator-proxy-ca-certificate")]
    ca_secret: String,

    /// Secret holding the CA that signs client certificates.
    #[clap(long, default_value = "impersonator-kube-cert-agent-signer")]
    signer_secret: String,

    /// Labels applied to generated resources, as comma-separated
    /// `key=value` pairs. The `app` label also selects the proxy pods.
    #[clap(long, default_value = "app=impersonator")]
    labels: Labels,

    #[clap(long, default_value_t = reconcile::DEFAULT_PROXY_PORT)]
    proxy_port: u16,

    /// Where decrypted proxy connections are forwarded.
    #[clap(long, default_value = "127.0.0.1:8443")]
    proxy_upstream_addr: SocketAddr,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            namespace,
            credential_issuer,
            load_balancer_service,
            cluster_ip_service,
            tls_secret,
            ca_secret,
            signer_secret,
            labels,
            proxy_port,
            proxy_upstream_addr,
        } = self;

        let config = reconcile::Config {
            namespace,
            credential_issuer,
            load_balancer_service,
            cluster_ip_service,
            tls_secret,
            ca_secret,
            signer_secret,
            labels,
            proxy_port,
        };

        let mut prom = <Registry>::default();
        let metrics = ControllerMetrics::register(prom.sub_registry_with_prefix("impersonator"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        if !api_resource_exists::<CredentialIssuer>(&runtime.client()).await {
            bail!(
                "{} resource kind not found",
                CredentialIssuer::kind(&Default::default())
            );
        }

        let queue = Queue::default();
        let index = Index::shared(&config, queue.clone());

        // Spawn resource watches.

        let issuers = runtime.watch_all::<CredentialIssuer>(
            watcher::Config::default().fields(&format!("metadata.name={}", config.credential_issuer)),
        );
        tokio::spawn(
            kubert::index::cluster(index.clone(), issuers).instrument(info_span!("credentialissuers")),
        );

        let services =
            runtime.watch_namespaced::<k8s::Service>(config.namespace.clone(), Default::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), services).instrument(info_span!("services")),
        );

        let secrets =
            runtime.watch_namespaced::<k8s::Secret>(config.namespace.clone(), Default::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), secrets).instrument(info_span!("secrets")),
        );

        let store = Arc::new(ClusterStore::new(
            runtime.client(),
            &config.namespace,
            index,
        ));
        let controller = Controller::new(
            config,
            store.clone(),
            store,
            Box::new(ProxyServerFactory::new(proxy_upstream_addr)),
            DynamicCert::new("impersonation-proxy-serving"),
            DynamicCert::new("impersonation-proxy-signer"),
            queue.clone(),
            metrics,
        );
        tokio::spawn(
            run_controller(controller, queue, runtime.shutdown_handle())
                .instrument(info_span!("controller")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Syncs whenever the queue is triggered until shutdown is signaled, then
/// stops the proxy before releasing the shutdown handle.
async fn run_controller(
    mut controller: Controller,
    queue: Queue,
    drain: kubert::shutdown::Watch,
) {
    // Sync once at startup, even before any watch has produced an event.
    queue.add();
    let shutdown = drain.signaled();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = queue.next() => match controller.sync().await {
                Ok(()) => {
                    tracing::debug!("Synced");
                    queue.forget();
                }
                Err(error) => {
                    tracing::warn!(%error, "Sync failed");
                    queue.add_rate_limited();
                }
            },
            handle = &mut shutdown => {
                info!("Stopping impersonation proxy");
                if let Err(error) = handle.release_after(controller.shutdown()).await {
                    tracing::warn!(%error, "Failed to stop impersonation proxy");
                }
                return;
            }
        }
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
