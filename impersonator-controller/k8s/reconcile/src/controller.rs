use crate::{
    exposure,
    metrics::ControllerMetrics,
    process::{ProxyProcess, ServerFactory},
    queue::Queue,
    resolve,
    store::{StatusSink, Store},
    tls, Config, Error,
};
use chrono::Utc;
use impersonator_controller_core::{status, CertNameInfo, DesiredSpec, DynamicCert};
use impersonator_controller_k8s_api::{
    CredentialIssuer, CredentialIssuerStrategy, ResourceExt, StrategyReason, StrategyStatus,
};
use std::sync::Arc;

/// Reconciles the impersonation proxy for a single `CredentialIssuer`.
///
/// All state that outlives a sync pass (the running proxy and the cached
/// cluster topology) is owned here, so independent controllers never share it.
pub struct Controller {
    config: Config,
    store: Arc<dyn Store>,
    status: Arc<dyn StatusSink>,
    proxy: ProxyProcess,
    serving: DynamicCert,
    signer: DynamicCert,
    metrics: ControllerMetrics,
    /// Queried once, then reused for the controller's lifetime.
    has_control_plane: Option<bool>,
}

// === impl Controller ===

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        status: Arc<dyn StatusSink>,
        factory: Box<dyn ServerFactory>,
        serving: DynamicCert,
        signer: DynamicCert,
        queue: Queue,
        metrics: ControllerMetrics,
    ) -> Self {
        let proxy = ProxyProcess::new(
            factory,
            config.proxy_port,
            serving.clone(),
            signer.clone(),
            queue,
            metrics.clone(),
        );
        Self {
            config,
            store,
            status,
            proxy,
            serving,
            signer,
            metrics,
            has_control_plane: None,
        }
    }

    /// Runs one sync pass and publishes its outcome in the
    /// `CredentialIssuer`'s status.
    pub async fn sync(&mut self) -> Result<(), Error> {
        let result = self.sync_and_publish().await;
        self.metrics.sync_completed(result.is_ok());
        result
    }

    /// Stops the proxy, if it is running.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        self.proxy.ensure_stopped().await?;
        Ok(())
    }

    async fn sync_and_publish(&mut self) -> Result<(), Error> {
        let issuer = self
            .store
            .credential_issuer(&self.config.credential_issuer)
            .ok_or_else(|| Error::MissingCredentialIssuer {
                name: self.config.credential_issuer.clone(),
            })?;

        let (strategy, error) = match self.do_sync(&issuer).await {
            Ok(strategy) => (strategy, None),
            Err(error) => {
                let reason = if error.is_pending() {
                    StrategyReason::Pending
                } else {
                    StrategyReason::ErrorDuringSetup
                };
                self.signer.unset_cert_key_content();
                (status::error(reason, error.to_string(), Utc::now()), Some(error))
            }
        };

        let published = self.publish(&issuer, strategy).await.err();
        match Error::aggregate(error.into_iter().chain(published)) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn do_sync(&mut self, issuer: &CredentialIssuer) -> Result<CredentialIssuerStrategy, Error> {
        let spec = DesiredSpec::parse(issuer.spec.impersonation_proxy.as_ref())?;
        let has_control_plane = self.has_control_plane().await?;
        let desired = spec.resolve(has_control_plane);
        tracing::debug!(?desired, "Resolved desired state");

        if desired.impersonator {
            self.proxy.ensure_started().await?;
        } else {
            self.proxy.ensure_stopped().await?;
        }

        let store = &*self.store;
        if desired.load_balancer {
            exposure::ensure(store, exposure::load_balancer(&self.config, &spec)).await?;
        } else {
            exposure::ensure_absent(store, &self.config.load_balancer_service).await?;
        }
        if desired.cluster_ip {
            exposure::ensure(store, exposure::cluster_ip(&self.config, &spec)).await?;
        } else {
            exposure::ensure_absent(store, &self.config.cluster_ip_service).await?;
        }

        let name = match resolve::cert_name(store, &self.config, &spec) {
            Ok(name) => name,
            Err(error) => {
                self.serving.unset_cert_key_content();
                return Err(error.into());
            }
        };

        let ca = if desired.tls_secret {
            let ca = tls::ensure_ca(store, &self.config).await?;
            tls::ensure_tls_secret(
                store,
                &self.config,
                &ca,
                &name,
                &self.serving,
                &self.metrics,
            )
            .await?;
            Some(ca)
        } else {
            tls::ensure_tls_secret_absent(store, &self.config, &self.serving, &self.metrics)
                .await?;
            None
        };

        let strategy = status::compose(&spec, has_control_plane, &name, ca.as_ref(), Utc::now());
        self.update_signer(&strategy)?;
        Ok(strategy)
    }

    async fn has_control_plane(&mut self) -> Result<bool, Error> {
        if let Some(has) = self.has_control_plane {
            return Ok(has);
        }
        let has = self.store.has_control_plane_nodes().await?;
        tracing::info!(control_plane = has, "Queried for control plane nodes");
        self.has_control_plane = Some(has);
        Ok(has)
    }

    /// The signing credential is only loaded while the proxy is ready.
    fn update_signer(&self, strategy: &CredentialIssuerStrategy) -> Result<(), Error> {
        if strategy.status != StrategyStatus::Success {
            self.signer.unset_cert_key_content();
            return Ok(());
        }
        tls::load_signer(&*self.store, &self.config, &self.signer)
    }

    async fn publish(
        &self,
        issuer: &CredentialIssuer,
        strategy: CredentialIssuerStrategy,
    ) -> Result<(), Error> {
        let mut status = issuer.status.clone().unwrap_or_default();
        if !status.upsert(strategy) {
            tracing::debug!("Status is up to date");
            return Ok(());
        }
        let name = issuer.name_any();
        tracing::info!(credentialissuer = %name, "Updating status");
        self.status.update_status(&name, status).await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn proxy_running(&self) -> bool {
        self.proxy.is_running()
    }
}
