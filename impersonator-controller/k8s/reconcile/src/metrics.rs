use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    syncs: Family<SyncLabels, Counter>,
    proxy_starts: Counter,
    proxy_exits: Counter,
    tls_secrets_created: Counter,
    tls_secrets_deleted: Counter,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct SyncLabels {
    result: &'static str,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let metrics = Self::default();
        reg.register(
            "syncs",
            "Total number of sync passes by result",
            metrics.syncs.clone(),
        );
        reg.register(
            "proxy_starts",
            "Total number of times the impersonation proxy was started",
            metrics.proxy_starts.clone(),
        );
        reg.register(
            "proxy_exits",
            "Total number of times the impersonation proxy exited",
            metrics.proxy_exits.clone(),
        );
        reg.register(
            "tls_secrets_created",
            "Total number of serving certificate secrets created",
            metrics.tls_secrets_created.clone(),
        );
        reg.register(
            "tls_secrets_deleted",
            "Total number of serving certificate secrets deleted",
            metrics.tls_secrets_deleted.clone(),
        );
        metrics
    }

    pub(crate) fn sync_completed(&self, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.syncs.get_or_create(&SyncLabels { result }).inc();
    }

    pub(crate) fn proxy_started(&self) {
        self.proxy_starts.inc();
    }

    pub(crate) fn proxy_exited(&self) {
        self.proxy_exits.inc();
    }

    pub(crate) fn tls_secret_created(&self) {
        self.tls_secrets_created.inc();
    }

    pub(crate) fn tls_secret_deleted(&self) {
        self.tls_secrets_deleted.inc();
    }

    #[cfg(test)]
    pub(crate) fn tls_secrets(&self) -> (u64, u64) {
        (
            self.tls_secrets_created.get(),
            self.tls_secrets_deleted.get(),
        )
    }
}
