//! Runs the proxy server in the background and tracks its liveness.

use crate::{metrics::ControllerMetrics, queue::Queue};
use futures::future::BoxFuture;
use impersonator_controller_core::DynamicCert;
use tokio::sync::{
    mpsc::{self, error::TryRecvError},
    oneshot,
};
use tracing::Instrument;

/// Runs a proxy server until the stop signal fires, returning its outcome.
pub type StartFn =
    Box<dyn FnOnce(oneshot::Receiver<()>) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Builds proxy servers bound to the given port and certificate providers.
pub trait ServerFactory: Send + Sync + 'static {
    fn new_server(
        &self,
        port: u16,
        serving: DynamicCert,
        signer: DynamicCert,
    ) -> anyhow::Result<StartFn>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("unexpected shutdown of proxy server")]
    UnexpectedShutdown,

    #[error("proxy server task terminated without reporting a result")]
    Lost,

    #[error("proxy server failed: {0}")]
    Failed(anyhow::Error),

    #[error("could not create proxy server: {0}")]
    Create(anyhow::Error),
}

/// Owns at most one running proxy server.
pub struct ProxyProcess {
    factory: Box<dyn ServerFactory>,
    port: u16,
    serving: DynamicCert,
    signer: DynamicCert,
    queue: Queue,
    metrics: ControllerMetrics,
    running: Option<Running>,
}

struct Running {
    stop: oneshot::Sender<()>,
    /// Receives the server's single outcome.
    errors: mpsc::Receiver<anyhow::Result<()>>,
}

/// Schedules another sync when the server task ends, however it ends.
struct RequeueOnDrop(Queue);

// === impl ProxyProcess ===

impl ProxyProcess {
    pub fn new(
        factory: Box<dyn ServerFactory>,
        port: u16,
        serving: DynamicCert,
        signer: DynamicCert,
        queue: Queue,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            factory,
            port,
            serving,
            signer,
            queue,
            metrics,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Starts the server unless it is already running.
    ///
    /// If a running server has reported an outcome, it is treated as crashed:
    /// the server is torn down and an error is returned so that the next sync
    /// starts it again.
    pub async fn ensure_started(&mut self) -> Result<(), Vec<ProxyError>> {
        if let Some(running) = self.running.as_mut() {
            let crash = match running.errors.try_recv() {
                Err(TryRecvError::Empty) => return Ok(()),
                Ok(Ok(())) => ProxyError::UnexpectedShutdown,
                Ok(Err(error)) => ProxyError::Failed(error),
                Err(TryRecvError::Disconnected) => ProxyError::Lost,
            };
            tracing::warn!(error = %crash, "Impersonation proxy exited");
            // Stopping must not wait for an outcome that was already consumed.
            running.errors.close();
            let mut errors = vec![crash];
            if let Err(error) = self.ensure_stopped().await {
                errors.push(error);
            }
            return Err(errors);
        }

        tracing::info!(port = self.port, "Starting impersonation proxy");
        let start = self
            .factory
            .new_server(self.port, self.serving.clone(), self.signer.clone())
            .map_err(|e| vec![ProxyError::Create(e)])?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let requeue = RequeueOnDrop(self.queue.clone());
        let metrics = self.metrics.clone();
        tokio::spawn(
            async move {
                let _requeue = requeue;
                let result = start(stop_rx).await;
                metrics.proxy_exited();
                if let Err(error) = &result {
                    tracing::debug!(%error, "Proxy server returned an error");
                }
                // The channel has capacity for the one outcome, so this never
                // fails while the receiver is open.
                let _ = errors_tx.try_send(result);
            }
            .instrument(tracing::info_span!("proxy", port = self.port)),
        );

        self.metrics.proxy_started();
        self.running = Some(Running {
            stop: stop_tx,
            errors: errors_rx,
        });
        Ok(())
    }

    /// Stops the server if it is running, waiting for it to report its
    /// outcome.
    pub async fn ensure_stopped(&mut self) -> Result<(), ProxyError> {
        let Some(Running { stop, mut errors }) = self.running.take() else {
            return Ok(());
        };

        tracing::info!(port = self.port, "Stopping impersonation proxy");
        let _ = stop.send(());
        let outcome = errors.recv().await;
        errors.close();
        match outcome {
            None | Some(Ok(())) => Ok(()),
            Some(Err(error)) => Err(ProxyError::Failed(error)),
        }
    }
}

// === impl RequeueOnDrop ===

impl Drop for RequeueOnDrop {
    fn drop(&mut self) {
        self.0.add_rate_limited();
    }
}
