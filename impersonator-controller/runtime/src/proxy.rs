//! A TLS-terminating listener that forwards decrypted connections upstream.

use crate::reconcile::{ServerFactory, StartFn};
use anyhow::{anyhow, Result};
use futures::FutureExt;
use impersonator_controller_core::{CertKey, DynamicCert};
use rustls::{
    server::{ClientHello, ResolvesServerCert},
    sign::CertifiedKey,
    ServerConfig,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
};
use tokio_rustls::TlsAcceptor;
use tracing::{debug_span, info, Instrument};

/// Builds listeners that forward to a fixed upstream address.
#[derive(Clone, Debug)]
pub struct ProxyServerFactory {
    upstream: SocketAddr,
}

/// Resolves the server certificate from the serving provider on every
/// handshake.
#[derive(Debug)]
struct ServingCertResolver(DynamicCert);

// === impl ProxyServerFactory ===

impl ProxyServerFactory {
    pub fn new(upstream: SocketAddr) -> Self {
        Self { upstream }
    }
}

impl ServerFactory for ProxyServerFactory {
    fn new_server(&self, port: u16, serving: DynamicCert, signer: DynamicCert) -> Result<StartFn> {
        let acceptor = acceptor(serving)?;
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let upstream = self.upstream;
        Ok(Box::new(move |stop: oneshot::Receiver<()>| {
            async move {
                let listener = TcpListener::bind(addr).await?;
                serve(listener, acceptor, signer, upstream, stop).await
            }
            .boxed()
        }))
    }
}

fn acceptor(serving: DynamicCert) -> Result<TlsAcceptor> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(ServingCertResolver(serving)));
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Accepts connections until `stop` fires.
///
/// Connections are dropped before the handshake while no signing credential
/// is loaded.
async fn serve(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    signer: DynamicCert,
    upstream: SocketAddr,
    mut stop: oneshot::Receiver<()>,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, %upstream, "Impersonation proxy listening");
    loop {
        let (tcp, client_addr) = tokio::select! {
            _ = &mut stop => {
                info!(%addr, "Impersonation proxy stopped");
                return Ok(());
            }
            res = listener.accept() => match res {
                Ok(conn) => conn,
                Err(error) => {
                    tracing::warn!(%error, "Failed to accept connection");
                    continue;
                }
            },
        };

        if !signer.is_set() {
            tracing::debug!(client.addr = %client_addr, "Refusing connection: signing credential is not loaded");
            continue;
        }

        let acceptor = acceptor.clone();
        tokio::spawn(
            async move {
                if let Err(error) = forward(acceptor, tcp, upstream).await {
                    tracing::debug!(%error, "Connection failed");
                }
            }
            .instrument(debug_span!("conn", client.addr = %client_addr)),
        );
    }
}

async fn forward(acceptor: TlsAcceptor, tcp: TcpStream, upstream: SocketAddr) -> Result<()> {
    let mut tls = acceptor.accept(tcp).await?;
    let mut upstream = TcpStream::connect(upstream).await?;
    let (sent, received) = tokio::io::copy_bidirectional(&mut tls, &mut upstream).await?;
    tracing::trace!(sent, received, "Connection closed");
    Ok(())
}

// === impl ServingCertResolver ===

impl ResolvesServerCert for ServingCertResolver {
    fn resolve(&self, _: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let CertKey { cert_pem, key_pem } = self.0.current()?;
        match certified_key(&cert_pem, &key_pem) {
            Ok(key) => Some(Arc::new(key)),
            Err(error) => {
                tracing::warn!(%error, "Invalid serving certificate");
                None
            }
        }
    }
}

fn certified_key(cert_pem: &[u8], key_pem: &[u8]) -> Result<CertifiedKey> {
    let certs = rustls_pemfile::certs(&mut &*cert_pem).collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut &*key_pem)?
        .ok_or_else(|| anyhow!("no private key found in PEM data"))?;
    let key = rustls::crypto::ring::sign::any_supported_type(&key)?;
    Ok(CertifiedKey::new(certs, key))
}
