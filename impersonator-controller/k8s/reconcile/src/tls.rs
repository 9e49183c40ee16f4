//! Reconciles the proxy's CA, its serving certificate and the signing
//! credential.

use crate::{metrics::ControllerMetrics, store::Store, Config, Error};
use impersonator_controller_core::{
    find_staleness, CertNameInfo, CertificateAuthority, DynamicCert,
    APPROXIMATELY_ONE_HUNDRED_YEARS,
};
use impersonator_controller_k8s_api::{
    self as k8s, ByteString, SECRET_TYPE_OPAQUE, SECRET_TYPE_TLS, TLS_CERT_KEY,
    TLS_PRIVATE_KEY_KEY,
};

pub const CA_COMMON_NAME: &str = "Impersonation Proxy CA";
pub const CA_CERT_KEY: &str = "ca.crt";
pub const CA_PRIVATE_KEY_KEY: &str = "ca.key";

pub const SIGNER_CERT_KEY: &str = "caCertificate";
pub const SIGNER_PRIVATE_KEY_KEY: &str = "caCertificatePrivateKey";

/// Loads the CA from its secret, creating both if the secret does not exist.
///
/// Stored material that cannot be parsed is an error; it is never replaced.
pub async fn ensure_ca(store: &dyn Store, config: &Config) -> Result<CertificateAuthority, Error> {
    if let Some(secret) = store.secret(&config.ca_secret) {
        return CertificateAuthority::load(
            data(&secret, CA_CERT_KEY),
            data(&secret, CA_PRIVATE_KEY_KEY),
        )
        .map_err(|source| Error::LoadCa {
            secret: config.ca_secret.clone(),
            source,
        });
    }

    tracing::info!(secret = %config.ca_secret, "Creating CA certificates for impersonation proxy");
    let ca = CertificateAuthority::new(CA_COMMON_NAME, APPROXIMATELY_ONE_HUNDRED_YEARS)
        .map_err(Error::CreateCa)?;
    store
        .create_secret(secret(
            config,
            &config.ca_secret,
            SECRET_TYPE_OPAQUE,
            [
                (CA_CERT_KEY, ca.bundle()),
                (CA_PRIVATE_KEY_KEY, ca.private_key_pem()),
            ],
        ))
        .await?;
    Ok(ca)
}

/// Ensures the serving certificate secret is signed by `ca` and covers
/// exactly `name`, and loads it into the serving provider.
///
/// A stale secret is deleted. A new one is issued only once the name is
/// resolved; until then no certificate is served.
pub async fn ensure_tls_secret(
    store: &dyn Store,
    config: &Config,
    ca: &CertificateAuthority,
    name: &CertNameInfo,
    serving: &DynamicCert,
    metrics: &ControllerMetrics,
) -> Result<(), Error> {
    let mut existing = store.secret(&config.tls_secret);
    if let Some(secret) = existing.as_ref() {
        let cert = data(secret, TLS_CERT_KEY);
        let key = data(secret, TLS_PRIVATE_KEY_KEY);
        if let Some(reason) = find_staleness(cert, key, ca, name) {
            tracing::info!(secret = %config.tls_secret, %reason, "Deleting stale serving certificate");
            delete_tls_secret(store, config, serving, metrics).await?;
            existing = None;
        }
    }

    if let Some(secret) = existing {
        return load_serving(
            config,
            serving,
            data(&secret, TLS_CERT_KEY),
            data(&secret, TLS_PRIVATE_KEY_KEY),
        );
    }

    let Some(cert_name) = name.name() else {
        tracing::debug!("Waiting for the certificate name to be resolved");
        return Ok(());
    };

    tracing::info!(secret = %config.tls_secret, ?cert_name, "Creating serving certificate");
    let (hostnames, ips) = cert_name.to_sans();
    let (cert, key) = ca
        .issue_server_cert(&hostnames, &ips, APPROXIMATELY_ONE_HUNDRED_YEARS)
        .map_err(Error::IssueCert)?;
    store
        .create_secret(secret(
            config,
            &config.tls_secret,
            SECRET_TYPE_TLS,
            [(TLS_CERT_KEY, &*cert), (TLS_PRIVATE_KEY_KEY, &*key)],
        ))
        .await?;
    metrics.tls_secret_created();

    load_serving(config, serving, &cert, &key)
}

/// Deletes the serving certificate secret if it exists.
pub async fn ensure_tls_secret_absent(
    store: &dyn Store,
    config: &Config,
    serving: &DynamicCert,
    metrics: &ControllerMetrics,
) -> Result<(), Error> {
    if store.secret(&config.tls_secret).is_none() {
        return Ok(());
    }
    delete_tls_secret(store, config, serving, metrics).await
}

async fn delete_tls_secret(
    store: &dyn Store,
    config: &Config,
    serving: &DynamicCert,
    metrics: &ControllerMetrics,
) -> Result<(), Error> {
    match store.delete_secret(&config.tls_secret).await {
        Ok(()) => metrics.tls_secret_deleted(),
        Err(error) if error.is_not_found() => {
            tracing::debug!(secret = %config.tls_secret, "Secret was already deleted");
        }
        Err(error) => return Err(error.into()),
    }
    serving.unset_cert_key_content();
    Ok(())
}

fn load_serving(
    config: &Config,
    serving: &DynamicCert,
    cert: &[u8],
    key: &[u8],
) -> Result<(), Error> {
    serving
        .set_cert_key_content(cert, key)
        .map_err(|source| Error::LoadServingCert {
            secret: config.tls_secret.clone(),
            source,
        })
}

/// Loads the signing credential into `signer`. A missing or invalid secret
/// is an error.
pub fn load_signer(store: &dyn Store, config: &Config, signer: &DynamicCert) -> Result<(), Error> {
    let secret = store
        .secret(&config.signer_secret)
        .ok_or_else(|| Error::MissingSigner {
            secret: config.signer_secret.clone(),
        })?;
    signer
        .set_cert_key_content(
            data(&secret, SIGNER_CERT_KEY),
            data(&secret, SIGNER_PRIVATE_KEY_KEY),
        )
        .map_err(|source| Error::LoadSigner {
            secret: config.signer_secret.clone(),
            source,
        })
}

/// Returns the value stored under `key`, or an empty slice.
pub fn data<'s>(secret: &'s k8s::Secret, key: &str) -> &'s [u8] {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|ByteString(bytes)| bytes.as_slice())
        .unwrap_or_default()
}

fn secret<'a>(
    config: &Config,
    name: &str,
    type_: &str,
    data: impl IntoIterator<Item = (&'a str, &'a [u8])>,
) -> k8s::Secret {
    k8s::Secret {
        metadata: k8s::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(config.namespace.clone()),
            labels: Some(config.labels.to_map()),
            ..Default::default()
        },
        type_: Some(type_.to_string()),
        data: Some(
            data.into_iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}
