use crate::x509::{self, PairError};
use parking_lot::RwLock;
use std::{fmt, sync::Arc};

/// A PEM-encoded certificate and its private key.
#[derive(Clone, PartialEq, Eq)]
pub struct CertKey {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

/// A shared, replaceable certificate/key pair.
///
/// Clones share the same content, so a TLS listener holding a clone observes
/// every update the controller makes.
#[derive(Clone)]
pub struct DynamicCert {
    name: Arc<str>,
    content: Arc<RwLock<Option<CertKey>>>,
}

// === impl DynamicCert ===

impl DynamicCert {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            content: Default::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replaces the content after validating that the key matches the
    /// certificate. Invalid content leaves the current content in place.
    pub fn set_cert_key_content(&self, cert_pem: &[u8], key_pem: &[u8]) -> Result<(), PairError> {
        x509::validate_pair(cert_pem, key_pem)?;
        *self.content.write() = Some(CertKey {
            cert_pem: cert_pem.to_vec(),
            key_pem: key_pem.to_vec(),
        });
        tracing::debug!(name = %self.name, "Updated certificate content");
        Ok(())
    }

    pub fn unset_cert_key_content(&self) {
        if self.content.write().take().is_some() {
            tracing::debug!(name = %self.name, "Cleared certificate content");
        }
    }

    pub fn current(&self) -> Option<CertKey> {
        self.content.read().clone()
    }

    pub fn is_set(&self) -> bool {
        self.content.read().is_some()
    }
}

impl fmt::Debug for DynamicCert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicCert")
            .field("name", &self.name)
            .field("set", &self.is_set())
            .finish()
    }
}

impl fmt::Debug for CertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertKey")
            .field("cert_pem", &String::from_utf8_lossy(&self.cert_pem))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::CertificateAuthority;

    const TTL: time::Duration = time::Duration::days(1);

    #[test]
    fn set_validates_and_shares_content() {
        let ca = CertificateAuthority::new("Test CA", TTL).unwrap();
        let (cert, key) = ca
            .issue_server_cert(&["a.example.com".to_string()], &[], TTL)
            .unwrap();

        let provider = DynamicCert::new("serving");
        let listener_view = provider.clone();
        assert!(!listener_view.is_set());

        provider.set_cert_key_content(&cert, &key).unwrap();
        assert_eq!(listener_view.current().unwrap().cert_pem, cert);

        provider.unset_cert_key_content();
        assert!(listener_view.current().is_none());
    }

    #[test]
    fn invalid_content_is_rejected_and_previous_retained() {
        let ca = CertificateAuthority::new("Test CA", TTL).unwrap();
        let (cert, key) = ca.issue_server_cert(&[], &["10.0.0.1".parse().unwrap()], TTL).unwrap();
        let (_, other_key) = ca.issue_server_cert(&[], &["10.0.0.2".parse().unwrap()], TTL).unwrap();

        let provider = DynamicCert::new("serving");
        provider.set_cert_key_content(&cert, &key).unwrap();

        assert_eq!(
            provider.set_cert_key_content(b"garbage", &key),
            Err(PairError::CertificatePem)
        );
        assert_eq!(
            provider.set_cert_key_content(&cert, &other_key),
            Err(PairError::Mismatch)
        );
        assert_eq!(provider.current().unwrap().key_pem, key);
    }

    #[test]
    fn accepts_sec1_keys() {
        let provider = DynamicCert::new("signer");
        provider
            .set_cert_key_content(
                include_bytes!("testdata/ec-sec1.crt"),
                include_bytes!("testdata/ec-sec1.key"),
            )
            .unwrap();
        assert!(provider.is_set());
    }
}
