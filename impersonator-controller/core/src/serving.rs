//! Decides whether a stored serving certificate is still usable.
//!
//! Each way a certificate can go stale is an independent check; checks run
//! in a fixed order and the first one that applies names the reason the
//! certificate must be replaced.

use crate::{ca::CertificateAuthority, cert_name::CertNameInfo, x509};
use std::fmt;
use x509_parser::prelude::X509Certificate;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Staleness {
    /// The certificate data is missing or not PEM-encoded.
    Undecodable,
    /// The PEM block does not contain a certificate.
    Unparseable,
    /// The private key does not belong to the certificate.
    KeyMismatch,
    /// The certificate was not issued by the current CA.
    Untrusted,
    /// No name is resolved yet, so any existing certificate is outdated.
    NotReady,
    /// The certificate covers different names than the resolved ones.
    NameMismatch,
}

const CHECKS: [Staleness; 6] = [
    Staleness::Undecodable,
    Staleness::Unparseable,
    Staleness::KeyMismatch,
    Staleness::Untrusted,
    Staleness::NotReady,
    Staleness::NameMismatch,
];

/// Returns the first reason the stored pair should be replaced, if any.
pub fn find_staleness(
    cert_pem: &[u8],
    key_pem: &[u8],
    ca: &CertificateAuthority,
    name: &CertNameInfo,
) -> Option<Staleness> {
    let der = x509::decode_pem(cert_pem);
    let der = der.as_deref();
    CHECKS
        .into_iter()
        .find(|check| check.applies(der, key_pem, ca, name))
}

// === impl Staleness ===

impl Staleness {
    fn applies(
        self,
        der: Option<&[u8]>,
        key_pem: &[u8],
        ca: &CertificateAuthority,
        name: &CertNameInfo,
    ) -> bool {
        match self {
            Self::Undecodable => der.is_none(),
            Self::Unparseable => der.is_some_and(|der| x509::parse_certificate(der).is_err()),
            Self::KeyMismatch => with_cert(der, |cert| x509::verify_key_pair(cert, key_pem).is_err()),
            Self::Untrusted => with_cert(der, |cert| !ca.verify(cert)),
            Self::NotReady => !name.is_ready(),
            Self::NameMismatch => with_cert(der, |cert| {
                !name.matches(&x509::certificate_names(cert))
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undecodable => "certificate is missing or not PEM-encoded",
            Self::Unparseable => "PEM data is not a valid certificate",
            Self::KeyMismatch => "private key does not match certificate",
            Self::Untrusted => "certificate was not issued by the current CA",
            Self::NotReady => "certificate name is not resolved yet",
            Self::NameMismatch => "certificate names do not match the desired names",
        }
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn with_cert(der: Option<&[u8]>, f: impl FnOnce(&X509Certificate<'_>) -> bool) -> bool {
    match der.map(x509::parse_certificate) {
        Some(Ok(cert)) => f(&cert),
        _ => false,
    }
}
