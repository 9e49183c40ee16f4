//! A self-signed certificate authority used to issue the proxy's serving
//! certificates.

use crate::x509::{self, PairError};
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use std::net::IpAddr;
use x509_parser::prelude::X509Certificate;

/// Roughly one hundred years; certificates are rotated only when they stop
/// matching the desired state.
pub const APPROXIMATELY_ONE_HUNDRED_YEARS: time::Duration = time::Duration::days(100 * 365);

pub struct CertificateAuthority {
    cert_pem: String,
    key_pem: String,
    cert_der: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum CaError {
    #[error("could not generate private key: {0}")]
    KeyGeneration(rcgen::Error),

    #[error("could not sign certificate: {0}")]
    Signing(rcgen::Error),

    #[error("invalid certificate name {0:?}")]
    InvalidName(String),

    #[error("invalid CA certificate and key: {0}")]
    InvalidPair(#[from] PairError),
}

fn compute_validity(ttl: time::Duration) -> (time::OffsetDateTime, time::OffsetDateTime) {
    let now = time::OffsetDateTime::now_utc();
    (now, now + ttl)
}

// === impl CertificateAuthority ===

impl CertificateAuthority {
    /// Generates a new self-signed CA.
    pub fn new(common_name: &str, ttl: time::Duration) -> Result<Self, CaError> {
        let key = KeyPair::generate().map_err(CaError::KeyGeneration)?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let (not_before, not_after) = compute_validity(ttl);
        params.not_before = not_before;
        params.not_after = not_after;

        let cert = params.self_signed(&key).map_err(CaError::Signing)?;

        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            cert_der: cert.der().to_vec(),
        })
    }

    /// Loads a CA from its stored PEM certificate and private key.
    pub fn load(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, CaError> {
        let cert_der = x509::decode_pem(cert_pem).ok_or(PairError::CertificatePem)?;
        let cert = x509::parse_certificate(&cert_der)?;
        x509::verify_key_pair(&cert, key_pem)?;

        let cert_pem = String::from_utf8(cert_pem.to_vec())
            .map_err(|e| PairError::Certificate(e.to_string()))?;
        let key_pem = String::from_utf8(key_pem.to_vec())
            .map_err(|e| PairError::PrivateKey(e.to_string()))?;
        Ok(Self {
            cert_pem,
            key_pem,
            cert_der,
        })
    }

    /// The PEM-encoded CA certificate, for distribution to clients.
    pub fn bundle(&self) -> &[u8] {
        self.cert_pem.as_bytes()
    }

    pub fn private_key_pem(&self) -> &[u8] {
        self.key_pem.as_bytes()
    }

    /// Returns true if `cert` chains to this CA.
    pub fn verify(&self, cert: &X509Certificate<'_>) -> bool {
        match x509::parse_certificate(&self.cert_der) {
            Ok(ca) => x509::is_signed_by(cert, &ca),
            Err(_) => false,
        }
    }

    /// Issues a serving certificate covering exactly the given names.
    ///
    /// Returns the PEM-encoded certificate and private key.
    pub fn issue_server_cert(
        &self,
        hostnames: &[String],
        ips: &[IpAddr],
        ttl: time::Duration,
    ) -> Result<(Vec<u8>, Vec<u8>), CaError> {
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let (not_before, not_after) = compute_validity(ttl);
        params.not_before = not_before;
        params.not_after = not_after;

        let mut sans = Vec::with_capacity(hostnames.len() + ips.len());
        for hostname in hostnames {
            let name = Ia5String::try_from(hostname.clone())
                .map_err(|_| CaError::InvalidName(hostname.clone()))?;
            sans.push(SanType::DnsName(name));
        }
        sans.extend(ips.iter().copied().map(SanType::IpAddress));
        params.subject_alt_names = sans;

        let key = KeyPair::generate().map_err(CaError::KeyGeneration)?;
        let ca_key = x509::parse_private_key(self.key_pem.as_bytes())?;
        let issuer =
            Issuer::from_ca_cert_pem(&self.cert_pem, &ca_key).map_err(CaError::Signing)?;
        let cert = params.signed_by(&key, &issuer).map_err(CaError::Signing)?;

        Ok((cert.pem().into_bytes(), key.serialize_pem().into_bytes()))
    }
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("cert_pem", &self.cert_pem)
            .finish_non_exhaustive()
    }
}
