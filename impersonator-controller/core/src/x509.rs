//! Certificate decoding and inspection helpers.

use rcgen::KeyPair;
use std::net::IpAddr;
use x509_parser::prelude::*;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PairError {
    #[error("certificate data is missing or not PEM-encoded")]
    CertificatePem,

    #[error("failed to parse certificate: {0}")]
    Certificate(String),

    #[error("failed to parse private key: {0}")]
    PrivateKey(String),

    #[error("private key does not match certificate")]
    Mismatch,
}

/// The subject alternative names carried by a certificate, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CertificateNames {
    pub ips: Vec<IpAddr>,
    pub dns_names: Vec<String>,
}

/// Decodes the first PEM block, returning its DER contents.
pub fn decode_pem(data: &[u8]) -> Option<Vec<u8>> {
    ::pem::parse(data).ok().map(|p| p.contents().to_vec())
}

pub fn parse_certificate(der: &[u8]) -> Result<X509Certificate<'_>, PairError> {
    X509Certificate::from_der(der)
        .map(|(_, cert)| cert)
        .map_err(|e| PairError::Certificate(e.to_string()))
}

/// Parses a PKCS#8 private key for signing with `rcgen`.
pub fn parse_private_key(key_pem: &[u8]) -> Result<KeyPair, PairError> {
    let key_pem = std::str::from_utf8(key_pem).map_err(|e| PairError::PrivateKey(e.to_string()))?;
    KeyPair::from_pem(key_pem).map_err(|e| PairError::PrivateKey(e.to_string()))
}

/// Checks that the private key is the one certified by `cert`.
///
/// PKCS#1, SEC1 and PKCS#8 keys are accepted; the key's public half is
/// compared with the certificate's SubjectPublicKeyInfo.
pub fn verify_key_pair(cert: &X509Certificate<'_>, key_pem: &[u8]) -> Result<(), PairError> {
    let key = rustls_pemfile::private_key(&mut &*key_pem)
        .map_err(|e| PairError::PrivateKey(e.to_string()))?
        .ok_or_else(|| PairError::PrivateKey("no private key found in PEM data".to_string()))?;
    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)
        .map_err(|e| PairError::PrivateKey(e.to_string()))?;
    let spki = signing_key
        .public_key()
        .ok_or_else(|| PairError::PrivateKey("unsupported key algorithm".to_string()))?;
    if spki.as_ref() != cert.public_key().raw {
        return Err(PairError::Mismatch);
    }
    Ok(())
}

/// Validates a PEM certificate/key pair the way a TLS server would load it.
pub fn validate_pair(cert_pem: &[u8], key_pem: &[u8]) -> Result<(), PairError> {
    let der = decode_pem(cert_pem).ok_or(PairError::CertificatePem)?;
    let cert = parse_certificate(&der)?;
    verify_key_pair(&cert, key_pem)
}

/// Checks that `cert` was issued and signed by `issuer` and is currently valid.
pub fn is_signed_by(cert: &X509Certificate<'_>, issuer: &X509Certificate<'_>) -> bool {
    cert.issuer().as_raw() == issuer.subject().as_raw()
        && cert.verify_signature(Some(issuer.public_key())).is_ok()
        && cert.validity().is_valid()
}

pub fn certificate_names(cert: &X509Certificate<'_>) -> CertificateNames {
    let mut names = CertificateNames::default();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in san.value.general_names.iter() {
            match name {
                GeneralName::DNSName(dns) => names.dns_names.push(dns.to_string()),
                GeneralName::IPAddress(bytes) => {
                    if let Some(ip) = ip_from_bytes(bytes) {
                        names.ips.push(ip);
                    }
                }
                _ => {}
            }
        }
    }
    names
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    if let Ok(v4) = <[u8; 4]>::try_from(bytes) {
        return Some(IpAddr::from(v4));
    }
    <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC1_CERT: &[u8] = include_bytes!("testdata/ec-sec1.crt");
    const SEC1_KEY: &[u8] = include_bytes!("testdata/ec-sec1.key");
    const PKCS1_CERT: &[u8] = include_bytes!("testdata/rsa-pkcs1.crt");
    const PKCS1_KEY: &[u8] = include_bytes!("testdata/rsa-pkcs1.key");

    #[test]
    fn accepts_sec1_and_pkcs1_keys() {
        validate_pair(SEC1_CERT, SEC1_KEY).unwrap();
        validate_pair(PKCS1_CERT, PKCS1_KEY).unwrap();
    }

    #[test]
    fn rejects_keys_of_other_certificates() {
        assert_eq!(validate_pair(SEC1_CERT, PKCS1_KEY), Err(PairError::Mismatch));
        assert_eq!(validate_pair(PKCS1_CERT, SEC1_KEY), Err(PairError::Mismatch));
    }

    #[test]
    fn rejects_missing_key() {
        assert!(matches!(
            validate_pair(SEC1_CERT, b""),
            Err(PairError::PrivateKey(_))
        ));
    }

    #[test]
    fn reads_subject_alternative_names() {
        let der = decode_pem(SEC1_CERT).unwrap();
        let cert = parse_certificate(&der).unwrap();
        assert_eq!(
            certificate_names(&cert),
            CertificateNames {
                ips: vec![],
                dns_names: vec!["sec1.example.com".to_string()],
            }
        );
    }
}
