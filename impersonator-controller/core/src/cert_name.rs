use crate::{endpoint::HostPort, x509::CertificateNames};
use std::net::IpAddr;

/// The name a serving certificate must cover.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CertName {
    /// One or more IP addresses, in order.
    Ips(Vec<IpAddr>),
    Hostname(String),
}

/// The outcome of resolving the serving certificate's name.
///
/// `Pending` means the exposure resource has not been assigned an address
/// yet, so certificate issuance must be deferred.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CertNameInfo {
    #[default]
    Pending,
    Ready {
        name: CertName,
        /// Where clients connect; may include a non-default port.
        client_endpoint: String,
    },
}

// === impl CertNameInfo ===

impl CertNameInfo {
    /// Builds a ready name from an operator-supplied endpoint.
    pub fn from_endpoint(addr: &HostPort) -> Self {
        let name = match addr.ip() {
            Some(ip) => CertName::Ips(vec![ip]),
            None => CertName::Hostname(addr.host.clone()),
        };
        Self::Ready {
            name,
            client_endpoint: addr.client_endpoint(),
        }
    }

    pub fn ips(ips: Vec<IpAddr>, client_endpoint: impl Into<String>) -> Self {
        Self::Ready {
            name: CertName::Ips(ips),
            client_endpoint: client_endpoint.into(),
        }
    }

    pub fn hostname(hostname: impl Into<String>) -> Self {
        let hostname = hostname.into();
        Self::Ready {
            client_endpoint: hostname.clone(),
            name: CertName::Hostname(hostname),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn name(&self) -> Option<&CertName> {
        match self {
            Self::Ready { name, .. } => Some(name),
            Self::Pending => None,
        }
    }

    pub fn client_endpoint(&self) -> Option<&str> {
        match self {
            Self::Ready {
                client_endpoint, ..
            } => Some(client_endpoint),
            Self::Pending => None,
        }
    }

    /// Returns true if a certificate with the given names covers exactly this
    /// name: the same IPs in the same order and no DNS names, or exactly one
    /// DNS name equal to the hostname and no IPs.
    pub fn matches(&self, actual: &CertificateNames) -> bool {
        match self.name() {
            Some(CertName::Ips(desired)) => {
                !desired.is_empty()
                    && actual.dns_names.is_empty()
                    && desired.len() == actual.ips.len()
                    && desired
                        .iter()
                        .zip(&actual.ips)
                        .all(|(d, a)| d.to_canonical() == a.to_canonical())
            }
            Some(CertName::Hostname(desired)) => {
                !desired.is_empty()
                    && actual.ips.is_empty()
                    && actual.dns_names.len() == 1
                    && actual.dns_names[0] == *desired
            }
            None => false,
        }
    }
}

// === impl CertName ===

impl CertName {
    /// Splits the name into the hostname and IP lists used when issuing.
    pub fn to_sans(&self) -> (Vec<String>, Vec<IpAddr>) {
        match self {
            Self::Ips(ips) => (vec![], ips.clone()),
            Self::Hostname(host) => (vec![host.clone()], vec![]),
        }
    }
}
