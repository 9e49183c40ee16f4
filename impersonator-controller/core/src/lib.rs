#![forbid(unsafe_code)]

pub mod ca;
pub mod cert_name;
pub mod desired;
pub mod dynamic_cert;
pub mod endpoint;
pub mod serving;
pub mod status;
pub mod x509;

pub use self::{
    ca::{CaError, CertificateAuthority, APPROXIMATELY_ONE_HUNDRED_YEARS},
    cert_name::{CertName, CertNameInfo},
    desired::{Desired, DesiredSpec, Mode, ServiceType, ValidationError},
    dynamic_cert::{CertKey, DynamicCert},
    endpoint::{HostPort, InvalidEndpoint, DEFAULT_HTTPS_PORT},
    serving::{find_staleness, Staleness},
    x509::PairError,
};
