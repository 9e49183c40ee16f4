#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod credential_issuer;
pub mod labels;

pub use self::{
    credential_issuer::{
        CredentialIssuer, CredentialIssuerFrontend, CredentialIssuerSpec, CredentialIssuerStatus,
        CredentialIssuerStrategy, ImpersonationProxyInfo, ImpersonationProxyServiceSpec,
        ImpersonationProxySpec, StrategyReason, StrategyStatus,
    },
    labels::Labels,
};
pub use k8s_openapi::{
    api::core::v1::{
        LoadBalancerIngress, LoadBalancerStatus, Node, Secret, Service, ServicePort, ServiceSpec,
        ServiceStatus,
    },
    apimachinery::pkg::util::intstr::IntOrString,
    ByteString,
};
pub use kube::{
    api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams, ResourceExt},
    runtime::watcher,
    Client, Error, Resource,
};

/// Secret data key holding a TLS certificate.
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Secret data key holding a TLS private key.
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";
pub const SECRET_TYPE_OPAQUE: &str = "Opaque";

pub const SERVICE_TYPE_LOAD_BALANCER: &str = "LoadBalancer";
pub const SERVICE_TYPE_CLUSTER_IP: &str = "ClusterIP";
