//! Determines the name the serving certificate must cover.

use crate::{store::Store, Config};
use impersonator_controller_core::{
    CertNameInfo, DesiredSpec, HostPort, ServiceType, DEFAULT_HTTPS_PORT,
};
use impersonator_controller_k8s_api::{self as k8s, LoadBalancerIngress, ResourceExt};
use std::net::IpAddr;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("could not find valid IP addresses or hostnames from load balancer {namespace}/{name}")]
    UnusableIngress { namespace: String, name: String },
}

/// Resolves the certificate name from the explicit endpoint, the ClusterIP
/// Service or the load balancer Service, in that order of preference.
pub fn cert_name(
    store: &dyn Store,
    config: &Config,
    spec: &DesiredSpec,
) -> Result<CertNameInfo, ResolveError> {
    if let Some(endpoint) = spec.external_endpoint.as_ref() {
        return Ok(CertNameInfo::from_endpoint(endpoint));
    }

    if spec.service_type == ServiceType::ClusterIp {
        return Ok(store
            .service(&config.cluster_ip_service)
            .map(|svc| from_cluster_ip(&svc))
            .unwrap_or_default());
    }

    match store.service(&config.load_balancer_service) {
        Some(svc) => from_load_balancer(&svc),
        None => Ok(CertNameInfo::Pending),
    }
}

pub fn from_cluster_ip(svc: &k8s::Service) -> CertNameInfo {
    let Some(spec) = svc.spec.as_ref() else {
        return CertNameInfo::Pending;
    };

    let ips = match spec.cluster_ips.as_ref() {
        Some(ips) if !ips.is_empty() => ips.iter().filter_map(|ip| ip.parse().ok()).collect(),
        _ => spec
            .cluster_ip
            .iter()
            .filter_map(|ip| ip.parse().ok())
            .collect::<Vec<IpAddr>>(),
    };
    let Some(first) = ips.first() else {
        return CertNameInfo::Pending;
    };

    let host = match spec.cluster_ip.as_deref() {
        Some(ip) if !ip.is_empty() => ip.to_string(),
        _ => first.to_string(),
    };
    let endpoint = HostPort {
        host,
        port: DEFAULT_HTTPS_PORT,
    };
    CertNameInfo::ips(ips, endpoint.client_endpoint())
}

/// Prefers the first ingress hostname, then the first ingress IP.
pub fn from_load_balancer(svc: &k8s::Service) -> Result<CertNameInfo, ResolveError> {
    let ingress = svc
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_deref())
        .unwrap_or_default();

    match ingress.first() {
        None => return Ok(CertNameInfo::Pending),
        Some(first) if hostname(first).is_none() && first.ip.as_deref().unwrap_or("").is_empty() => {
            return Ok(CertNameInfo::Pending)
        }
        Some(_) => {}
    }

    if let Some(host) = ingress.iter().find_map(hostname) {
        return Ok(CertNameInfo::hostname(host));
    }

    if let Some(ip) = ingress
        .iter()
        .find_map(|i| i.ip.as_deref().and_then(|ip| ip.parse::<IpAddr>().ok()))
    {
        let endpoint = HostPort {
            host: ip.to_string(),
            port: DEFAULT_HTTPS_PORT,
        };
        return Ok(CertNameInfo::ips(vec![ip], endpoint.client_endpoint()));
    }

    Err(ResolveError::UnusableIngress {
        namespace: svc.namespace().unwrap_or_default(),
        name: svc.name_any(),
    })
}

fn hostname(ingress: &LoadBalancerIngress) -> Option<&str> {
    ingress.hostname.as_deref().filter(|h| !h.is_empty())
}
