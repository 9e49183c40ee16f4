//! Resolves a `CredentialIssuer`'s impersonation proxy configuration into the
//! set of resources that should exist.

use crate::endpoint::{HostPort, InvalidEndpoint, DEFAULT_HTTPS_PORT};
use impersonator_controller_k8s_api::ImpersonationProxySpec;
use std::{collections::BTreeMap, net::IpAddr};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Disabled,
    Auto,
    Enabled,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ServiceType {
    None,
    LoadBalancer,
    ClusterIp,
}

/// A validated impersonation proxy configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesiredSpec {
    pub mode: Mode,
    pub service_type: ServiceType,
    pub load_balancer_ip: Option<IpAddr>,
    pub external_endpoint: Option<HostPort>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("spec.impersonationProxy is nil")]
    Missing,

    #[error("invalid proxy mode {0:?} (expected auto, disabled, or enabled)")]
    InvalidMode(String),

    #[error("invalid service type {0:?} (expected None, LoadBalancer, or ClusterIP)")]
    InvalidServiceType(String),

    #[error("invalid LoadBalancerIP {0:?}")]
    InvalidLoadBalancerIp(String),

    #[error("externalEndpoint must be set when service.type is None")]
    MissingExternalEndpoint,

    #[error("invalid ExternalEndpoint {endpoint:?}: {source}")]
    InvalidExternalEndpoint {
        endpoint: String,
        #[source]
        source: InvalidEndpoint,
    },
}

/// Which sub-resources should exist, given a spec and the cluster topology.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Desired {
    pub impersonator: bool,
    pub load_balancer: bool,
    pub cluster_ip: bool,
    pub tls_secret: bool,
}

// === impl DesiredSpec ===

impl DesiredSpec {
    /// Validates a raw spec. When the mode is `disabled`, no other field is
    /// inspected.
    pub fn parse(raw: Option<&ImpersonationProxySpec>) -> Result<Self, ValidationError> {
        let raw = raw.ok_or(ValidationError::Missing)?;

        let mode = match raw.mode.as_str() {
            "disabled" => Mode::Disabled,
            "auto" => Mode::Auto,
            "enabled" => Mode::Enabled,
            other => return Err(ValidationError::InvalidMode(other.to_string())),
        };

        let service_type = match raw.service.type_.as_str() {
            // Normally defaulted by the CRD schema.
            "" | "LoadBalancer" => ServiceType::LoadBalancer,
            "ClusterIP" => ServiceType::ClusterIp,
            "None" => ServiceType::None,
            other if mode != Mode::Disabled => {
                return Err(ValidationError::InvalidServiceType(other.to_string()))
            }
            _ => ServiceType::None,
        };

        let annotations = raw.service.annotations.clone().unwrap_or_default();

        if mode == Mode::Disabled {
            return Ok(Self {
                mode,
                service_type,
                load_balancer_ip: None,
                external_endpoint: None,
                annotations,
            });
        }

        let load_balancer_ip = match raw.service.load_balancer_ip.as_deref() {
            None | Some("") => None,
            Some(ip) => Some(
                ip.parse::<IpAddr>()
                    .map_err(|_| ValidationError::InvalidLoadBalancerIp(ip.to_string()))?,
            ),
        };

        let external_endpoint = match raw.external_endpoint.as_deref() {
            None | Some("") => {
                if service_type == ServiceType::None {
                    return Err(ValidationError::MissingExternalEndpoint);
                }
                None
            }
            Some(endpoint) => Some(HostPort::parse(endpoint, DEFAULT_HTTPS_PORT).map_err(
                |source| ValidationError::InvalidExternalEndpoint {
                    endpoint: endpoint.to_string(),
                    source,
                },
            )?),
        };

        Ok(Self {
            mode,
            service_type,
            load_balancer_ip,
            external_endpoint,
            annotations,
        })
    }

    pub fn disabled_explicitly(&self) -> bool {
        self.mode == Mode::Disabled
    }

    pub fn disabled_automatically(&self, has_control_plane: bool) -> bool {
        self.mode == Mode::Auto && has_control_plane
    }

    pub fn resolve(&self, has_control_plane: bool) -> Desired {
        let impersonator = match self.mode {
            Mode::Enabled => true,
            Mode::Auto => !has_control_plane,
            Mode::Disabled => false,
        };
        Desired {
            impersonator,
            load_balancer: impersonator && self.service_type == ServiceType::LoadBalancer,
            cluster_ip: impersonator && self.service_type == ServiceType::ClusterIp,
            tls_secret: impersonator,
        }
    }
}
