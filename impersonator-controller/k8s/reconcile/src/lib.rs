#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
mod cluster;
mod controller;
mod error;
pub mod exposure;
mod metrics;
mod process;
mod queue;
pub mod resolve;
mod store;
pub mod tls;

#[cfg(test)]
mod tests;

pub use self::{
    cache::{Index, SharedIndex},
    cluster::ClusterStore,
    controller::Controller,
    error::Error,
    metrics::ControllerMetrics,
    process::{ProxyError, ProxyProcess, ServerFactory, StartFn},
    queue::Queue,
    store::{StatusSink, Store, StoreError},
};

use impersonator_controller_k8s_api::Labels;

/// The port the proxy listens on and the exposure Services target.
pub const DEFAULT_PROXY_PORT: u16 = 8444;

/// Names and labels of everything the controller manages.
#[derive(Clone, Debug)]
pub struct Config {
    /// Namespace holding the Services and Secrets.
    pub namespace: String,
    pub credential_issuer: String,
    pub load_balancer_service: String,
    pub cluster_ip_service: String,
    pub tls_secret: String,
    pub ca_secret: String,
    /// Holds the CA that signs issued client certificates.
    pub signer_secret: String,
    pub labels: Labels,
    pub proxy_port: u16,
}
