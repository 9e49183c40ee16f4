#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use impersonator_controller_core as core;
pub use impersonator_controller_k8s_api as k8s;
pub use impersonator_controller_k8s_reconcile as reconcile;

mod args;
mod proxy;

pub use self::{args::Args, proxy::ProxyServerFactory};
