//! Reconciles the Services that expose the proxy.
//!
//! Annotations are merged rather than replaced: the keys this controller
//! last wrote are recorded in [`ANNOTATION_KEYS_KEY`], so that keys it no
//! longer wants can be removed without touching keys added by anyone else.

use crate::{
    store::{Store, StoreError},
    Config,
};
use impersonator_controller_core::DesiredSpec;
use impersonator_controller_k8s_api::{
    self as k8s, labels::Map, IntOrString, ResourceExt, SERVICE_TYPE_CLUSTER_IP,
    SERVICE_TYPE_LOAD_BALANCER,
};

/// Records, as a JSON array, the annotation keys last written by this
/// controller.
pub const ANNOTATION_KEYS_KEY: &str = "credentialissuer.impersonation.dev/annotation-keys";

/// The port clients connect to on either Service.
pub const SERVICE_PORT: i32 = 443;

pub fn load_balancer(config: &Config, spec: &DesiredSpec) -> k8s::Service {
    let mut svc = service(
        config,
        &config.load_balancer_service,
        SERVICE_TYPE_LOAD_BALANCER,
        &spec.annotations,
    );
    if let Some(svc_spec) = svc.spec.as_mut() {
        svc_spec.load_balancer_ip = spec.load_balancer_ip.map(|ip| ip.to_string());
    }
    svc
}

pub fn cluster_ip(config: &Config, spec: &DesiredSpec) -> k8s::Service {
    service(
        config,
        &config.cluster_ip_service,
        SERVICE_TYPE_CLUSTER_IP,
        &spec.annotations,
    )
}

fn service(config: &Config, name: &str, type_: &str, annotations: &Map) -> k8s::Service {
    k8s::Service {
        metadata: k8s::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(config.namespace.clone()),
            labels: Some(config.labels.to_map()),
            annotations: with_bookkeeping(annotations),
            ..Default::default()
        },
        spec: Some(k8s::ServiceSpec {
            type_: Some(type_.to_string()),
            selector: Some(config.labels.selector()),
            ports: Some(vec![k8s::ServicePort {
                protocol: Some("TCP".to_string()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::Int(config.proxy_port.into())),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Adds the bookkeeping annotation listing the desired keys, unless there are
/// none.
fn with_bookkeeping(annotations: &Map) -> Option<Map> {
    if annotations.is_empty() {
        return None;
    }
    let keys = annotations.keys().collect::<Vec<_>>();
    let mut annotations = annotations.clone();
    annotations.insert(
        ANNOTATION_KEYS_KEY.to_string(),
        serde_json::to_string(&keys).unwrap_or_default(),
    );
    Some(annotations)
}

/// The keys recorded by a previous write. Unparseable values are ignored.
fn recorded_keys(annotations: &Map) -> Vec<String> {
    annotations
        .get(ANNOTATION_KEYS_KEY)
        .and_then(|keys| serde_json::from_str(keys).ok())
        .unwrap_or_default()
}

/// Applies the desired labels, selector, type, load balancer IP and
/// annotations to an existing Service.
///
/// Returns `None` when the result would not differ from `existing`.
pub fn merge(existing: &k8s::Service, desired: &k8s::Service) -> Option<k8s::Service> {
    let mut updated = existing.clone();

    let desired_spec = desired.spec.clone().unwrap_or_default();
    let spec = updated.spec.get_or_insert_with(Default::default);
    spec.type_ = desired_spec.type_;
    spec.selector = desired_spec.selector;
    spec.load_balancer_ip = desired_spec.load_balancer_ip;

    if !same_map(&existing.metadata.labels, &desired.metadata.labels) {
        updated.metadata.labels = desired.metadata.labels.clone();
    }

    let desired_annotations = desired.metadata.annotations.clone().unwrap_or_default();
    let mut annotations = existing.metadata.annotations.clone().unwrap_or_default();
    let previous = recorded_keys(&annotations);
    annotations.extend(desired_annotations.clone());
    for key in previous {
        if !desired_annotations.contains_key(&key) {
            annotations.remove(&key);
        }
    }
    if desired_annotations.is_empty() {
        annotations.remove(ANNOTATION_KEYS_KEY);
    }
    let annotations = Some(annotations);
    if !same_map(&existing.metadata.annotations, &annotations) {
        updated.metadata.annotations = annotations;
    }

    if updated == *existing {
        return None;
    }
    Some(updated)
}

/// Treats an absent map as empty.
fn same_map(a: &Option<Map>, b: &Option<Map>) -> bool {
    let empty = Map::new();
    a.as_ref().unwrap_or(&empty) == b.as_ref().unwrap_or(&empty)
}

/// Creates the Service, or updates the existing one if it has drifted.
pub async fn ensure(store: &dyn Store, desired: k8s::Service) -> Result<(), StoreError> {
    let name = desired.name_any();
    match store.service(&name) {
        None => {
            tracing::info!(service = %name, "Creating Service");
            store.create_service(desired).await
        }
        Some(existing) => match merge(&existing, &desired) {
            None => {
                tracing::debug!(service = %name, "Service is up to date");
                Ok(())
            }
            Some(updated) => {
                tracing::info!(service = %name, "Updating Service");
                store.update_service(updated).await
            }
        },
    }
}

/// Deletes the Service if it exists.
pub async fn ensure_absent(store: &dyn Store, name: &str) -> Result<(), StoreError> {
    if store.service(name).is_none() {
        return Ok(());
    }
    tracing::info!(service = %name, "Deleting Service");
    match store.delete_service(name).await {
        Err(error) if error.is_not_found() => {
            tracing::debug!(service = %name, "Service was already deleted");
            Ok(())
        }
        res => res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use impersonator_controller_k8s_api::{ImpersonationProxyServiceSpec, ImpersonationProxySpec};
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    fn config() -> Config {
        Config {
            namespace: "impersonator".to_string(),
            credential_issuer: "issuer".to_string(),
            load_balancer_service: "proxy-lb".to_string(),
            cluster_ip_service: "proxy-cluster-ip".to_string(),
            tls_secret: "proxy-tls".to_string(),
            ca_secret: "proxy-ca".to_string(),
            signer_secret: "signer".to_string(),
            labels: [("app", "impersonator"), ("team", "auth")]
                .into_iter()
                .collect(),
            proxy_port: crate::DEFAULT_PROXY_PORT,
        }
    }

    fn spec(annotations: Map, load_balancer_ip: Option<&str>) -> DesiredSpec {
        DesiredSpec::parse(Some(&ImpersonationProxySpec {
            mode: "enabled".to_string(),
            service: ImpersonationProxyServiceSpec {
                type_: "LoadBalancer".to_string(),
                load_balancer_ip: load_balancer_ip.map(String::from),
                annotations: Some(annotations),
            },
            external_endpoint: None,
        }))
        .unwrap()
    }

    #[test]
    fn desired_load_balancer_shape() {
        let svc = load_balancer(
            &config(),
            &spec(btreemap! {"b".into() => "2".into(), "a".into() => "1".into()}, Some("10.0.0.9")),
        );
        assert_eq!(svc.metadata.namespace.as_deref(), Some("impersonator"));
        assert_eq!(
            svc.metadata.annotations,
            Some(btreemap! {
                "a".to_string() => "1".to_string(),
                "b".to_string() => "2".to_string(),
                ANNOTATION_KEYS_KEY.to_string() => r#"["a","b"]"#.to_string(),
            })
        );
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
        assert_eq!(spec.load_balancer_ip.as_deref(), Some("10.0.0.9"));
        assert_eq!(
            spec.selector,
            Some(btreemap! {"app".to_string() => "impersonator".to_string()})
        );
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 443);
        assert_eq!(port.target_port, Some(IntOrString::Int(8444)));
    }

    #[test]
    fn no_annotations_means_no_bookkeeping() {
        let svc = cluster_ip(&config(), &spec(Map::new(), None));
        assert_eq!(svc.metadata.annotations, None);
        assert_eq!(svc.spec.unwrap().load_balancer_ip, None);
    }

    #[test]
    fn merge_removes_only_previously_written_keys() {
        let config = config();
        let existing = {
            let mut svc = load_balancer(
                &config,
                &spec(btreemap! {"a".into() => "1".into(), "b".into() => "2".into()}, None),
            );
            svc.metadata
                .annotations
                .as_mut()
                .unwrap()
                .insert("other".into(), "x".into());
            svc
        };
        let desired = load_balancer(
            &config,
            &spec(btreemap! {"b".into() => "2".into(), "c".into() => "3".into()}, None),
        );

        let updated = merge(&existing, &desired).expect("annotations changed");
        assert_eq!(
            updated.metadata.annotations,
            Some(btreemap! {
                "b".to_string() => "2".to_string(),
                "c".to_string() => "3".to_string(),
                "other".to_string() => "x".to_string(),
                ANNOTATION_KEYS_KEY.to_string() => r#"["b","c"]"#.to_string(),
            })
        );
    }

    #[test]
    fn merge_drops_bookkeeping_when_no_annotations_remain() {
        let config = config();
        let existing = load_balancer(&config, &spec(btreemap! {"a".into() => "1".into()}, None));
        let desired = load_balancer(&config, &spec(Map::new(), None));

        let updated = merge(&existing, &desired).expect("annotations changed");
        assert_eq!(updated.metadata.annotations, Some(Map::new()));
    }

    #[test]
    fn merge_is_a_noop_when_nothing_changed() {
        let config = config();
        let desired = load_balancer(&config, &spec(Map::new(), None));
        let mut existing = desired.clone();
        existing.metadata.resource_version = Some("7".into());
        existing.metadata.annotations = Some(Map::new());
        existing
            .spec
            .as_mut()
            .unwrap()
            .cluster_ip = Some("10.96.0.12".into());
        assert_eq!(merge(&existing, &desired), None);
    }

    #[test]
    fn merge_rewrites_type_and_ip_but_not_ports() {
        let config = config();
        let mut existing = load_balancer(&config, &spec(Map::new(), Some("10.0.0.1")));
        existing.spec.as_mut().unwrap().ports = None;
        let desired = load_balancer(&config, &spec(Map::new(), Some("10.0.0.2")));

        let updated = merge(&existing, &desired).expect("IP changed");
        let spec = updated.spec.unwrap();
        assert_eq!(spec.load_balancer_ip.as_deref(), Some("10.0.0.2"));
        assert_eq!(spec.ports, None);
    }

    #[test]
    fn unparseable_bookkeeping_is_ignored() {
        let annotations = btreemap! {ANNOTATION_KEYS_KEY.to_string() => "not json".to_string()};
        assert!(recorded_keys(&annotations).is_empty());
    }
}
