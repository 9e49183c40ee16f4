use crate::{ca::CertificateAuthority, cert_name::CertNameInfo, desired::DesiredSpec};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use impersonator_controller_k8s_api::{
    credential_issuer::{IMPERSONATION_PROXY_FRONTEND_TYPE, IMPERSONATION_PROXY_STRATEGY_TYPE},
    CredentialIssuerFrontend, CredentialIssuerStrategy, ImpersonationProxyInfo, StrategyReason,
    StrategyStatus,
};

/// Derives the published strategy from a completed sync pass.
pub fn compose(
    spec: &DesiredSpec,
    has_control_plane: bool,
    name: &CertNameInfo,
    ca: Option<&CertificateAuthority>,
    now: DateTime<Utc>,
) -> CredentialIssuerStrategy {
    if spec.disabled_explicitly() {
        return error(
            StrategyReason::DisabledExplicitly,
            "impersonation proxy was explicitly disabled by configuration",
            now,
        );
    }

    if spec.disabled_automatically(has_control_plane) {
        return error(
            StrategyReason::DisabledAutomatically,
            "automatically determined that impersonation proxy should be disabled",
            now,
        );
    }

    let client_endpoint = match name.client_endpoint() {
        Some(endpoint) => endpoint,
        None => {
            return error(
                StrategyReason::Pending,
                "waiting for load balancer Service to be assigned IP or hostname",
                now,
            )
        }
    };

    let ca_data = ca
        .map(|ca| base64::engine::general_purpose::STANDARD.encode(ca.bundle()))
        .unwrap_or_default();
    CredentialIssuerStrategy {
        type_: IMPERSONATION_PROXY_STRATEGY_TYPE.to_string(),
        status: StrategyStatus::Success,
        reason: StrategyReason::Listening,
        message: "impersonation proxy is ready to accept client connections".to_string(),
        last_update_time: now,
        frontend: Some(CredentialIssuerFrontend {
            type_: IMPERSONATION_PROXY_FRONTEND_TYPE.to_string(),
            impersonation_proxy_info: ImpersonationProxyInfo {
                endpoint: format!("https://{client_endpoint}"),
                certificate_authority_data: ca_data,
            },
        }),
    }
}

pub fn error(
    reason: StrategyReason,
    message: impl Into<String>,
    now: DateTime<Utc>,
) -> CredentialIssuerStrategy {
    CredentialIssuerStrategy {
        type_: IMPERSONATION_PROXY_STRATEGY_TYPE.to_string(),
        status: StrategyStatus::Error,
        reason,
        message: message.into(),
        last_update_time: now,
        frontend: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::APPROXIMATELY_ONE_HUNDRED_YEARS;
    use impersonator_controller_k8s_api::{ImpersonationProxyServiceSpec, ImpersonationProxySpec};
    use pretty_assertions::assert_eq;

    fn spec(mode: &str) -> DesiredSpec {
        DesiredSpec::parse(Some(&ImpersonationProxySpec {
            mode: mode.to_string(),
            service: ImpersonationProxyServiceSpec::default(),
            external_endpoint: None,
        }))
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::MIN_UTC
    }

    #[test]
    fn disabled_reasons_take_priority() {
        let name = CertNameInfo::hostname("proxy.example.com");
        let s = compose(&spec("disabled"), false, &name, None, now());
        assert_eq!(s.status, StrategyStatus::Error);
        assert_eq!(s.reason, StrategyReason::DisabledExplicitly);

        let s = compose(&spec("auto"), true, &name, None, now());
        assert_eq!(s.reason, StrategyReason::DisabledAutomatically);
    }

    #[test]
    fn pending_until_name_resolves() {
        let s = compose(&spec("enabled"), true, &CertNameInfo::Pending, None, now());
        assert_eq!(
            s,
            error(
                StrategyReason::Pending,
                "waiting for load balancer Service to be assigned IP or hostname",
                now()
            )
        );
    }

    #[test]
    fn listening_carries_endpoint_and_bundle() {
        let ca = CertificateAuthority::new("CA", APPROXIMATELY_ONE_HUNDRED_YEARS).unwrap();
        let name = CertNameInfo::ips(vec!["10.0.0.5".parse().unwrap()], "10.0.0.5");
        let s = compose(&spec("auto"), false, &name, Some(&ca), now());
        assert_eq!(s.status, StrategyStatus::Success);
        assert_eq!(s.reason, StrategyReason::Listening);
        let info = s.frontend.unwrap().impersonation_proxy_info;
        assert_eq!(info.endpoint, "https://10.0.0.5");
        assert_eq!(
            base64::engine::general_purpose::STANDARD
                .decode(info.certificate_authority_data)
                .unwrap(),
            ca.bundle()
        );
    }
}
