use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

pub const IMPERSONATION_PROXY_STRATEGY_TYPE: &str = "ImpersonationProxy";
pub const IMPERSONATION_PROXY_FRONTEND_TYPE: &str = "ImpersonationProxyInfo";

/// Describes how cluster clients obtain credentials, and, via
/// `impersonationProxy`, whether the impersonation proxy should be exposed.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "config.impersonation.dev",
    version = "v1alpha1",
    kind = "CredentialIssuer",
    status = "CredentialIssuerStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CredentialIssuerSpec {
    pub impersonation_proxy: Option<ImpersonationProxySpec>,
}

/// The raw, unvalidated impersonation proxy configuration.
///
/// Fields are kept as strings so that unknown values survive deserialization
/// and can be reported back through the status.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImpersonationProxySpec {
    pub mode: String,

    #[serde(default)]
    pub service: ImpersonationProxyServiceSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_endpoint: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImpersonationProxyServiceSpec {
    #[serde(default, rename = "type")]
    pub type_: String,

    #[serde(
        default,
        rename = "loadBalancerIP",
        skip_serializing_if = "Option::is_none"
    )]
    pub load_balancer_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialIssuerStatus {
    #[serde(default)]
    pub strategies: Vec<CredentialIssuerStrategy>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialIssuerStrategy {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: StrategyStatus,
    pub reason: StrategyReason,
    pub message: String,
    #[schemars(with = "String")]
    pub last_update_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<CredentialIssuerFrontend>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum StrategyStatus {
    Success,
    Error,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyReason {
    DisabledExplicitly,
    DisabledAutomatically,
    Pending,
    Listening,
    ErrorDuringSetup,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialIssuerFrontend {
    #[serde(rename = "type")]
    pub type_: String,
    pub impersonation_proxy_info: ImpersonationProxyInfo,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImpersonationProxyInfo {
    pub endpoint: String,
    pub certificate_authority_data: String,
}

// === impl StrategyReason ===

impl StrategyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DisabledExplicitly => "disabled-explicitly",
            Self::DisabledAutomatically => "disabled-automatically",
            Self::Pending => "pending",
            Self::Listening => "listening",
            Self::ErrorDuringSetup => "error-during-setup",
        }
    }
}

impl fmt::Display for StrategyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl CredentialIssuerStatus ===

impl CredentialIssuerStatus {
    /// Replaces the strategy of the same type, or appends it if there is
    /// none. Returns false when an identical strategy (ignoring its
    /// timestamp) is already recorded.
    pub fn upsert(&mut self, strategy: CredentialIssuerStrategy) -> bool {
        match self
            .strategies
            .iter_mut()
            .find(|s| s.type_ == strategy.type_)
        {
            Some(existing) if existing.same_outcome(&strategy) => false,
            Some(existing) => {
                *existing = strategy;
                true
            }
            None => {
                self.strategies.push(strategy);
                true
            }
        }
    }
}

impl CredentialIssuerStrategy {
    fn same_outcome(&self, other: &Self) -> bool {
        self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
            && self.frontend == other.frontend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(reason: StrategyReason) -> CredentialIssuerStrategy {
        CredentialIssuerStrategy {
            type_: IMPERSONATION_PROXY_STRATEGY_TYPE.to_string(),
            status: StrategyStatus::Error,
            reason,
            message: "m".to_string(),
            last_update_time: DateTime::<Utc>::MIN_UTC,
            frontend: None,
        }
    }

    #[test]
    fn reasons_serialize_as_tokens() {
        assert_eq!(
            serde_json::to_value(StrategyReason::DisabledAutomatically).unwrap(),
            serde_json::json!("disabled-automatically")
        );
        assert_eq!(StrategyReason::ErrorDuringSetup.to_string(), "error-during-setup");
    }

    #[test]
    fn deserializes_raw_spec() {
        let spec: CredentialIssuerSpec = serde_json::from_value(serde_json::json!({
            "impersonationProxy": {
                "mode": "auto",
                "service": {
                    "type": "LoadBalancer",
                    "loadBalancerIP": "10.0.0.1",
                    "annotations": {"a": "1"},
                },
                "externalEndpoint": "proxy.example.com",
            }
        }))
        .unwrap();
        let proxy = spec.impersonation_proxy.unwrap();
        assert_eq!(proxy.mode, "auto");
        assert_eq!(proxy.service.type_, "LoadBalancer");
        assert_eq!(proxy.service.load_balancer_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(proxy.external_endpoint.as_deref(), Some("proxy.example.com"));
    }

    #[test]
    fn upsert_replaces_by_type() {
        let mut status = CredentialIssuerStatus::default();
        assert!(status.upsert(strategy(StrategyReason::Pending)));
        assert!(!status.upsert(strategy(StrategyReason::Pending)));
        assert!(status.upsert(strategy(StrategyReason::Listening)));
        assert_eq!(status.strategies.len(), 1);
        assert_eq!(status.strategies[0].reason, StrategyReason::Listening);
    }
}
