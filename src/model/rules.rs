//! Declarative traffic-management rules, stored externally and consumed here
//! as read-only snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Labels, ServiceInstance};

/// A string matcher as written in rule documents, e.g. `uri: {prefix: /v1}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StringMatch {
    Exact(String),
    Prefix(String),
    Regex(String),
}

/// Request-side match conditions of a route rule. The `source` and
/// `source_labels` fields restrict the rule to traffic originating from a
/// matching workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchCondition {
    pub source: Option<String>,
    pub source_labels: Labels,
    /// Header matches; the pseudo-headers `uri`, `scheme`, `method` and
    /// `authority` address the request line.
    pub headers: BTreeMap<String, StringMatch>,
}

impl MatchCondition {
    /// True when the rule is restricted to particular source workloads.
    pub fn has_source_restriction(&self) -> bool {
        self.source.is_some() || !self.source_labels.is_empty()
    }

    /// Whether any of the proxy's co-located instances satisfies the source
    /// restriction.
    pub fn matches_source(&self, instances: &[ServiceInstance]) -> bool {
        if !self.has_source_restriction() {
            return true;
        }
        instances.iter().any(|instance| {
            self.source.as_deref().is_none_or(|source| source == instance.service.hostname)
                && self.source_labels.is_subset_of(&instance.labels)
        })
    }
}

/// One weighted destination subset of a route split. Weights sum to 100.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationWeight {
    pub labels: Labels,
    pub weight: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpTimeout {
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRetry {
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultDelay {
    pub percent: u32,
    pub fixed_delay_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultAbort {
    pub percent: u32,
    pub http_status: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpFaultInjection {
    pub delay: Option<FaultDelay>,
    pub abort: Option<FaultAbort>,
}

/// Redirect the request instead of forwarding it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRedirect {
    pub uri: Option<String>,
    pub authority: Option<String>,
}

/// Rewrite the request path prefix or authority before forwarding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRewrite {
    pub uri: Option<String>,
    pub authority: Option<String>,
}

/// Shadow traffic to a second destination, fire-and-forget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorDestination {
    pub destination: String,
    pub labels: Labels,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsPolicy {
    pub allow_origin: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub max_age_seconds: Option<u64>,
    pub allow_credentials: Option<bool>,
}

/// A routing rule for one destination service. Rules are applied in
/// descending `precedence` order, ties broken by ascending `name`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteRule {
    pub name: String,
    pub destination: String,
    pub precedence: i32,
    pub r#match: Option<MatchCondition>,
    pub route: Vec<DestinationWeight>,
    pub redirect: Option<HttpRedirect>,
    pub rewrite: Option<HttpRewrite>,
    pub http_req_timeout: Option<HttpTimeout>,
    pub http_req_retries: Option<HttpRetry>,
    pub http_fault: Option<HttpFaultInjection>,
    pub mirror: Option<MirrorDestination>,
    pub cors_policy: Option<CorsPolicy>,
    pub append_headers: BTreeMap<String, String>,
    pub websocket_upgrade: bool,
}

impl RouteRule {
    /// Whether this rule routes (a subset of) traffic to workloads whose
    /// labels include `labels`. Rules without explicit subsets apply to every
    /// workload of the destination.
    pub fn applies_to_destination_labels(&self, labels: &Labels) -> bool {
        self.route.is_empty() || self.route.iter().any(|weight| weight.labels.is_subset_of(labels))
    }
}

/// Load-balancer algorithm selected by a destination policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadBalancing {
    RoundRobin,
    LeastConn,
    Random,
}

/// Simple circuit-breaker knobs; also the source of outlier-detection
/// parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerPolicy {
    pub max_connections: Option<u32>,
    pub http_max_pending_requests: Option<u32>,
    pub http_max_requests: Option<u32>,
    pub http_max_retries: Option<u32>,
    pub http_max_requests_per_connection: Option<u32>,
    pub http_consecutive_errors: Option<u32>,
    pub http_detection_interval_ms: Option<u64>,
    pub sleep_window_ms: Option<u64>,
    pub http_max_ejection_percent: Option<u32>,
}

/// Client-side policy for traffic to one destination subset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationPolicy {
    pub name: String,
    pub destination: String,
    pub labels: Labels,
    pub precedence: i32,
    pub load_balancing: Option<LoadBalancing>,
    pub circuit_breaker: Option<CircuitBreakerPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EgressPort {
    pub port: u16,
    pub protocol: String,
}

/// Permits outbound traffic to a named external host. `destination` may be a
/// DNS wildcard such as `*.example.com`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EgressRule {
    pub name: String,
    pub destination: String,
    pub ports: Vec<EgressPort>,
}

/// Port selector on an ingress rule: by service-port name or number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSelector {
    Number(u16),
    Name(String),
}

/// Routes external traffic arriving at the ingress proxy to a backend
/// service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressRule {
    pub name: String,
    pub precedence: i32,
    pub destination: String,
    pub port: Option<PortSelector>,
    pub authority: Option<StringMatch>,
    pub uri: Option<StringMatch>,
    pub tls_secret: Option<String>,
}
