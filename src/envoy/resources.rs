//! Value types mirroring the data-plane proxy's v1 JSON configuration.
//! Optional and zero-valued fields are omitted on the wire; list fields are
//! brought into canonical order by the `normalize` passes so that identical
//! inputs serialize to identical bytes.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::model::{Labels, Port};

fn is_false(value: &bool) -> bool {
    !*value
}

/// Renders a listener or host address in the proxy's URL form.
pub fn tcp_address(ip: &str, port: u16) -> String {
    format!("tcp://{ip}:{port}")
}

/// Splits a `tcp://ip:port` address back into its sort key.
pub fn parse_tcp_address(address: &str) -> (String, u16) {
    let trimmed = address.strip_prefix("tcp://").unwrap_or(address);
    match trimmed.rsplit_once(':') {
        Some((ip, port)) => (ip.to_owned(), port.parse().unwrap_or(0)),
        None => (trimmed.to_owned(), 0),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterLocation {
    Read,
    Write,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClusterType {
    #[serde(rename = "sds")]
    Sds,
    #[serde(rename = "static")]
    Static,
    #[serde(rename = "strict_dns")]
    StrictDns,
    #[serde(rename = "original_dst")]
    OriginalDst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LbType {
    #[serde(rename = "round_robin")]
    RoundRobin,
    #[serde(rename = "least_request")]
    LeastRequest,
    #[serde(rename = "random")]
    Random,
    #[serde(rename = "original_dst_lb")]
    OriginalDstLb,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Host {
    pub url: String,
}

/// Client-side TLS context attached to outbound clusters under mutual TLS.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSslContext {
    pub cert_chain_file: String,
    pub private_key_file: String,
    pub ca_cert_file: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub verify_subject_alt_name: Vec<String>,
}

/// TLS-origination context for external destinations; the proxy uses system
/// roots when no CA file is pinned.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExternalSslContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_cert_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UpstreamSslContext {
    Mesh(ClusterSslContext),
    External(ExternalSslContext),
}

/// Server-side TLS context for inbound and ingress listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListenerSslContext {
    pub cert_chain_file: String,
    pub private_key_file: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ca_cert_file: String,
    #[serde(skip_serializing_if = "is_false")]
    pub require_client_certificate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CircuitBreakerPriority {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pending_requests: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_requests: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CircuitBreakers {
    pub default: CircuitBreakerPriority,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutlierDetection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consecutive_5xx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_ejection_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ejection_percent: Option<u32>,
}

/// Generation-time cluster metadata, carried off the wire so the policy pass
/// can match destination policies back to the cluster's origin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterMeta {
    pub hostname: String,
    pub port: Option<Port>,
    pub labels: Labels,
    pub outbound: bool,
    pub external: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    pub connect_timeout_ms: u64,
    #[serde(rename = "type")]
    pub cluster_type: ClusterType,
    pub lb_type: LbType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_requests_per_connection: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<Host>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_context: Option<UpstreamSslContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breakers: Option<CircuitBreakers>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outlier_detection: Option<OutlierDetection>,
    #[serde(skip)]
    pub meta: ClusterMeta,
}

/// Exact or regex header match on a route.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Header {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "is_false")]
    pub regex: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightedClusterEntry {
    pub name: String,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightedClusters {
    pub clusters: Vec<WeightedClusterEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryPolicy {
    pub retry_on: String,
    pub num_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShadowCluster {
    pub cluster: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorsPolicySpec {
    #[serde(skip_serializing_if = "is_false")]
    pub enabled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allow_origin: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub allow_methods: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub allow_headers: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub expose_headers: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub max_age: String,
    #[serde(skip_serializing_if = "is_false")]
    pub allow_credentials: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppendedHeader {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HttpRoute {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_rewrite: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_rewrite: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_redirect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_redirect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weighted_clusters: Option<WeightedClusters>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Header>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow: Option<ShadowCluster>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsPolicySpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub request_headers_to_add: Vec<AppendedHeader>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub opaque_config: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "is_false")]
    pub use_websocket: bool,
    /// Clusters this route references; folded into the cluster bundle during
    /// normalization, never serialized with the route.
    #[serde(skip)]
    pub clusters: Vec<Cluster>,
    /// Fault filters contributed by this route's rule, installed on the
    /// listener filter chain.
    #[serde(skip)]
    pub faults: Vec<HttpFilter>,
}

impl HttpRoute {
    /// A route with no conditions matches every request; once emitted, no
    /// later route for the destination is reachable. A weighted split is not
    /// a catch-all: its table still terminates with the default route.
    pub fn catch_all(&self) -> bool {
        self.weighted_clusters.is_none()
            && self.headers.is_empty()
            && self.path.is_none()
            && self.prefix.as_deref() == Some("/")
    }

    /// Restricts the route to an externally-imposed path or prefix match,
    /// returning `None` when the two matches cannot both hold.
    pub fn combine_path_prefix(mut self, path: Option<&str>, prefix: Option<&str>) -> Option<HttpRoute> {
        let own_path = self.path.clone();
        let own_prefix = self.prefix.clone();
        match (path, prefix, own_path.as_deref(), own_prefix.as_deref()) {
            (None, None, _, _) => Some(self),
            (_, _, None, None | Some("/")) => {
                self.path = path.map(ToOwned::to_owned);
                self.prefix = prefix.map(ToOwned::to_owned);
                Some(self)
            },
            (Some(path), _, Some(own_path), _) if path == own_path => Some(self),
            (_, Some(prefix), _, Some(own_prefix)) if own_prefix.starts_with(prefix) => Some(self),
            (_, Some(prefix), _, Some(own_prefix)) if prefix.starts_with(own_prefix) => {
                self.prefix = Some(prefix.to_owned());
                Some(self)
            },
            (Some(path), _, None, Some(own_prefix)) if path.starts_with(own_prefix) => {
                self.path = Some(path.to_owned());
                self.prefix = None;
                Some(self)
            },
            (_, Some(prefix), Some(own_path), _) if own_path.starts_with(prefix) => Some(self),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VirtualHost {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<HttpRoute>,
}

impl VirtualHost {
    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.routes.iter().flat_map(|route| route.clusters.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HttpRouteConfig {
    pub virtual_hosts: Vec<VirtualHost>,
}

impl HttpRouteConfig {
    pub fn clusters(&self) -> Vec<Cluster> {
        normalize_clusters(self.virtual_hosts.iter().flat_map(|vh| vh.clusters().cloned()).collect())
    }

    pub fn faults(&self) -> Vec<HttpFilter> {
        self.virtual_hosts
            .iter()
            .flat_map(|vh| vh.routes.iter())
            .flat_map(|route| route.faults.iter().cloned())
            .collect()
    }

    /// Sorts virtual hosts by name; route order within a host is the declared
    /// rule order and is preserved.
    pub fn normalize(&mut self) {
        self.virtual_hosts.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

/// Route tables for HTTP outbound traffic, one per listener port.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpRouteConfigs(pub BTreeMap<u16, HttpRouteConfig>);

impl HttpRouteConfigs {
    pub fn ensure_port(&mut self, port: u16) -> &mut HttpRouteConfig {
        self.0.entry(port).or_default()
    }

    pub fn clusters(&self) -> Vec<Cluster> {
        normalize_clusters(self.0.values().flat_map(HttpRouteConfig::clusters).collect())
    }

    /// Merges every port's virtual hosts into a single aggregate table.
    pub fn combine(&self) -> HttpRouteConfig {
        let mut combined = HttpRouteConfig {
            virtual_hosts: self.0.values().flat_map(|config| config.virtual_hosts.iter().cloned()).collect(),
        };
        combined.normalize();
        combined
    }

    pub fn normalize(&mut self) {
        for config in self.0.values_mut() {
            config.normalize();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TcpRoute {
    pub cluster: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub destination_ip_list: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_ip_list: Vec<String>,
    #[serde(skip)]
    pub cluster_ref: Option<Cluster>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TcpRouteConfig {
    pub routes: Vec<TcpRoute>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessLog {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceConfig {
    pub operation_name: String,
}

/// Reference to the route discovery service, used instead of an inline route
/// table on RDS-enabled listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rds {
    pub cluster: String,
    pub route_config_name: String,
    pub refresh_delay_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouterFilterConfig {}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorsFilterConfig {}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AbortFilter {
    pub abort_percent: u32,
    pub http_status: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelayFilter {
    #[serde(rename = "type")]
    pub delay_type: String,
    pub fixed_delay_percent: u32,
    pub fixed_duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FaultFilterConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort: Option<AbortFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<DelayFilter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Header>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub upstream_cluster: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MixerFilterConfig {
    pub mixer_server: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub mixer_attributes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub forward_attributes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "is_false")]
    pub disable_check_calls: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HttpFilterSpec {
    Router(RouterFilterConfig),
    Cors(CorsFilterConfig),
    Fault(FaultFilterConfig),
    Mixer(MixerFilterConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpFilter {
    #[serde(rename = "type")]
    pub filter_type: String,
    pub name: String,
    pub config: HttpFilterSpec,
}

impl HttpFilter {
    pub fn router() -> Self {
        Self {
            filter_type: "decoder".to_owned(),
            name: "router".to_owned(),
            config: HttpFilterSpec::Router(RouterFilterConfig {}),
        }
    }

    pub fn cors() -> Self {
        Self {
            filter_type: String::new(),
            name: "cors".to_owned(),
            config: HttpFilterSpec::Cors(CorsFilterConfig {}),
        }
    }

    pub fn fault(config: FaultFilterConfig) -> Self {
        Self {
            filter_type: "decoder".to_owned(),
            name: "fault".to_owned(),
            config: HttpFilterSpec::Fault(config),
        }
    }

    pub fn mixer(config: MixerFilterConfig) -> Self {
        Self {
            filter_type: "decoder".to_owned(),
            name: "mixer".to_owned(),
            config: HttpFilterSpec::Mixer(config),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpConnectionManagerConfig {
    pub codec_type: String,
    pub stat_prefix: String,
    #[serde(skip_serializing_if = "is_false")]
    pub generate_request_id: bool,
    pub use_remote_address: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracing: Option<TraceConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rds: Option<Rds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_config: Option<HttpRouteConfig>,
    pub filters: Vec<HttpFilter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub access_log: Vec<AccessLog>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TcpProxyFilterConfig {
    pub stat_prefix: String,
    pub route_config: TcpRouteConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MongoProxyFilterConfig {
    pub stat_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedisConnPool {
    pub op_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedisProxyFilterConfig {
    pub cluster_name: String,
    pub stat_prefix: String,
    pub conn_pool: RedisConnPool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NetworkFilterSpec {
    HttpConnectionManager(Box<HttpConnectionManagerConfig>),
    TcpProxy(TcpProxyFilterConfig),
    MongoProxy(MongoProxyFilterConfig),
    RedisProxy(RedisProxyFilterConfig),
    Mixer(MixerFilterConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkFilter {
    #[serde(rename = "type")]
    pub filter_type: FilterLocation,
    pub name: String,
    pub config: NetworkFilterSpec,
}

impl NetworkFilter {
    pub fn http_connection_manager(config: HttpConnectionManagerConfig) -> Self {
        Self {
            filter_type: FilterLocation::Read,
            name: "http_connection_manager".to_owned(),
            config: NetworkFilterSpec::HttpConnectionManager(Box::new(config)),
        }
    }

    pub fn tcp_proxy(route_config: TcpRouteConfig) -> Self {
        Self {
            filter_type: FilterLocation::Read,
            name: "tcp_proxy".to_owned(),
            config: NetworkFilterSpec::TcpProxy(TcpProxyFilterConfig {
                stat_prefix: "tcp".to_owned(),
                route_config,
            }),
        }
    }

    pub fn mongo_proxy() -> Self {
        Self {
            filter_type: FilterLocation::Both,
            name: "mongo_proxy".to_owned(),
            config: NetworkFilterSpec::MongoProxy(MongoProxyFilterConfig { stat_prefix: "mongo".to_owned() }),
        }
    }

    pub fn redis_proxy(cluster_name: String) -> Self {
        Self {
            filter_type: FilterLocation::Both,
            name: "redis_proxy".to_owned(),
            config: NetworkFilterSpec::RedisProxy(RedisProxyFilterConfig {
                cluster_name,
                stat_prefix: "redis".to_owned(),
                conn_pool: RedisConnPool { op_timeout_ms: 30 },
            }),
        }
    }

    pub fn mixer_tcp(config: MixerFilterConfig) -> Self {
        Self {
            filter_type: FilterLocation::Both,
            name: "mixer".to_owned(),
            config: NetworkFilterSpec::Mixer(config),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listener {
    pub name: String,
    pub address: String,
    pub bind_to_port: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub use_original_dst: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_context: Option<ListenerSslContext>,
    pub filters: Vec<NetworkFilter>,
}

/// Orders listeners by `(address, port)` and drops duplicates on the same
/// address, keeping the first.
pub fn normalize_listeners(mut listeners: Vec<Listener>) -> Vec<Listener> {
    listeners.sort_by_key(|listener| parse_tcp_address(&listener.address));
    let mut out: Vec<Listener> = Vec::with_capacity(listeners.len());
    for listener in listeners {
        if let Some(existing) = out.iter().find(|l| l.address == listener.address) {
            warn!(
                kept = %existing.name,
                dropped = %listener.name,
                address = %listener.address,
                "duplicate listener address"
            );
            continue;
        }
        out.push(listener);
    }
    out
}

/// Orders clusters by name and drops duplicate names, keeping the first.
/// Conflicting definitions under the same name are a configuration defect and
/// are logged.
pub fn normalize_clusters(mut clusters: Vec<Cluster>) -> Vec<Cluster> {
    clusters.sort_by(|a, b| a.name.cmp(&b.name));
    let mut out: Vec<Cluster> = Vec::with_capacity(clusters.len());
    for cluster in clusters {
        match out.last() {
            Some(existing) if existing.name == cluster.name => {
                if *existing != cluster {
                    warn!(name = %cluster.name, "conflicting cluster definitions, keeping the first");
                }
            },
            _ => out.push(cluster),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener(name: &str, ip: &str, port: u16) -> Listener {
        Listener {
            name: name.to_owned(),
            address: tcp_address(ip, port),
            bind_to_port: true,
            use_original_dst: false,
            ssl_context: None,
            filters: vec![],
        }
    }

    fn cluster(name: &str) -> Cluster {
        Cluster {
            name: name.to_owned(),
            service_name: None,
            connect_timeout_ms: 1000,
            cluster_type: ClusterType::Static,
            lb_type: LbType::RoundRobin,
            max_requests_per_connection: None,
            hosts: vec![],
            ssl_context: None,
            features: None,
            circuit_breakers: None,
            outlier_detection: None,
            meta: ClusterMeta::default(),
        }
    }

    #[test]
    fn listeners_sort_by_address_and_dedupe() {
        let normalized = normalize_listeners(vec![
            listener("c", "10.1.1.0", 90),
            listener("a", "0.0.0.0", 80),
            listener("b", "10.1.1.0", 80),
            listener("dup", "0.0.0.0", 80),
        ]);
        let names = normalized.iter().map(|l| l.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn clusters_dedupe_by_name_keeping_first() {
        let mut second = cluster("in.80");
        second.connect_timeout_ms = 9999;
        let normalized = normalize_clusters(vec![cluster("out.hello"), cluster("in.80"), second]);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].name, "in.80");
        assert_eq!(normalized[0].connect_timeout_ms, 1000);
    }

    #[test]
    fn catch_all_detection() {
        let route = HttpRoute { prefix: Some("/".to_owned()), ..HttpRoute::default() };
        assert!(route.catch_all());

        let with_header = HttpRoute {
            prefix: Some("/".to_owned()),
            headers: vec![Header { name: "version".to_owned(), value: "v1".to_owned(), regex: false }],
            ..HttpRoute::default()
        };
        assert!(!with_header.catch_all());

        // a condition-less weighted split matches everything but must not
        // swallow the default route
        let weighted = HttpRoute {
            prefix: Some("/".to_owned()),
            weighted_clusters: Some(WeightedClusters {
                clusters: vec![
                    WeightedClusterEntry { name: "out.hello|http|version=v1".to_owned(), weight: 75 },
                    WeightedClusterEntry { name: "out.hello|http|version=v2".to_owned(), weight: 25 },
                ],
            }),
            ..HttpRoute::default()
        };
        assert!(!weighted.catch_all());
    }

    #[test]
    fn zero_value_fields_are_omitted() {
        let route = HttpRoute {
            prefix: Some("/".to_owned()),
            cluster: Some("out.hello".to_owned()),
            ..HttpRoute::default()
        };
        let json = serde_json::to_value(&route).unwrap();
        assert_eq!(json, serde_json::json!({"prefix": "/", "cluster": "out.hello"}));
    }

    #[test]
    fn combine_path_prefix_narrows_default_routes() {
        let route = HttpRoute { prefix: Some("/".to_owned()), ..HttpRoute::default() };
        let combined = route.combine_path_prefix(None, Some("/status")).unwrap();
        assert_eq!(combined.prefix.as_deref(), Some("/status"));

        let incompatible = HttpRoute { path: Some("/fixed".to_owned()), ..HttpRoute::default() };
        assert!(incompatible.combine_path_prefix(Some("/other"), None).is_none());
    }
}
