//! HTTP and TCP route construction. Routes are built per destination from
//! the applicable rules; the clusters each route references ride along on the
//! route value until the cluster pass collects them.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::{
    clusters::{attach_external_ssl_context, build_original_dst_cluster, build_outbound_cluster},
    resources::{
        AbortFilter, AppendedHeader, Cluster, CorsPolicySpec, DelayFilter, FaultFilterConfig, Header, HttpFilter,
        HttpRoute, HttpRouteConfigs, RetryPolicy, ShadowCluster, TcpRoute, VirtualHost, WeightedClusterEntry,
        WeightedClusters,
    },
};
use crate::{
    model::{
        rules::{HttpFaultInjection, MatchCondition, RouteRule, StringMatch},
        MeshConfig, Node, NodeType, Port, Protocol, Service, ServiceInstance,
    },
    registry::config::ConfigStoreView,
    rules,
};

/// Pseudo-header names accepted in rule matches, translated to the proxy's
/// header notation.
fn translate_header_name(name: &str) -> String {
    match name {
        "scheme" => ":scheme".to_owned(),
        "method" => ":method".to_owned(),
        "authority" => ":authority".to_owned(),
        other => other.to_owned(),
    }
}

fn quote_regex_meta(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn build_header(name: String, matcher: &StringMatch) -> Header {
    match matcher {
        StringMatch::Exact(value) => Header { name, value: value.clone(), regex: false },
        StringMatch::Prefix(value) => Header {
            name,
            value: format!("^{}.*", quote_regex_meta(value)),
            regex: true,
        },
        StringMatch::Regex(value) => Header { name, value: value.clone(), regex: true },
    }
}

/// Translates request match conditions into a route skeleton. Without a URI
/// condition the route matches every path.
fn build_route_match(condition: Option<&MatchCondition>) -> HttpRoute {
    let mut path = None;
    let mut prefix = Some("/".to_owned());
    let mut headers = Vec::new();

    if let Some(condition) = condition {
        for (name, matcher) in &condition.headers {
            if name == "uri" {
                match matcher {
                    StringMatch::Exact(value) => {
                        path = Some(value.clone());
                        prefix = None;
                    },
                    StringMatch::Prefix(value) => {
                        path = None;
                        prefix = Some(value.clone());
                    },
                    StringMatch::Regex(value) => {
                        headers.push(Header { name: ":path".to_owned(), value: value.clone(), regex: true });
                    },
                }
            } else {
                headers.push(build_header(translate_header_name(name), matcher));
            }
        }
        headers.sort();
    }

    HttpRoute { path, prefix, headers, ..HttpRoute::default() }
}

/// The lowest-priority route for a destination, forwarding everything to the
/// baseline cluster.
pub fn build_default_route(cluster: Cluster) -> HttpRoute {
    HttpRoute {
        prefix: Some("/".to_owned()),
        cluster: Some(cluster.name.clone()),
        clusters: vec![cluster],
        ..HttpRoute::default()
    }
}

pub fn build_fault_filter(cluster_name: &str, fault: &HttpFaultInjection, headers: &[Header]) -> HttpFilter {
    HttpFilter::fault(FaultFilterConfig {
        abort: fault
            .abort
            .as_ref()
            .map(|abort| AbortFilter { abort_percent: abort.percent, http_status: abort.http_status }),
        delay: fault.delay.as_ref().map(|delay| DelayFilter {
            delay_type: "fixed".to_owned(),
            fixed_delay_percent: delay.percent,
            fixed_duration_ms: delay.fixed_delay_ms,
        }),
        headers: headers.to_vec(),
        upstream_cluster: cluster_name.to_owned(),
    })
}

/// Per-route switches read by the mixer filter.
pub fn build_mixer_opaque_config(check: bool, forward: bool) -> BTreeMap<String, String> {
    let on_off = |flag: bool| if flag { "on".to_owned() } else { "off".to_owned() };
    BTreeMap::from([
        ("mixer_control".to_owned(), on_off(check)),
        ("mixer_forward".to_owned(), on_off(forward)),
    ])
}

/// Translates one route rule into a proxy route for `(service, port)`.
pub fn build_http_route(rule: &RouteRule, service: &Service, port: &Port) -> HttpRoute {
    let mut route = build_route_match(rule.r#match.as_ref());

    if let Some(redirect) = &rule.redirect {
        route.host_redirect = redirect.authority.clone();
        route.path_redirect = redirect.uri.clone();
        // redirected requests never reach an upstream
        return route;
    }

    if rule.route.is_empty() {
        let cluster = build_outbound_cluster(service, port, None);
        route.cluster = Some(cluster.name.clone());
        route.clusters.push(cluster);
    } else {
        let mut entries = Vec::with_capacity(rule.route.len());
        for weight in &rule.route {
            let labels = (!weight.labels.is_empty()).then_some(&weight.labels);
            let cluster = build_outbound_cluster(service, port, labels);
            entries.push(WeightedClusterEntry { name: cluster.name.clone(), weight: weight.weight });
            route.clusters.push(cluster);
        }
        if let [only] = entries.as_slice() {
            route.cluster = Some(only.name.clone());
        } else {
            route.weighted_clusters = Some(WeightedClusters { clusters: entries });
        }
    }

    if let Some(rewrite) = &rule.rewrite {
        route.prefix_rewrite = rewrite.uri.clone();
        route.host_rewrite = rewrite.authority.clone();
    }

    if let Some(timeout) = &rule.http_req_timeout {
        route.timeout_ms = Some(timeout.timeout_ms);
    }

    if let Some(retries) = &rule.http_req_retries {
        route.retry_policy = Some(RetryPolicy {
            retry_on: "5xx,connect-failure,refused-stream".to_owned(),
            num_retries: retries.attempts,
        });
    }

    if let Some(mirror) = &rule.mirror {
        let target = Service { hostname: mirror.destination.clone(), ..Service::default() };
        let labels = (!mirror.labels.is_empty()).then_some(&mirror.labels);
        let cluster = build_outbound_cluster(&target, port, labels);
        route.shadow = Some(ShadowCluster { cluster: cluster.name.clone() });
        route.clusters.push(cluster);
    }

    if let Some(cors) = &rule.cors_policy {
        route.cors = Some(CorsPolicySpec {
            enabled: true,
            allow_origin: cors.allow_origin.clone(),
            allow_methods: cors.allow_methods.join(","),
            allow_headers: cors.allow_headers.join(","),
            expose_headers: cors.expose_headers.join(","),
            max_age: cors.max_age_seconds.map(|age| age.to_string()).unwrap_or_default(),
            allow_credentials: cors.allow_credentials.unwrap_or_default(),
        });
    }

    route.request_headers_to_add = rule
        .append_headers
        .iter()
        .map(|(key, value)| AppendedHeader { key: key.clone(), value: value.clone() })
        .collect();

    route.use_websocket = rule.websocket_upgrade;

    if let Some(fault) = &rule.http_fault {
        route.faults = route
            .clusters
            .iter()
            .map(|cluster| build_fault_filter(&cluster.name, fault, &route.headers))
            .collect();
    }

    route
}

/// Inbound counterpart of [`build_http_route`]: the destination cluster is
/// the co-located endpoint, so only the match and websocket flag carry over.
pub fn build_inbound_route(rule: &RouteRule, cluster: Cluster) -> HttpRoute {
    let mut route = build_route_match(rule.r#match.as_ref());
    route.cluster = Some(cluster.name.clone());
    route.clusters = vec![cluster];
    route.use_websocket = rule.websocket_upgrade;

    if let Some(uri) = rule.rewrite.as_ref().and_then(|rewrite| rewrite.uri.as_ref()) {
        // sending proxies rewrite before forwarding, so the inbound match
        // must use the rewritten prefix
        route.prefix = Some(uri.clone());
        route.path = None;
    }

    route
}

/// Routes for one HTTP destination port, in rule order with the synthetic
/// default route last. A user-supplied catch-all terminates the list.
pub fn build_destination_http_routes(
    service: &Service,
    port: &Port,
    instances: &[ServiceInstance],
    config: &dyn ConfigStoreView,
) -> Vec<HttpRoute> {
    match port.protocol {
        Protocol::Http | Protocol::Http2 | Protocol::Grpc => {
            let mut routes = Vec::new();
            let mut use_default_route = true;
            for rule in config.route_rules(instances, &service.hostname) {
                let route = build_http_route(&rule, service, port);
                // only a rule with no match conditions and no explicit
                // destination split stands in for the default route
                let is_catch_all = route.catch_all() && rule.route.is_empty();
                routes.push(route);
                if is_catch_all {
                    // rules below a catch-all are unreachable, as is the
                    // synthetic default route
                    use_default_route = false;
                    break;
                }
            }
            if use_default_route {
                routes.push(build_default_route(build_outbound_cluster(service, port, None)));
            }
            routes
        },
        // external HTTPS destinations are reached in plain HTTP with TLS
        // originated by the proxy
        Protocol::Https if service.external() => {
            vec![build_default_route(build_outbound_cluster(service, port, None))]
        },
        Protocol::Https | Protocol::Tcp | Protocol::Mongo | Protocol::Redis | Protocol::Udp => vec![],
    }
}

fn shared_suffix<'a>(first: &[&'a str], second: &[&'a str]) -> Vec<&'a str> {
    let mut shared = Vec::new();
    let mut depth = 1;
    while depth <= first.len() && depth <= second.len() && first[first.len() - depth] == second[second.len() - depth]
    {
        shared.push(first[first.len() - depth]);
        depth += 1;
    }
    shared.reverse();
    shared
}

/// Names the virtual host after the service key and derives its domain set:
/// every shortening of the hostname permitted by the proxy's domain suffix,
/// plus the service VIP, each in bare and `:port` form.
pub fn build_virtual_host(service: &Service, port: &Port, domain_suffix: &[&str], routes: Vec<HttpRoute>) -> VirtualHost {
    let parts = service.hostname.split('.').collect::<Vec<_>>();
    let shared = shared_suffix(domain_suffix, &parts);

    let mut hosts = Vec::new();
    let mut host = parts[..parts.len() - shared.len()].join(".");
    if !host.is_empty() {
        hosts.push(host.clone());
    }
    for part in &shared {
        if !host.is_empty() {
            host.push('.');
        }
        host.push_str(part);
        hosts.push(host.clone());
    }
    if let Some(address) = service.address.as_deref().filter(|a| !a.is_empty()) {
        hosts.push(address.to_owned());
    }

    let mut domains = Vec::with_capacity(2 * hosts.len());
    for host in &hosts {
        domains.push(format!("{host}:{}", port.port));
        // the listener port equals the service port, so the port suffix is
        // optional and inferred
        domains.push(host.clone());
    }

    VirtualHost { name: service.key(port, None), domains, routes }
}

/// HTTP route tables for traffic leaving the proxy, one per service port.
/// Port uniqueness across services guarantees the virtual hosts on a shared
/// table never overlap in domains.
pub fn build_outbound_http_routes(
    node: &Node,
    instances: &[ServiceInstance],
    services: &[Service],
    config: &dyn ConfigStoreView,
) -> HttpRouteConfigs {
    let mut configs = HttpRouteConfigs::default();
    let suffix = node.domain_parts();

    let mut services = services.to_vec();
    services.sort_by(|a, b| a.hostname.cmp(&b.hostname));

    for service in &services {
        for port in &service.ports {
            let routes = build_destination_http_routes(service, port, instances, config);
            if routes.is_empty() {
                continue;
            }
            let host = build_virtual_host(service, port, &suffix, routes);
            configs.ensure_port(port.port).virtual_hosts.push(host);
        }
    }

    configs.normalize();
    configs
}

fn append_port_to_domains(domains: &[String], port: u16) -> Vec<String> {
    let mut out = domains.to_vec();
    out.extend(domains.iter().map(|domain| format!("{domain}:{port}")));
    out
}

/// Virtual host for a single egress rule destination. Every route forwards
/// to one original-destination cluster so resilience policies can attach to
/// the external service.
fn build_egress_virtual_host(
    destination: &str,
    mesh: &MeshConfig,
    port: &Port,
    instances: &[ServiceInstance],
    config: &dyn ConfigStoreView,
) -> VirtualHost {
    let mut protocol = port.protocol;
    if protocol == Protocol::Grpc {
        protocol = Protocol::Http2;
    }

    let external_service = Service { hostname: destination.to_owned(), ..Service::default() };
    let key = external_service.key(port, None);

    let mut cluster = build_original_dst_cluster(&key, mesh.connect_timeout_ms);
    cluster.service_name = Some(key);
    cluster.meta.hostname = destination.to_owned();
    cluster.meta.port = Some(port.clone());
    if protocol == Protocol::Https {
        attach_external_ssl_context(&mut cluster);
    }
    if protocol == Protocol::Http2 {
        cluster.features = Some("http2".to_owned());
    }

    // route as plain HTTP; for HTTPS destinations the proxy originates TLS
    let route_port = if protocol == Protocol::Https { Port { protocol: Protocol::Http, ..port.clone() } } else { port.clone() };
    let mut routes = build_destination_http_routes(&external_service, &route_port, instances, config);

    // externally-defined services have no workload labels, so every route
    // collapses onto the single original-destination cluster
    for route in &mut routes {
        route.cluster = Some(cluster.name.clone());
        route.weighted_clusters = None;
        route.clusters = vec![cluster.clone()];
    }

    VirtualHost {
        name: format!("{destination}:{}", port.port),
        domains: append_port_to_domains(&[destination.to_owned()], port.port),
        routes,
    }
}

/// Adds HTTP-family egress rule destinations to the outbound route tables.
/// Routers do not participate in egress.
pub fn build_egress_http_routes(
    mesh: &MeshConfig,
    node: &Node,
    instances: &[ServiceInstance],
    config: &dyn ConfigStoreView,
    configs: &mut HttpRouteConfigs,
) {
    if node.node_type == NodeType::Router {
        return;
    }

    for rule in rules::reject_conflicting_egress_rules(config.egress_rules()) {
        for egress_port in &rule.ports {
            let protocol = match Protocol::try_from(egress_port.protocol.as_str()) {
                Ok(protocol) => protocol,
                Err(error) => {
                    warn!(rule = %rule.name, %error, "skipping egress port");
                    continue;
                },
            };
            if !protocol.is_http_like() && protocol != Protocol::Https {
                continue;
            }
            let port = Port::new(
                &format!("external-{protocol}-{}", egress_port.port),
                egress_port.port,
                protocol,
            );
            let host = build_egress_virtual_host(&rule.destination, mesh, &port, instances, config);
            configs.ensure_port(port.port).virtual_hosts.push(host);
        }
    }

    configs.normalize();
}

/// TCP route forwarding matched destinations to `cluster`. Addresses become
/// single-host CIDR blocks.
pub fn build_tcp_route(cluster: &Cluster, destination_addrs: &[String]) -> TcpRoute {
    TcpRoute {
        cluster: cluster.name.clone(),
        destination_ip_list: destination_addrs.iter().map(|addr| format!("{addr}/32")).collect(),
        source_ip_list: vec![],
        cluster_ref: Some(cluster.clone()),
    }
}

/// Outbound routes for the explicit HTTP proxy port and for RDS requests:
/// outbound services plus egress destinations.
pub fn build_outbound_and_egress_routes(
    mesh: &MeshConfig,
    node: &Node,
    instances: &[ServiceInstance],
    services: &[Service],
    config: &dyn ConfigStoreView,
) -> HttpRouteConfigs {
    let mut configs = build_outbound_http_routes(node, instances, services, config);
    build_egress_http_routes(mesh, node, instances, config, &mut configs);
    debug!(ports = configs.0.len(), "built outbound route tables");
    configs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::rules::{DestinationWeight, HttpRedirect},
        model::Labels,
        registry::config::MemoryConfigStore,
    };

    fn hello_service() -> Service {
        Service {
            hostname: "hello.default.svc.cluster.local".to_owned(),
            address: Some("10.1.0.0".to_owned()),
            ports: vec![Port::new("http", 80, Protocol::Http)],
            ..Service::default()
        }
    }

    fn sidecar_node() -> Node {
        Node {
            node_type: NodeType::Sidecar,
            ip_address: "10.1.1.0".to_owned(),
            id: "v0.default".to_owned(),
            domain: "default.svc.cluster.local".to_owned(),
        }
    }

    #[test]
    fn virtual_host_domains_shorten_against_proxy_domain() {
        let service = hello_service();
        let node = sidecar_node();
        let host = build_virtual_host(&service, &service.ports[0], &node.domain_parts(), vec![]);

        assert_eq!(host.name, "hello.default.svc.cluster.local|http");
        assert_eq!(
            host.domains,
            vec![
                "hello:80",
                "hello",
                "hello.default:80",
                "hello.default",
                "hello.default.svc:80",
                "hello.default.svc",
                "hello.default.svc.cluster:80",
                "hello.default.svc.cluster",
                "hello.default.svc.cluster.local:80",
                "hello.default.svc.cluster.local",
                "10.1.0.0:80",
                "10.1.0.0",
            ]
        );
    }

    #[test]
    fn weighted_rule_produces_weighted_clusters_and_default_route() {
        let store = MemoryConfigStore::new();
        store.add_route_rule(RouteRule {
            name: "weighted".to_owned(),
            destination: "hello.default.svc.cluster.local".to_owned(),
            precedence: 1,
            route: vec![
                DestinationWeight { labels: Labels::from([("version", "v1")]), weight: 75 },
                DestinationWeight { labels: Labels::from([("version", "v2")]), weight: 25 },
            ],
            ..RouteRule::default()
        });

        let service = hello_service();
        let routes = build_destination_http_routes(&service, &service.ports[0], &[], &store);
        assert_eq!(routes.len(), 2);

        let weighted = routes[0].weighted_clusters.as_ref().expect("weighted clusters");
        assert_eq!(weighted.clusters.iter().map(|c| c.weight).sum::<u32>(), 100);
        assert_eq!(weighted.clusters[0].name, "out.hello.default.svc.cluster.local|http|version=v1");
        assert_eq!(routes[0].clusters.len(), 2);

        assert!(routes[1].catch_all());
        assert_eq!(routes[1].cluster.as_deref(), Some("out.hello.default.svc.cluster.local|http"));
    }

    #[test]
    fn catch_all_rule_suppresses_default_route() {
        let store = MemoryConfigStore::new();
        store.add_route_rule(RouteRule {
            name: "timeout-everything".to_owned(),
            destination: "hello.default.svc.cluster.local".to_owned(),
            http_req_timeout: Some(crate::model::rules::HttpTimeout { timeout_ms: 2000 }),
            ..RouteRule::default()
        });
        store.add_route_rule(RouteRule {
            name: "unreachable".to_owned(),
            destination: "hello.default.svc.cluster.local".to_owned(),
            precedence: -1,
            ..RouteRule::default()
        });

        let service = hello_service();
        let routes = build_destination_http_routes(&service, &service.ports[0], &[], &store);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].timeout_ms, Some(2000));
        assert!(routes[0].catch_all());
    }

    #[test]
    fn redirect_rule_carries_no_cluster() {
        let rule = RouteRule {
            name: "redirect".to_owned(),
            destination: "hello.default.svc.cluster.local".to_owned(),
            redirect: Some(HttpRedirect {
                uri: Some("/v1/bye".to_owned()),
                authority: Some("bye.default.svc.cluster.local".to_owned()),
            }),
            ..RouteRule::default()
        };
        let service = hello_service();
        let route = build_http_route(&rule, &service, &service.ports[0]);
        assert_eq!(route.path_redirect.as_deref(), Some("/v1/bye"));
        assert_eq!(route.host_redirect.as_deref(), Some("bye.default.svc.cluster.local"));
        assert!(route.cluster.is_none());
        assert!(route.clusters.is_empty());
    }

    #[test]
    fn match_translation_handles_pseudo_headers() {
        let condition: MatchCondition = serde_yaml::from_str(
            r"
headers:
  uri:
    prefix: /api
  authority:
    exact: hello
  cookie:
    prefix: user=jason
",
        )
        .unwrap();
        let route = build_route_match(Some(&condition));
        assert_eq!(route.prefix.as_deref(), Some("/api"));
        assert!(route.path.is_none());
        assert_eq!(
            route.headers,
            vec![
                Header { name: ":authority".to_owned(), value: "hello".to_owned(), regex: false },
                Header { name: "cookie".to_owned(), value: "^user=jason.*".to_owned(), regex: true },
            ]
        );
    }

    #[test]
    fn fault_filters_are_emitted_per_cluster() {
        let rule: RouteRule = serde_yaml::from_str(
            r"
name: fault
destination: hello.default.svc.cluster.local
route:
  - labels: {version: v1}
    weight: 50
  - labels: {version: v2}
    weight: 50
http_fault:
  abort:
    percent: 10
    http_status: 503
",
        )
        .unwrap();
        let service = hello_service();
        let route = build_http_route(&rule, &service, &service.ports[0]);
        assert_eq!(route.faults.len(), 2);
    }

    #[test]
    fn egress_https_destination_gets_external_ssl_context() {
        let store = MemoryConfigStore::new();
        let mesh = MeshConfig::default();
        let port = Port::new("external-HTTPS-443", 443, Protocol::Https);
        let host = build_egress_virtual_host("secure.example.com", &mesh, &port, &[], &store);

        assert_eq!(host.name, "secure.example.com:443");
        assert_eq!(host.domains, vec!["secure.example.com", "secure.example.com:443"]);
        assert_eq!(host.routes.len(), 1);
        let cluster = &host.routes[0].clusters[0];
        assert!(matches!(
            cluster.ssl_context,
            Some(crate::envoy::resources::UpstreamSslContext::External(_))
        ));
    }

    #[test]
    fn conflicting_egress_rules_yield_single_virtual_host() {
        let store = MemoryConfigStore::new();
        for name in ["first", "second"] {
            store.add_egress_rule(crate::model::rules::EgressRule {
                name: name.to_owned(),
                destination: "*.example.com".to_owned(),
                ports: vec![crate::model::rules::EgressPort { port: 80, protocol: "http".to_owned() }],
            });
        }
        let mesh = MeshConfig::default();
        let node = sidecar_node();
        let mut configs = HttpRouteConfigs::default();
        build_egress_http_routes(&mesh, &node, &[], &store, &mut configs);
        assert_eq!(configs.0[&80].virtual_hosts.len(), 1);
    }
}
