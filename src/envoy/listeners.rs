//! Listener assembly per proxy role: sidecar capture, ingress termination,
//! router passthrough and the explicit HTTP proxy mode.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};
use typed_builder::TypedBuilder;

use super::{
    clusters::{
        build_inbound_cluster, build_listener_ssl_context, build_original_dst_cluster, build_outbound_cluster,
        ORIGINAL_DST_TCP_CLUSTER,
    },
    resources::{
        normalize_clusters, normalize_listeners, AccessLog, Cluster, HttpConnectionManagerConfig, HttpFilter,
        HttpRouteConfig, Listener, MixerFilterConfig, NetworkFilter, Rds, TcpRouteConfig, TraceConfig, VirtualHost,
    },
    routes::{
        build_default_route, build_egress_http_routes, build_inbound_route, build_mixer_opaque_config,
        build_outbound_http_routes, build_tcp_route,
    },
    tcp_address, EGRESS_TRACE_OPERATION, INGRESS_TRACE_OPERATION, LOCALHOST_ADDRESS, RDS_ALL, RDS_NAME,
    VIRTUAL_LISTENER_NAME, WILDCARD_ADDRESS,
};
use crate::{
    model::{
        rules::EgressRule, AuthenticationPolicy, ConsolidatedAuthPolicy, MeshConfig, Node, NodeType, Port, Protocol,
        Service, ServiceInstance,
    },
    registry::config::ConfigStoreView,
    rules,
};

/// Mixer filter for HTTP listeners, identifying this proxy as the source and
/// its primary workload as the target.
pub fn build_mixer_http_filter(mesh: &MeshConfig, node: &Node, instances: &[ServiceInstance]) -> HttpFilter {
    let mut mixer_attributes = BTreeMap::from([
        ("target.ip".to_owned(), node.ip_address.clone()),
        ("target.uid".to_owned(), node.id.clone()),
    ]);
    if let Some(hostname) = instances.iter().map(|instance| instance.service.hostname.as_str()).min() {
        mixer_attributes.insert("target.service".to_owned(), hostname.to_owned());
    }
    HttpFilter::mixer(MixerFilterConfig {
        mixer_server: mesh.mixer_address.clone(),
        mixer_attributes,
        forward_attributes: BTreeMap::from([
            ("source.ip".to_owned(), node.ip_address.clone()),
            ("source.uid".to_owned(), node.id.clone()),
        ]),
        disable_check_calls: mesh.disable_policy_checks,
    })
}

fn build_mixer_tcp_filter(mesh: &MeshConfig, node: &Node, instance: &ServiceInstance) -> NetworkFilter {
    NetworkFilter::mixer_tcp(MixerFilterConfig {
        mixer_server: mesh.mixer_address.clone(),
        mixer_attributes: BTreeMap::from([
            ("target.ip".to_owned(), instance.endpoint.address.clone()),
            ("target.uid".to_owned(), node.id.clone()),
            ("target.service".to_owned(), instance.service.hostname.clone()),
        ]),
        forward_attributes: BTreeMap::new(),
        disable_check_calls: mesh.disable_policy_checks,
    })
}

#[derive(TypedBuilder)]
pub struct HttpListenerParams<'a> {
    pub mesh: &'a MeshConfig,
    pub node: &'a Node,
    pub instances: &'a [ServiceInstance],
    /// Inline route table. With `rds_route_name` set it only contributes
    /// fault filters; the proxy fetches routes over RDS.
    #[builder(default)]
    pub route_config: Option<HttpRouteConfig>,
    pub ip: &'a str,
    pub port: u16,
    #[builder(default)]
    pub rds_route_name: Option<String>,
    #[builder(default = false)]
    pub use_remote_address: bool,
    pub trace_operation: &'a str,
}

/// HTTP connection manager listener. Filter order is load-bearing: CORS must
/// run ahead of the mixer so preflight requests short-circuit, and the router
/// is always last.
pub fn build_http_listener(params: HttpListenerParams<'_>) -> Listener {
    let mesh = params.mesh;

    let mut filters = vec![HttpFilter::cors()];
    if !mesh.mixer_address.is_empty() {
        filters.push(build_mixer_http_filter(mesh, params.node, params.instances));
    }
    if let Some(route_config) = &params.route_config {
        filters.extend(route_config.faults());
    }
    filters.push(HttpFilter::router());

    let (rds, route_config) = match params.rds_route_name {
        Some(route_config_name) => (
            Some(Rds {
                cluster: RDS_NAME.to_owned(),
                route_config_name,
                refresh_delay_ms: mesh.rds_refresh_delay_ms,
            }),
            None,
        ),
        None => (None, params.route_config),
    };

    let config = HttpConnectionManagerConfig {
        codec_type: "auto".to_owned(),
        stat_prefix: "http".to_owned(),
        generate_request_id: mesh.enable_tracing,
        use_remote_address: params.use_remote_address,
        tracing: mesh
            .enable_tracing
            .then(|| TraceConfig { operation_name: params.trace_operation.to_owned() }),
        rds,
        route_config,
        filters,
        access_log: if mesh.access_log_file.is_empty() {
            vec![]
        } else {
            vec![AccessLog { path: mesh.access_log_file.clone() }]
        },
    };

    Listener {
        name: format!("http_{}_{}", params.ip, params.port),
        address: tcp_address(params.ip, params.port),
        bind_to_port: true,
        use_original_dst: false,
        ssl_context: None,
        filters: vec![NetworkFilter::http_connection_manager(config)],
    }
}

/// TCP proxy listener, specialised for protocol-aware filters: Mongo gets a
/// parser stacked ahead of the TCP proxy; Redis replaces the TCP proxy
/// entirely but only speaks to a single cluster, so multi-route tables fall
/// back to plain TCP proxying.
pub fn build_tcp_listener(route_config: TcpRouteConfig, ip: &str, port: u16, protocol: Protocol) -> Listener {
    let (name_prefix, filters) = match protocol {
        Protocol::Mongo => (
            "mongo",
            vec![NetworkFilter::mongo_proxy(), NetworkFilter::tcp_proxy(route_config)],
        ),
        Protocol::Redis if route_config.routes.len() == 1 => {
            let cluster = route_config.routes[0].cluster.clone();
            ("redis", vec![NetworkFilter::redis_proxy(cluster)])
        },
        _ => ("tcp", vec![NetworkFilter::tcp_proxy(route_config)]),
    };
    Listener {
        name: format!("{name_prefix}_{ip}_{port}"),
        address: tcp_address(ip, port),
        bind_to_port: true,
        use_original_dst: false,
        ssl_context: None,
        filters,
    }
}

/// Attaches the server TLS context when the consolidated policy requires
/// mutual TLS. Management and passthrough listeners are never eligible.
pub fn may_apply_inbound_auth(listener: &mut Listener, mesh: &MeshConfig, service_policy: AuthenticationPolicy) {
    if mesh.auth_policy.consolidate(service_policy) == ConsolidatedAuthPolicy::MutualTls {
        listener.ssl_context = Some(build_listener_ssl_context());
    }
}

/// Listeners and statically-declared clusters for co-located service
/// instances. Inbound traffic is redirected to the endpoint address, so one
/// listener is emitted per unique endpoint `(address, port)`.
pub fn build_inbound_listeners(
    mesh: &MeshConfig,
    node: &Node,
    instances: &[ServiceInstance],
    config: &dyn ConfigStoreView,
) -> (Vec<Listener>, Vec<Cluster>) {
    let mut listeners = Vec::with_capacity(instances.len());
    let mut clusters = Vec::with_capacity(instances.len());
    let mut seen_endpoints = HashSet::new();

    for instance in instances {
        let endpoint = &instance.endpoint;
        let protocol = endpoint.service_port.protocol;

        if !seen_endpoints.insert((endpoint.address.clone(), endpoint.port)) {
            // whether such duplicates should share a listener is undecided;
            // surface them and keep the first
            warn!(
                address = %endpoint.address,
                port = endpoint.port,
                service = %instance.service.hostname,
                "duplicate inbound endpoint, keeping the first listener"
            );
            continue;
        }

        let cluster = build_inbound_cluster(endpoint.port, protocol, mesh.connect_timeout_ms);
        clusters.push(cluster.clone());

        let mut listener = if protocol.is_http_like() {
            let mut default_route = build_default_route(cluster.clone());
            if !mesh.mixer_address.is_empty() {
                default_route.opaque_config = build_mixer_opaque_config(!mesh.disable_policy_checks, false);
            }

            let mut host = VirtualHost {
                name: format!("inbound|{}", endpoint.port),
                domains: vec!["*".to_owned()],
                routes: vec![],
            };

            if protocol == Protocol::Http {
                for rule in config.route_rules_by_destination(std::slice::from_ref(instance)) {
                    let mut route = build_inbound_route(&rule, cluster.clone());
                    // websocket routes skip the HTTP filter chain, so the
                    // mixer switch on them would never be read; known gap
                    if !mesh.mixer_address.is_empty() && !route.use_websocket {
                        route.opaque_config = build_mixer_opaque_config(!mesh.disable_policy_checks, false);
                    }
                    host.routes.push(route);
                }
            }

            host.routes.push(default_route);

            build_http_listener(
                HttpListenerParams::builder()
                    .mesh(mesh)
                    .node(node)
                    .instances(instances)
                    .route_config(Some(HttpRouteConfig { virtual_hosts: vec![host] }))
                    .ip(&endpoint.address)
                    .port(endpoint.port)
                    .trace_operation(INGRESS_TRACE_OPERATION)
                    .build(),
            )
        } else if protocol.uses_tcp_path() {
            let route = build_tcp_route(&cluster, std::slice::from_ref(&endpoint.address));
            let mut listener =
                build_tcp_listener(TcpRouteConfig { routes: vec![route] }, &endpoint.address, endpoint.port, protocol);
            if !mesh.mixer_address.is_empty() {
                listener.filters.insert(0, build_mixer_tcp_filter(mesh, node, instance));
            }
            listener
        } else {
            debug!(%protocol, port = endpoint.port, "unsupported inbound protocol");
            continue;
        };

        may_apply_inbound_auth(&mut listener, mesh, endpoint.service_port.authentication_policy);
        listeners.push(listener);
    }

    (listeners, clusters)
}

/// TCP-family outbound listeners. Services without a virtual IP share one
/// wildcard listener per port routed to the original destination; routers use
/// wildcard listeners throughout.
pub fn build_outbound_tcp_listeners(mesh: &MeshConfig, node: &Node, services: &[Service]) -> (Vec<Listener>, Vec<Cluster>) {
    let mut listeners = Vec::new();
    let mut clusters = Vec::new();

    let mut shared_passthrough: Option<Cluster> = None;
    let mut wildcard_ports = HashSet::new();

    let mut services = services.to_vec();
    services.sort_by(|a, b| a.hostname.cmp(&b.hostname));

    for service in &services {
        if service.external() {
            continue;
        }
        for port in &service.ports {
            if !port.protocol.uses_tcp_path() {
                continue;
            }
            let has_vip = service.address.as_deref().is_some_and(|address| !address.is_empty());
            if service.load_balancing_disabled || !has_vip || node.node_type == NodeType::Router {
                if !wildcard_ports.insert(port.port) {
                    debug!(port = port.port, service = %service.hostname, "port already has a wildcard listener");
                    continue;
                }

                let cluster = if service.load_balancing_disabled && node.node_type != NodeType::Router {
                    shared_passthrough
                        .get_or_insert_with(|| {
                            let cluster = build_original_dst_cluster(ORIGINAL_DST_TCP_CLUSTER, mesh.connect_timeout_ms);
                            clusters.push(cluster.clone());
                            cluster
                        })
                        .clone()
                } else {
                    let cluster = build_outbound_cluster(service, port, None);
                    clusters.push(cluster.clone());
                    cluster
                };

                let route = build_tcp_route(&cluster, &[]);
                listeners.push(build_tcp_listener(
                    TcpRouteConfig { routes: vec![route] },
                    WILDCARD_ADDRESS,
                    port.port,
                    port.protocol,
                ));
            } else {
                let address = service.address.clone().unwrap_or_default();
                let cluster = build_outbound_cluster(service, port, None);
                let route = build_tcp_route(&cluster, std::slice::from_ref(&address));
                clusters.push(cluster);
                listeners.push(build_tcp_listener(
                    TcpRouteConfig { routes: vec![route] },
                    &address,
                    port.port,
                    port.protocol,
                ));
            }
        }
    }

    (listeners, clusters)
}

fn build_egress_tcp_route(rule: &EgressRule, mesh: &MeshConfig, port: &Port) -> (crate::envoy::resources::TcpRoute, Cluster) {
    let external_service = Service { hostname: rule.destination.clone(), ..Service::default() };
    let key = external_service.key(port, None);
    let mut cluster = build_original_dst_cluster(&key, mesh.connect_timeout_ms);
    cluster.service_name = Some(key);
    cluster.meta.hostname = rule.destination.clone();
    cluster.meta.port = Some(port.clone());
    let route = build_tcp_route(&cluster, std::slice::from_ref(&rule.destination));
    (route, cluster)
}

/// One wildcard listener per distinct port over all TCP egress rules, with a
/// passthrough cluster per rule so resilience policies can attach.
pub fn build_egress_tcp_listeners(
    mesh: &MeshConfig,
    node: &Node,
    config: &dyn ConfigStoreView,
) -> (Vec<Listener>, Vec<Cluster>) {
    let mut listeners = Vec::new();
    let mut clusters = Vec::new();

    if node.node_type == NodeType::Router {
        // egress semantics for standalone routers are unresolved
        return (listeners, clusters);
    }

    let mut rules_by_port: BTreeMap<u16, (Protocol, Vec<EgressRule>)> = BTreeMap::new();
    for rule in rules::reject_conflicting_egress_rules(config.egress_rules()) {
        for egress_port in &rule.ports {
            let Ok(protocol) = Protocol::try_from(egress_port.protocol.as_str()) else {
                warn!(rule = %rule.name, protocol = %egress_port.protocol, "skipping egress port");
                continue;
            };
            if !matches!(protocol, Protocol::Tcp | Protocol::Mongo | Protocol::Redis) {
                continue;
            }
            rules_by_port
                .entry(egress_port.port)
                .or_insert_with(|| (protocol, Vec::new()))
                .1
                .push(rule.clone());
        }
    }

    for (port_number, (protocol, rules)) in rules_by_port {
        let port = Port::new(&format!("external-{protocol}-{port_number}"), port_number, protocol);
        let mut routes = Vec::with_capacity(rules.len());
        for rule in &rules {
            let (route, cluster) = build_egress_tcp_route(rule, mesh, &port);
            routes.push(route);
            clusters.push(cluster);
        }
        listeners.push(build_tcp_listener(TcpRouteConfig { routes }, WILDCARD_ADDRESS, port_number, protocol));
    }

    (listeners, clusters)
}

/// Plain TCP listeners for workload health and management ports. They carry
/// no mixer filter and no inbound auth; a collision with a service listener
/// suppresses the management listener (handled by the caller).
pub fn build_mgmt_port_listeners(
    mesh: &MeshConfig,
    management_ports: &[Port],
    management_ip: &str,
) -> (Vec<Listener>, Vec<Cluster>) {
    let mut listeners = Vec::with_capacity(management_ports.len());
    let mut clusters = Vec::with_capacity(management_ports.len());

    for port in management_ports {
        if port.protocol == Protocol::Udp {
            warn!(port = port.port, protocol = %port.protocol, "unsupported management port protocol");
            continue;
        }
        let cluster = build_inbound_cluster(port.port, Protocol::Tcp, mesh.connect_timeout_ms);
        let route = build_tcp_route(&cluster, &[management_ip.to_owned()]);
        listeners.push(build_tcp_listener(
            TcpRouteConfig { routes: vec![route] },
            management_ip,
            port.port,
            Protocol::Tcp,
        ));
        clusters.push(cluster);
    }

    (listeners, clusters)
}

/// Outbound listeners: per-VIP and wildcard TCP listeners plus one
/// RDS-driven HTTP listener per outbound HTTP port. The inline route tables
/// only seed fault filters and the referenced clusters.
pub fn build_outbound_listeners(
    mesh: &MeshConfig,
    node: &Node,
    instances: &[ServiceInstance],
    services: &[Service],
    config: &dyn ConfigStoreView,
) -> (Vec<Listener>, Vec<Cluster>) {
    let (mut listeners, mut clusters) = build_outbound_tcp_listeners(mesh, node, services);

    let (egress_listeners, egress_clusters) = build_egress_tcp_listeners(mesh, node, config);
    listeners.extend(egress_listeners);
    clusters.extend(egress_clusters);

    let mut http_outbound = build_outbound_http_routes(node, instances, services, config);
    build_egress_http_routes(mesh, node, instances, config, &mut http_outbound);

    let (use_remote_address, trace_operation) = if node.node_type == NodeType::Router {
        (true, INGRESS_TRACE_OPERATION)
    } else {
        (false, EGRESS_TRACE_OPERATION)
    };

    for (port, route_config) in &http_outbound.0 {
        clusters.extend(route_config.clusters());
        listeners.push(build_http_listener(
            HttpListenerParams::builder()
                .mesh(mesh)
                .node(node)
                .instances(instances)
                .route_config(Some(route_config.clone()))
                .ip(WILDCARD_ADDRESS)
                .port(*port)
                .rds_route_name(Some(port.to_string()))
                .use_remote_address(use_remote_address)
                .trace_operation(trace_operation)
                .build(),
        ));
    }

    (listeners, clusters)
}

/// Full listener and cluster set for a sidecar or router proxy.
pub fn build_sidecar_listeners_clusters(
    mesh: &MeshConfig,
    instances: &[ServiceInstance],
    services: &[Service],
    management_ports: &[Port],
    node: &Node,
    config: &dyn ConfigStoreView,
) -> (Vec<Listener>, Vec<Cluster>) {
    let mut listeners = Vec::new();
    let mut clusters = Vec::new();

    if node.node_type == NodeType::Router {
        let (outbound, outbound_clusters) = build_outbound_listeners(mesh, node, instances, services, config);
        listeners.extend(outbound);
        clusters.extend(outbound_clusters);
    } else if mesh.proxy_listen_port > 0 {
        let (inbound, inbound_clusters) = build_inbound_listeners(mesh, node, instances, config);
        let (outbound, outbound_clusters) = build_outbound_listeners(mesh, node, instances, services, config);
        listeners.extend(inbound);
        listeners.extend(outbound);
        clusters.extend(inbound_clusters);
        clusters.extend(outbound_clusters);

        // a management listener colliding with a service listener would
        // shadow the workload's health port
        let (mgmt_listeners, mgmt_clusters) = build_mgmt_port_listeners(mesh, management_ports, &node.ip_address);
        for (listener, cluster) in mgmt_listeners.into_iter().zip(mgmt_clusters) {
            if let Some(existing) = listeners.iter().find(|l| l.address == listener.address) {
                warn!(
                    management = %listener.name,
                    address = %listener.address,
                    service_listener = %existing.name,
                    "omitting management listener due to address collision"
                );
                continue;
            }
            listeners.push(listener);
            clusters.push(cluster);
        }

        // every listener defers binding to the virtual listener receiving
        // the iptables redirect
        for listener in &mut listeners {
            listener.bind_to_port = false;
        }
        listeners.push(Listener {
            name: VIRTUAL_LISTENER_NAME.to_owned(),
            address: tcp_address(WILDCARD_ADDRESS, mesh.proxy_listen_port),
            bind_to_port: true,
            use_original_dst: true,
            ssl_context: None,
            filters: vec![],
        });
    }

    // explicit HTTP proxy port, served by the aggregate RDS route table
    if mesh.proxy_http_port > 0 {
        let (listen_address, use_remote_address, trace_operation) = if node.node_type == NodeType::Router {
            (WILDCARD_ADDRESS, true, INGRESS_TRACE_OPERATION)
        } else {
            (LOCALHOST_ADDRESS, false, EGRESS_TRACE_OPERATION)
        };

        let mut http_outbound = build_outbound_http_routes(node, instances, services, config);
        build_egress_http_routes(mesh, node, instances, config, &mut http_outbound);
        clusters.extend(http_outbound.clusters());
        listeners.push(build_http_listener(
            HttpListenerParams::builder()
                .mesh(mesh)
                .node(node)
                .instances(instances)
                .ip(listen_address)
                .port(mesh.proxy_http_port)
                .rds_route_name(Some(RDS_ALL.to_owned()))
                .use_remote_address(use_remote_address)
                .trace_operation(trace_operation)
                .build(),
        ));
    }

    (normalize_listeners(listeners), normalize_clusters(clusters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{Labels, NetworkEndpoint},
        registry::config::MemoryConfigStore,
    };

    fn service(hostname: &str, address: Option<&str>, ports: Vec<Port>) -> Service {
        Service {
            hostname: hostname.to_owned(),
            address: address.map(ToOwned::to_owned),
            ports,
            ..Service::default()
        }
    }

    fn full_port_set() -> Vec<Port> {
        vec![
            Port::new("http", 80, Protocol::Http),
            Port::new("http-status", 81, Protocol::Http),
            Port::new("custom", 90, Protocol::Tcp),
            Port::new("mongo", 100, Protocol::Mongo),
            Port::new("redis", 110, Protocol::Redis),
        ]
    }

    fn instance(service: &Service, port_name: &str, address: &str, version: &str) -> ServiceInstance {
        let service_port = service.get_port(port_name).expect("port exists").clone();
        let endpoint_port = if service_port.port == 80 { 80 } else { service_port.port + 1000 };
        ServiceInstance {
            endpoint: NetworkEndpoint {
                address: address.to_owned(),
                port: endpoint_port,
                service_port,
            },
            service: service.clone(),
            labels: Labels::from([("version", version)]),
        }
    }

    fn sidecar() -> Node {
        Node {
            node_type: NodeType::Sidecar,
            ip_address: "10.1.1.0".to_owned(),
            id: "v0.default".to_owned(),
            domain: "default.svc.cluster.local".to_owned(),
        }
    }

    fn fixture() -> (MeshConfig, Vec<Service>, Vec<ServiceInstance>, Node, MemoryConfigStore) {
        let hello = service("hello.default.svc.cluster.local", Some("10.1.0.0"), full_port_set());
        let world = service("world.default.svc.cluster.local", Some("10.2.0.0"), full_port_set());
        let instances = vec![
            instance(&hello, "http", "10.1.1.0", "v0"),
            instance(&hello, "custom", "10.1.1.0", "v0"),
        ];
        (MeshConfig::default(), vec![hello, world], instances, sidecar(), MemoryConfigStore::new())
    }

    #[test]
    fn sidecar_listener_set_has_virtual_catch_all() {
        let (mesh, services, instances, node, config) = fixture();
        let management = vec![Port::new("http", 3333, Protocol::Http), Port::new("custom", 9999, Protocol::Tcp)];
        let (listeners, clusters) =
            build_sidecar_listeners_clusters(&mesh, &instances, &services, &management, &node, &config);

        let virtual_listener = listeners.iter().find(|l| l.name == VIRTUAL_LISTENER_NAME).expect("virtual listener");
        assert!(virtual_listener.use_original_dst);
        assert!(virtual_listener.bind_to_port);
        assert_eq!(virtual_listener.address, "tcp://0.0.0.0:15001");

        for listener in listeners.iter().filter(|l| l.name != VIRTUAL_LISTENER_NAME) {
            assert!(!listener.bind_to_port, "{} must defer binding", listener.name);
        }

        // management ports bind on the node address
        assert!(listeners.iter().any(|l| l.address == "tcp://10.1.1.0:3333"));
        assert!(listeners.iter().any(|l| l.address == "tcp://10.1.1.0:9999"));

        // inbound endpoints
        assert!(listeners.iter().any(|l| l.address == "tcp://10.1.1.0:80"));
        assert!(listeners.iter().any(|l| l.address == "tcp://10.1.1.0:1090"));

        // listener addresses are unique and sorted
        let addresses = listeners.iter().map(|l| l.address.clone()).collect::<Vec<_>>();
        let mut deduped = addresses.clone();
        deduped.dedup();
        assert_eq!(addresses, deduped);

        assert!(clusters.iter().any(|c| c.name == "in.80"));
        assert!(clusters.iter().any(|c| c.name == "out.hello.default.svc.cluster.local|http"));
    }

    #[test]
    fn management_listener_collision_is_suppressed() {
        let (mesh, services, instances, node, config) = fixture();
        let management = vec![Port::new("health", 1090, Protocol::Tcp)];
        let (listeners, _) =
            build_sidecar_listeners_clusters(&mesh, &instances, &services, &management, &node, &config);

        let on_port = listeners.iter().filter(|l| l.address == "tcp://10.1.1.0:1090").collect::<Vec<_>>();
        assert_eq!(on_port.len(), 1);
        assert!(on_port[0].name.starts_with("tcp_"), "service listener wins over management listener");
    }

    #[test]
    fn headless_services_share_one_wildcard_listener_per_port() {
        let mesh = MeshConfig::default();
        let node = sidecar();
        let headless_a = Service {
            load_balancing_disabled: true,
            ..service("a.default.svc.cluster.local", None, vec![Port::new("tcp", 5000, Protocol::Tcp)])
        };
        let headless_b = Service {
            load_balancing_disabled: true,
            ..service("b.default.svc.cluster.local", None, vec![Port::new("tcp", 5000, Protocol::Tcp)])
        };

        let (listeners, clusters) = build_outbound_tcp_listeners(&mesh, &node, &[headless_a, headless_b]);
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].address, "tcp://0.0.0.0:5000");
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].name, ORIGINAL_DST_TCP_CLUSTER);
    }

    #[test]
    fn redis_listener_uses_redis_proxy_only_for_single_route() {
        let cluster = build_inbound_cluster(1110, Protocol::Tcp, 1000);
        let single = TcpRouteConfig { routes: vec![build_tcp_route(&cluster, &[])] };
        let listener = build_tcp_listener(single, "10.1.1.0", 1110, Protocol::Redis);
        assert_eq!(listener.filters.len(), 1);
        assert_eq!(listener.filters[0].name, "redis_proxy");

        let multi = TcpRouteConfig {
            routes: vec![build_tcp_route(&cluster, &[]), build_tcp_route(&cluster, &[])],
        };
        let listener = build_tcp_listener(multi, "10.1.1.0", 1110, Protocol::Redis);
        assert_eq!(listener.filters.len(), 1);
        assert_eq!(listener.filters[0].name, "tcp_proxy");
    }

    #[test]
    fn mongo_listener_stacks_parser_before_tcp_proxy() {
        let cluster = build_inbound_cluster(1100, Protocol::Mongo, 1000);
        let config = TcpRouteConfig { routes: vec![build_tcp_route(&cluster, &[])] };
        let listener = build_tcp_listener(config, "10.1.1.0", 1100, Protocol::Mongo);
        let names = listener.filters.iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["mongo_proxy", "tcp_proxy"]);
    }

    #[test]
    fn http_filter_chain_order_is_cors_mixer_fault_router() {
        let mut mesh = MeshConfig::default();
        mesh.mixer_address = "mixer:9091".to_owned();
        let node = sidecar();
        let fault_route = crate::envoy::resources::HttpRoute {
            prefix: Some("/".to_owned()),
            faults: vec![crate::envoy::routes::build_fault_filter(
                "out.hello",
                &crate::model::rules::HttpFaultInjection {
                    abort: Some(crate::model::rules::FaultAbort { percent: 5, http_status: 503 }),
                    delay: None,
                },
                &[],
            )],
            ..Default::default()
        };
        let route_config = HttpRouteConfig {
            virtual_hosts: vec![VirtualHost {
                name: "test".to_owned(),
                domains: vec!["*".to_owned()],
                routes: vec![fault_route],
            }],
        };
        let listener = build_http_listener(
            HttpListenerParams::builder()
                .mesh(&mesh)
                .node(&node)
                .instances(&[])
                .route_config(Some(route_config))
                .ip("0.0.0.0")
                .port(80)
                .trace_operation(EGRESS_TRACE_OPERATION)
                .build(),
        );

        let crate::envoy::resources::NetworkFilterSpec::HttpConnectionManager(config) = &listener.filters[0].config
        else {
            panic!("expected an http connection manager");
        };
        let names = config.filters.iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["cors", "mixer", "fault", "router"]);
    }

    #[test]
    fn outbound_http_listeners_reference_rds() {
        let (mesh, services, instances, node, config) = fixture();
        let (listeners, _) = build_outbound_listeners(&mesh, &node, &instances, &services, &config);

        let http_80 = listeners.iter().find(|l| l.address == "tcp://0.0.0.0:80").expect("port 80 listener");
        let crate::envoy::resources::NetworkFilterSpec::HttpConnectionManager(config) = &http_80.filters[0].config
        else {
            panic!("expected an http connection manager");
        };
        let rds = config.rds.as_ref().expect("rds reference");
        assert_eq!(rds.route_config_name, "80");
        assert_eq!(rds.cluster, RDS_NAME);
        assert!(config.route_config.is_none());
    }

    #[test]
    fn http_proxy_mode_emits_single_listener() {
        let (mut mesh, services, instances, node, config) = fixture();
        mesh.proxy_listen_port = 0;
        mesh.proxy_http_port = 15002;
        let (listeners, _) = build_sidecar_listeners_clusters(&mesh, &instances, &services, &[], &node, &config);

        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].address, "tcp://127.0.0.1:15002");
        let crate::envoy::resources::NetworkFilterSpec::HttpConnectionManager(manager) = &listeners[0].filters[0].config
        else {
            panic!("expected an http connection manager");
        };
        assert_eq!(manager.rds.as_ref().expect("rds").route_config_name, RDS_ALL);
    }

    #[test]
    fn router_emits_no_inbound_listeners() {
        let (mesh, services, instances, _, config) = fixture();
        let router = Node { node_type: NodeType::Router, ..sidecar() };
        let (listeners, _) = build_sidecar_listeners_clusters(&mesh, &instances, &services, &[], &router, &config);

        assert!(listeners.iter().all(|l| l.name != VIRTUAL_LISTENER_NAME));
        assert!(listeners.iter().all(|l| !l.address.starts_with("tcp://10.1.1.0:")));
        assert!(listeners.iter().all(|l| l.bind_to_port));
    }

    #[test]
    fn inbound_auth_follows_consolidated_policy() {
        let (mut mesh, _, instances, node, config) = fixture();
        mesh.auth_policy = crate::model::MeshAuthPolicy::MutualTls;
        let (listeners, _) = build_inbound_listeners(&mesh, &node, &instances, &config);
        assert!(!listeners.is_empty());
        assert!(listeners.iter().all(|l| l.ssl_context.is_some()));

        let mut disabled = instances.clone();
        for instance in &mut disabled {
            instance.endpoint.service_port.authentication_policy = AuthenticationPolicy::Disable;
        }
        let (listeners, _) = build_inbound_listeners(&mesh, &node, &disabled, &config);
        assert!(listeners.iter().all(|l| l.ssl_context.is_none()));
    }
}
