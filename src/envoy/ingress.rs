//! Route table and listeners for the ingress proxy, which terminates
//! external traffic on ports 80 and 443 and forwards it to mesh services.

use std::{cmp::Ordering, collections::BTreeMap};

use tracing::warn;

use super::{
    listeners::{build_http_listener, HttpListenerParams},
    resources::{
        normalize_listeners, HttpRoute, HttpRouteConfigs, Listener, ListenerSslContext, VirtualHost,
    },
    routes::{build_destination_http_routes, build_mixer_opaque_config},
    INGRESS_CERT_FILE, INGRESS_KEY_FILE, INGRESS_TRACE_OPERATION, WILDCARD_ADDRESS,
};
use crate::{
    model::{
        rules::{IngressRule, PortSelector, StringMatch},
        MeshConfig, Node, Port, Service, ServiceInstance,
    },
    registry::{config::ConfigStoreView, RegistryError, ServiceDiscovery},
};

/// Both ingress listeners use RDS so the route table can change without a
/// listener drain; the 443 listener terminates TLS with the mounted ingress
/// certificates.
pub fn build_ingress_listeners(mesh: &MeshConfig, node: &Node, instances: &[ServiceInstance]) -> Vec<Listener> {
    let mut listeners = Vec::with_capacity(2);
    for port in [80u16, 443] {
        let mut listener = build_http_listener(
            HttpListenerParams::builder()
                .mesh(mesh)
                .node(node)
                .instances(instances)
                .ip(WILDCARD_ADDRESS)
                .port(port)
                .rds_route_name(Some(port.to_string()))
                .use_remote_address(true)
                .trace_operation(INGRESS_TRACE_OPERATION)
                .build(),
        );
        if port == 443 {
            listener.ssl_context = Some(ListenerSslContext {
                cert_chain_file: INGRESS_CERT_FILE.to_owned(),
                private_key_file: INGRESS_KEY_FILE.to_owned(),
                ca_cert_file: String::new(),
                require_client_certificate: false,
            });
        }
        listeners.push(listener);
    }
    normalize_listeners(listeners)
}

fn resolve_backend_port<'a>(service: &'a Service, rule: &IngressRule) -> Option<&'a Port> {
    match &rule.port {
        Some(PortSelector::Name(name)) => service.get_port(name),
        Some(PortSelector::Number(number)) => service.get_port_by_number(*number),
        None => service.ports.iter().find(|port| port.protocol.is_http_like()),
    }
}

/// Exact paths beat prefixes; longer matches beat shorter ones.
fn compare_route_specificity(a: &HttpRoute, b: &HttpRoute) -> Ordering {
    match (&a.path, &b.path) {
        (Some(a_path), Some(b_path)) => b_path.len().cmp(&a_path.len()),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => {
            let a_prefix = a.prefix.as_deref().unwrap_or_default();
            let b_prefix = b.prefix.as_deref().unwrap_or_default();
            b_prefix.len().cmp(&a_prefix.len())
        },
    }
}

fn build_ingress_route(
    mesh: &MeshConfig,
    rule: &IngressRule,
    service: &Service,
    instances: &[ServiceInstance],
    config: &dyn ConfigStoreView,
) -> Vec<HttpRoute> {
    let Some(port) = resolve_backend_port(service, rule) else {
        warn!(rule = %rule.name, destination = %rule.destination, "no matching backend port");
        return vec![];
    };
    if !port.protocol.is_http_like() {
        warn!(rule = %rule.name, protocol = %port.protocol, "ingress requires an HTTP backend port");
        return vec![];
    }

    let (path, prefix) = match &rule.uri {
        Some(StringMatch::Exact(value)) => (Some(value.as_str()), None),
        Some(StringMatch::Prefix(value)) => (None, Some(value.as_str())),
        Some(StringMatch::Regex(_)) => {
            warn!(rule = %rule.name, "regex URI matches are not supported on ingress");
            return vec![];
        },
        None => (None, None),
    };

    build_destination_http_routes(service, port, instances, config)
        .into_iter()
        .filter_map(|mut route| {
            if !mesh.mixer_address.is_empty() {
                route.opaque_config = build_mixer_opaque_config(!mesh.disable_policy_checks, true);
            }
            route.combine_path_prefix(path, prefix)
        })
        .collect()
}

/// The ingress route table, shared between the plain and TLS listeners.
/// Rules are grouped into virtual hosts by their authority match; rules
/// without one fall into the wildcard host.
pub async fn build_ingress_routes(
    mesh: &MeshConfig,
    instances: &[ServiceInstance],
    discovery: &dyn ServiceDiscovery,
    config: &dyn ConfigStoreView,
) -> Result<HttpRouteConfigs, RegistryError> {
    let mut hosts: BTreeMap<String, Vec<HttpRoute>> = BTreeMap::new();

    for rule in config.ingress_rules() {
        let service = match discovery.get_service(&rule.destination).await? {
            Some(service) => service,
            None => {
                warn!(rule = %rule.name, destination = %rule.destination, "ingress backend service not found");
                continue;
            },
        };

        let host = match &rule.authority {
            Some(StringMatch::Exact(value)) => value.clone(),
            Some(_) => {
                warn!(rule = %rule.name, "only exact authority matches are supported on ingress");
                continue;
            },
            None => "*".to_owned(),
        };

        let routes = build_ingress_route(mesh, &rule, &service, instances, config);
        hosts.entry(host).or_default().extend(routes);
    }

    let virtual_hosts = hosts
        .into_iter()
        .map(|(host, mut routes)| {
            routes.sort_by(compare_route_specificity);
            VirtualHost { name: host.clone(), domains: vec![host], routes }
        })
        .collect::<Vec<_>>();

    let mut configs = HttpRouteConfigs::default();
    for port in [80u16, 443] {
        configs.ensure_port(port).virtual_hosts = virtual_hosts.clone();
    }
    configs.normalize();
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{NodeType, Protocol},
        registry::{config::MemoryConfigStore, memory::MemoryServiceDiscovery},
    };

    fn hello_service() -> Service {
        Service {
            hostname: "hello.default.svc.cluster.local".to_owned(),
            address: Some("10.1.0.0".to_owned()),
            ports: vec![Port::new("http", 80, Protocol::Http)],
            ..Service::default()
        }
    }

    fn ingress_node() -> Node {
        Node {
            node_type: NodeType::Ingress,
            ip_address: "10.3.3.3".to_owned(),
            id: "ingress.default".to_owned(),
            domain: "default.svc.cluster.local".to_owned(),
        }
    }

    #[test]
    fn ingress_has_plain_and_tls_listeners() {
        let mesh = MeshConfig::default();
        let listeners = build_ingress_listeners(&mesh, &ingress_node(), &[]);
        assert_eq!(listeners.len(), 2);
        assert_eq!(listeners[0].address, "tcp://0.0.0.0:443");
        assert!(listeners[0].ssl_context.is_some());
        assert_eq!(listeners[1].address, "tcp://0.0.0.0:80");
        assert!(listeners[1].ssl_context.is_none());
    }

    #[tokio::test]
    async fn ingress_routes_group_by_authority_and_specificity() {
        let mesh = MeshConfig::default();
        let registry = MemoryServiceDiscovery::new();
        registry.add_service(hello_service());
        let config = MemoryConfigStore::new();
        config.add_ingress_rule(IngressRule {
            name: "wide".to_owned(),
            destination: "hello.default.svc.cluster.local".to_owned(),
            uri: Some(StringMatch::Prefix("/".to_owned())),
            ..IngressRule::default()
        });
        config.add_ingress_rule(IngressRule {
            name: "narrow".to_owned(),
            destination: "hello.default.svc.cluster.local".to_owned(),
            authority: Some(StringMatch::Exact("hello.example.com".to_owned())),
            uri: Some(StringMatch::Exact("/status".to_owned())),
            ..IngressRule::default()
        });

        let configs = build_ingress_routes(&mesh, &[], &registry, &config).await.unwrap();
        let table = &configs.0[&80];
        assert_eq!(table.virtual_hosts.len(), 2);
        assert_eq!(table.virtual_hosts[0].name, "*");
        assert_eq!(table.virtual_hosts[1].name, "hello.example.com");
        assert_eq!(table.virtual_hosts[1].routes[0].path.as_deref(), Some("/status"));
        assert_eq!(configs.0[&80], configs.0[&443]);
    }

    #[tokio::test]
    async fn unknown_backend_is_skipped_not_fatal() {
        let mesh = MeshConfig::default();
        let registry = MemoryServiceDiscovery::new();
        let config = MemoryConfigStore::new();
        config.add_ingress_rule(IngressRule {
            name: "dangling".to_owned(),
            destination: "ghost.default.svc.cluster.local".to_owned(),
            ..IngressRule::default()
        });

        let configs = build_ingress_routes(&mesh, &[], &registry, &config).await.unwrap();
        assert!(configs.0[&80].virtual_hosts.is_empty());
    }
}
