//! HTTP discovery API. Proxies poll these endpoints for their endpoint,
//! cluster, route and listener configuration; responses are memoized by
//! request fingerprint since the translator is a pure function of its
//! inputs.

pub mod cache;

use std::{
    collections::{BTreeMap, HashSet},
    future::Future,
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::Serialize;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, error, info};
use typed_builder::TypedBuilder;

use crate::{
    envoy::{
        clusters::{apply_cluster_policy, build_mixer_cluster, build_outbound_cluster},
        ingress::{build_ingress_listeners, build_ingress_routes},
        listeners::build_sidecar_listeners_clusters,
        resources::{normalize_clusters, Cluster, HttpRouteConfig, Listener},
        routes::build_outbound_and_egress_routes,
        RDS_ALL,
    },
    model::{parse_service_key, MeshConfig, Node, NodeError, NodeType, Service, ServiceInstance},
    registry::{config::ConfigStoreView, RegistryError, ServiceAccounts, ServiceDiscovery},
};

use cache::{CacheStats, ResponseCache};

/// External collaborators of the discovery service, injected per instance so
/// tests can swap in fixtures.
#[derive(Clone, TypedBuilder)]
pub struct Environment {
    pub discovery: Arc<dyn ServiceDiscovery>,
    pub accounts: Arc<dyn ServiceAccounts>,
    pub config: Arc<dyn ConfigStoreView>,
    pub mesh: MeshConfig,
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("unknown resource: {0}")]
    NotFound(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("configuration build failed: {0}")]
    Build(String),
}

impl From<NodeError> for DiscoveryError {
    fn from(error: NodeError) -> Self {
        DiscoveryError::MalformedRequest(error.to_string())
    }
}

impl From<serde_json::Error> for DiscoveryError {
    fn from(error: serde_json::Error) -> Self {
        DiscoveryError::Build(error.to_string())
    }
}

impl IntoResponse for DiscoveryError {
    fn into_response(self) -> Response {
        let status = match &self {
            DiscoveryError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            DiscoveryError::NotFound(_) => StatusCode::NOT_FOUND,
            DiscoveryError::Registry(_) | DiscoveryError::Build(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status == StatusCode::SERVICE_UNAVAILABLE {
            error!(error = %self, "discovery request failed");
        }
        (status, self.to_string()).into_response()
    }
}

#[derive(Debug, Serialize)]
struct EndpointHost {
    ip_address: String,
    port: u16,
}

#[derive(Debug, Serialize)]
struct Hosts {
    hosts: Vec<EndpointHost>,
}

#[derive(Debug, Serialize)]
struct ServiceHosts {
    #[serde(rename = "service-key")]
    service_key: String,
    hosts: Vec<EndpointHost>,
}

#[derive(Debug, Serialize)]
struct ClustersResponse {
    clusters: Vec<Cluster>,
}

#[derive(Debug, Serialize)]
struct ListenersResponse {
    listeners: Vec<Listener>,
}

#[derive(Debug, Serialize)]
struct CacheStatsResponse {
    cache_stats: BTreeMap<&'static str, CacheStats>,
}

struct Caches {
    sds: ResponseCache,
    cds: ResponseCache,
    rds: ResponseCache,
    lds: ResponseCache,
}

/// The discovery service itself: pure builders underneath, a response cache
/// in front, an axum router on top.
pub struct DiscoveryService {
    env: Environment,
    caches: Caches,
    mesh_version: String,
}

fn json_response(bytes: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], bytes).into_response()
}

fn sorted_endpoint_hosts(instances: &[ServiceInstance]) -> Vec<EndpointHost> {
    let mut hosts = instances
        .iter()
        .map(|instance| EndpointHost {
            ip_address: instance.endpoint.address.clone(),
            port: instance.endpoint.port,
        })
        .collect::<Vec<_>>();
    hosts.sort_by(|a, b| a.ip_address.cmp(&b.ip_address).then(a.port.cmp(&b.port)));
    hosts
}

impl DiscoveryService {
    pub fn new(env: Environment) -> Self {
        let mesh_bytes = serde_json::to_vec(&env.mesh).unwrap_or_default();
        let mesh_version = hex::encode(Sha1::digest(&mesh_bytes));
        Self {
            env,
            caches: Caches {
                sds: ResponseCache::default(),
                cds: ResponseCache::default(),
                rds: ResponseCache::default(),
                lds: ResponseCache::default(),
            },
            mesh_version,
        }
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/v1/registration/", get(list_all_endpoints))
            .route("/v1/registration/{key}", get(list_endpoints))
            .route("/v1/clusters/", get(list_all_clusters))
            .route("/v1/clusters/{service_cluster}/{node}", get(list_clusters))
            .route("/v1/routes/", get(list_all_routes))
            .route("/v1/routes/{route_name}/{service_cluster}/{node}", get(list_routes))
            .route("/v1/listeners/{service_cluster}/{node}", get(list_listeners))
            .route("/cache_stats", get(cache_stats))
            .route("/cache_stats_delete", post(cache_stats_delete))
            .with_state(self)
    }

    /// Flushes every cached response without touching the hit/miss counters.
    pub async fn clear_cache(&self) {
        info!("clearing discovery response caches");
        self.caches.sds.clear().await;
        self.caches.cds.clear().await;
        self.caches.rds.clear().await;
        self.caches.lds.clear().await;
    }

    fn fingerprint(&self, kind: &str, subject: &str) -> String {
        format!("{kind}|{}|{subject}", self.mesh_version)
    }

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, RegistryError>>,
    ) -> Result<T, RegistryError> {
        let timeout_ms = self.env.mesh.connect_timeout_ms;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
            Ok(result) => result,
            Err(_) => Err(RegistryError::Timeout(timeout_ms)),
        }
    }

    /// Instances co-located with the requesting proxy, in canonical order.
    async fn node_instances(&self, node: &Node) -> Result<Vec<ServiceInstance>, RegistryError> {
        let addrs = HashSet::from([node.ip_address.clone()]);
        let mut instances = self.with_timeout(self.env.discovery.host_instances(&addrs)).await?;
        instances.sort_by(|a, b| {
            (&a.endpoint.address, a.endpoint.port, &a.service.hostname, &a.endpoint.service_port.name).cmp(&(
                &b.endpoint.address,
                b.endpoint.port,
                &b.service.hostname,
                &b.endpoint.service_port.name,
            ))
        });
        Ok(instances)
    }

    async fn mesh_services(&self) -> Result<Vec<Service>, RegistryError> {
        let mut services = self.with_timeout(self.env.discovery.services()).await?;
        services.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        Ok(services)
    }

    async fn build_endpoints(&self, key: &str) -> Result<Bytes, DiscoveryError> {
        let (hostname, ports, labels) = parse_service_key(key);
        let instances = self.with_timeout(self.env.discovery.instances(&hostname, &ports, &labels)).await?;
        let hosts = Hosts { hosts: sorted_endpoint_hosts(&instances) };
        Ok(Bytes::from(serde_json::to_vec(&hosts)?))
    }

    async fn build_all_endpoints(&self) -> Result<Bytes, DiscoveryError> {
        let mut bundles = Vec::new();
        for service in self.mesh_services().await? {
            for port in &service.ports {
                let instances = self
                    .with_timeout(self.env.discovery.instances(&service.hostname, &[port.name.clone()], &vec![]))
                    .await?;
                bundles.push(ServiceHosts {
                    service_key: service.key(port, None),
                    hosts: sorted_endpoint_hosts(&instances),
                });
            }
        }
        Ok(Bytes::from(serde_json::to_vec(&bundles)?))
    }

    async fn build_clusters(&self, node: &Node) -> Result<Bytes, DiscoveryError> {
        let mesh = &self.env.mesh;
        let (instances, mut clusters) = match node.node_type {
            NodeType::Sidecar | NodeType::Router => {
                let instances = self.node_instances(node).await?;
                let services = self.mesh_services().await?;
                let management = self.env.discovery.management_ports(&node.ip_address).await;
                let (_, clusters) = build_sidecar_listeners_clusters(
                    mesh,
                    &instances,
                    &services,
                    &management,
                    node,
                    self.env.config.as_ref(),
                );
                (instances, clusters)
            },
            NodeType::Ingress => {
                let instances = self.node_instances(node).await?;
                let configs = build_ingress_routes(
                    mesh,
                    &instances,
                    self.env.discovery.as_ref(),
                    self.env.config.as_ref(),
                )
                .await?;
                let clusters = configs.clusters();
                (instances, clusters)
            },
        };

        for cluster in &mut clusters {
            apply_cluster_policy(
                cluster,
                &instances,
                self.env.config.as_ref(),
                mesh,
                self.env.accounts.as_ref(),
            )
            .await;
        }
        if !mesh.mixer_address.is_empty() {
            clusters.push(build_mixer_cluster(mesh));
        }
        let clusters = normalize_clusters(clusters);

        debug!(node = %node.service_node(), count = clusters.len(), "built cluster bundle");
        Ok(Bytes::from(serde_json::to_vec(&ClustersResponse { clusters })?))
    }

    async fn build_all_clusters(&self) -> Result<Bytes, DiscoveryError> {
        let mut clusters = Vec::new();
        for service in self.mesh_services().await? {
            for port in &service.ports {
                let mut cluster = build_outbound_cluster(&service, port, None);
                cluster.connect_timeout_ms = self.env.mesh.connect_timeout_ms;
                clusters.push(cluster);
            }
        }
        let clusters = normalize_clusters(clusters);
        Ok(Bytes::from(serde_json::to_vec(&ClustersResponse { clusters })?))
    }

    async fn build_route_config(&self, route_name: &str, node: &Node) -> Result<Bytes, DiscoveryError> {
        let mesh = &self.env.mesh;
        let configs = match node.node_type {
            NodeType::Ingress => {
                let instances = self.node_instances(node).await?;
                build_ingress_routes(mesh, &instances, self.env.discovery.as_ref(), self.env.config.as_ref())
                    .await?
            },
            NodeType::Sidecar | NodeType::Router => {
                let instances = self.node_instances(node).await?;
                let services = self.mesh_services().await?;
                build_outbound_and_egress_routes(mesh, node, &instances, &services, self.env.config.as_ref())
            },
        };

        let config = if route_name == RDS_ALL {
            configs.combine()
        } else {
            let port: u16 = route_name
                .parse()
                .map_err(|_| DiscoveryError::MalformedRequest(format!("route name {route_name}")))?;
            configs
                .0
                .get(&port)
                .cloned()
                .ok_or_else(|| DiscoveryError::NotFound(format!("no route configuration for port {port}")))?
        };
        Ok(Bytes::from(serde_json::to_vec(&config)?))
    }

    async fn build_all_routes(&self) -> Result<Bytes, DiscoveryError> {
        // route tables are per-proxy; the diagnostic view renders them for an
        // anonymous sidecar with no co-located workloads
        let node = Node {
            node_type: NodeType::Sidecar,
            ip_address: String::new(),
            id: String::new(),
            domain: String::new(),
        };
        let services = self.mesh_services().await?;
        let configs =
            build_outbound_and_egress_routes(&self.env.mesh, &node, &[], &services, self.env.config.as_ref());
        let tables: BTreeMap<String, &HttpRouteConfig> =
            configs.0.iter().map(|(port, config)| (port.to_string(), config)).collect();
        Ok(Bytes::from(serde_json::to_vec(&tables)?))
    }

    async fn build_listeners(&self, node: &Node) -> Result<Bytes, DiscoveryError> {
        let mesh = &self.env.mesh;
        let listeners = match node.node_type {
            NodeType::Sidecar | NodeType::Router => {
                let instances = self.node_instances(node).await?;
                let services = self.mesh_services().await?;
                let management = self.env.discovery.management_ports(&node.ip_address).await;
                let (listeners, _) = build_sidecar_listeners_clusters(
                    mesh,
                    &instances,
                    &services,
                    &management,
                    node,
                    self.env.config.as_ref(),
                );
                listeners
            },
            NodeType::Ingress => {
                let instances = self.node_instances(node).await?;
                build_ingress_listeners(mesh, node, &instances)
            },
        };
        debug!(node = %node.service_node(), count = listeners.len(), "built listener bundle");
        Ok(Bytes::from(serde_json::to_vec(&ListenersResponse { listeners })?))
    }
}

/// Runs a cached build on its own task: a client disconnect cancels the
/// handler future, but the build still completes and lands in the cache.
macro_rules! detached {
    ($task:expr) => {
        tokio::spawn($task)
            .await
            .map_err(|join_error| DiscoveryError::Build(join_error.to_string()))?
    };
}

async fn list_endpoints(
    State(ds): State<Arc<DiscoveryService>>,
    Path(key): Path<String>,
) -> Result<Response, DiscoveryError> {
    let bytes = detached!(async move {
        let fingerprint = ds.fingerprint("sds", &key);
        ds.caches.sds.get_or_build(&fingerprint, || ds.build_endpoints(&key)).await
    })?;
    Ok(json_response(bytes))
}

async fn list_all_endpoints(State(ds): State<Arc<DiscoveryService>>) -> Result<Response, DiscoveryError> {
    Ok(json_response(ds.build_all_endpoints().await?))
}

async fn list_clusters(
    State(ds): State<Arc<DiscoveryService>>,
    Path((_service_cluster, node_id)): Path<(String, String)>,
) -> Result<Response, DiscoveryError> {
    let node = Node::parse_service_node(&node_id)?;
    let bytes = detached!(async move {
        let fingerprint = ds.fingerprint("cds", &node.service_node());
        ds.caches.cds.get_or_build(&fingerprint, || ds.build_clusters(&node)).await
    })?;
    Ok(json_response(bytes))
}

async fn list_all_clusters(State(ds): State<Arc<DiscoveryService>>) -> Result<Response, DiscoveryError> {
    Ok(json_response(ds.build_all_clusters().await?))
}

async fn list_routes(
    State(ds): State<Arc<DiscoveryService>>,
    Path((route_name, _service_cluster, node_id)): Path<(String, String, String)>,
) -> Result<Response, DiscoveryError> {
    let node = Node::parse_service_node(&node_id)?;
    let bytes = detached!(async move {
        let fingerprint = ds.fingerprint("rds", &format!("{route_name}|{}", node.service_node()));
        ds.caches.rds.get_or_build(&fingerprint, || ds.build_route_config(&route_name, &node)).await
    })?;
    Ok(json_response(bytes))
}

async fn list_all_routes(State(ds): State<Arc<DiscoveryService>>) -> Result<Response, DiscoveryError> {
    Ok(json_response(ds.build_all_routes().await?))
}

async fn list_listeners(
    State(ds): State<Arc<DiscoveryService>>,
    Path((_service_cluster, node_id)): Path<(String, String)>,
) -> Result<Response, DiscoveryError> {
    let node = Node::parse_service_node(&node_id)?;
    let bytes = detached!(async move {
        let fingerprint = ds.fingerprint("lds", &node.service_node());
        ds.caches.lds.get_or_build(&fingerprint, || ds.build_listeners(&node)).await
    })?;
    Ok(json_response(bytes))
}

async fn cache_stats(State(ds): State<Arc<DiscoveryService>>) -> Response {
    let stats = CacheStatsResponse {
        cache_stats: BTreeMap::from([
            ("cds", ds.caches.cds.stats().await),
            ("lds", ds.caches.lds.stats().await),
            ("rds", ds.caches.rds.stats().await),
            ("sds", ds.caches.sds.stats().await),
        ]),
    };
    axum::Json(stats).into_response()
}

async fn cache_stats_delete(State(ds): State<Arc<DiscoveryService>>) -> StatusCode {
    ds.caches.sds.reset_stats();
    ds.caches.cds.reset_stats();
    ds.caches.rds.reset_stats();
    ds.caches.lds.reset_stats();
    StatusCode::OK
}
