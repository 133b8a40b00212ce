//! Translation from registry state and rules to the data-plane proxy's v1
//! configuration. The general flow: routes are created per destination with
//! referenced clusters carried alongside, routes are organized into listeners
//! for inbound and outbound traffic, clusters are aggregated across routes,
//! policy and filter passes layer on top, and everything is de-duplicated and
//! ordered canonically before serialization.

pub mod bootstrap;
pub mod clusters;
pub mod ingress;
pub mod listeners;
pub mod resources;
pub mod routes;

pub use resources::tcp_address;

pub const LOCALHOST_ADDRESS: &str = "127.0.0.1";
pub const WILDCARD_ADDRESS: &str = "0.0.0.0";

pub const VIRTUAL_LISTENER_NAME: &str = "virtual";

pub const RDS_NAME: &str = "rds";
pub const CDS_NAME: &str = "cds";
pub const SDS_NAME: &str = "sds";
pub const LDS_NAME: &str = "lds";

/// Reserved route-config name addressing the combined table of every HTTP
/// outbound port.
pub const RDS_ALL: &str = "all";

pub const INGRESS_TRACE_OPERATION: &str = "ingress";
pub const EGRESS_TRACE_OPERATION: &str = "egress";

pub const DEFAULT_ACCESS_LOG: &str = "/dev/stdout";

pub const MIXER_CLUSTER: &str = "mixer_server";
pub const ZIPKIN_COLLECTOR_CLUSTER: &str = "zipkin";
pub const ZIPKIN_COLLECTOR_ENDPOINT: &str = "/api/v1/spans";

/// Workload certificate locations mounted into every proxy.
pub const AUTH_CERTS_PATH: &str = "/etc/certs/";
pub const CERT_CHAIN_FILENAME: &str = "cert-chain.pem";
pub const KEY_FILENAME: &str = "key.pem";
pub const ROOT_CERT_FILENAME: &str = "root-cert.pem";

/// Certificate locations for the ingress proxy's terminating listener.
pub const INGRESS_CERT_FILE: &str = "/etc/ingress/tls.crt";
pub const INGRESS_KEY_FILE: &str = "/etc/ingress/tls.key";
