use serde::{Deserialize, Serialize};

use super::AuthenticationPolicy;

/// Mesh-wide TLS stance, inherited by service ports that do not opt in or
/// out explicitly. Encoded separately from the per-port
/// [`AuthenticationPolicy`]; `consolidate` is the single mapping between the
/// two.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeshAuthPolicy {
    #[default]
    None,
    MutualTls,
}

/// Effective TLS policy for one service port after mesh inheritance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolidatedAuthPolicy {
    None,
    MutualTls,
}

impl MeshAuthPolicy {
    /// Returns the service-port policy unless it is `Inherit`, in which case
    /// the mesh-wide policy applies.
    pub fn consolidate(self, service_policy: AuthenticationPolicy) -> ConsolidatedAuthPolicy {
        match service_policy {
            AuthenticationPolicy::Enable => ConsolidatedAuthPolicy::MutualTls,
            AuthenticationPolicy::Disable => ConsolidatedAuthPolicy::None,
            AuthenticationPolicy::Inherit => match self {
                MeshAuthPolicy::MutualTls => ConsolidatedAuthPolicy::MutualTls,
                MeshAuthPolicy::None => ConsolidatedAuthPolicy::None,
            },
        }
    }
}

/// Mesh-wide operational configuration consumed by the translator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub auth_policy: MeshAuthPolicy,
    pub connect_timeout_ms: u64,
    pub discovery_address: String,
    pub discovery_refresh_delay_ms: u64,
    pub rds_refresh_delay_ms: u64,
    /// Port receiving the iptables traffic redirect; zero disables the
    /// sidecar capture path.
    pub proxy_listen_port: u16,
    /// Explicit HTTP proxy port, used when the capture path is disabled.
    pub proxy_http_port: u16,
    pub proxy_admin_port: u16,
    pub mixer_address: String,
    pub zipkin_address: String,
    pub access_log_file: String,
    pub enable_tracing: bool,
    pub statsd_udp_address: String,
    pub disable_policy_checks: bool,
    pub control_plane_auth_policy: MeshAuthPolicy,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            auth_policy: MeshAuthPolicy::None,
            connect_timeout_ms: 1000,
            discovery_address: "mesh-discovery:8080".to_owned(),
            discovery_refresh_delay_ms: 1000,
            rds_refresh_delay_ms: 1000,
            proxy_listen_port: 15001,
            proxy_http_port: 0,
            proxy_admin_port: 15000,
            mixer_address: String::new(),
            zipkin_address: String::new(),
            access_log_file: "/dev/stdout".to_owned(),
            enable_tracing: false,
            statsd_udp_address: String::new(),
            disable_policy_checks: false,
            control_plane_auth_policy: MeshAuthPolicy::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consolidation_prefers_port_policy() {
        assert_eq!(
            MeshAuthPolicy::None.consolidate(AuthenticationPolicy::Enable),
            ConsolidatedAuthPolicy::MutualTls
        );
        assert_eq!(
            MeshAuthPolicy::MutualTls.consolidate(AuthenticationPolicy::Disable),
            ConsolidatedAuthPolicy::None
        );
        assert_eq!(
            MeshAuthPolicy::MutualTls.consolidate(AuthenticationPolicy::Inherit),
            ConsolidatedAuthPolicy::MutualTls
        );
        assert_eq!(MeshAuthPolicy::None.consolidate(AuthenticationPolicy::Inherit), ConsolidatedAuthPolicy::None);
    }

    #[test]
    fn mesh_config_deserializes_with_defaults() {
        let mesh: MeshConfig = serde_yaml::from_str("auth_policy: MUTUAL_TLS\nmixer_address: mixer:9091\n").unwrap();
        assert_eq!(mesh.auth_policy, MeshAuthPolicy::MutualTls);
        assert_eq!(mesh.mixer_address, "mixer:9091");
        assert_eq!(mesh.proxy_listen_port, 15001);
    }
}
