use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application protocol spoken on a service port. Protocols outside the HTTP
/// family are routed through the TCP proxy path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Http,
    Http2,
    Grpc,
    Https,
    Tcp,
    Mongo,
    Redis,
    Udp,
}

#[derive(Error, Debug, PartialEq)]
pub enum ProtocolError {
    #[error("unknown protocol {0}")]
    Unknown(String),
}

impl TryFrom<&str> for Protocol {
    type Error = ProtocolError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ok(match value.to_uppercase().as_str() {
            "HTTP" => Self::Http,
            "HTTP2" => Self::Http2,
            "GRPC" => Self::Grpc,
            "HTTPS" => Self::Https,
            "TCP" => Self::Tcp,
            "MONGO" => Self::Mongo,
            "REDIS" => Self::Redis,
            "UDP" => Self::Udp,
            _ => {
                return Err(ProtocolError::Unknown(value.to_owned()));
            },
        })
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut name = format!("{self:?}");
        name.make_ascii_uppercase();
        write!(f, "{name}")
    }
}

impl Protocol {
    /// HTTP-family protocols are routed through the HTTP connection manager.
    pub fn is_http_like(self) -> bool {
        matches!(self, Protocol::Http | Protocol::Http2 | Protocol::Grpc)
    }

    /// Protocols carried over the TCP proxy path, including TLS passthrough.
    pub fn uses_tcp_path(self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Https | Protocol::Mongo | Protocol::Redis)
    }

    pub fn is_http2(self) -> bool {
        matches!(self, Protocol::Http2 | Protocol::Grpc)
    }
}

/// Per-port TLS authentication stance. `Inherit` defers to the mesh-wide
/// policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthenticationPolicy {
    #[default]
    Inherit,
    Enable,
    Disable,
}

/// Workload labels. Kept sorted so rendered label strings and service keys
/// are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Labels(pub BTreeMap<String, String>);

/// A disjunction of label sets; a workload matches the collection when it
/// matches any member. The empty collection matches everything.
pub type LabelsCollection = Vec<Labels>;

impl Labels {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every label in `self` is present with the same value in
    /// `other`.
    pub fn is_subset_of(&self, other: &Labels) -> bool {
        self.0.iter().all(|(k, v)| other.0.get(k) == Some(v))
    }

    pub fn matches_collection(&self, collection: &LabelsCollection) -> bool {
        collection.is_empty() || collection.iter().any(|candidate| candidate.is_subset_of(self))
    }
}

impl Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",");
        write!(f, "{rendered}")
    }
}

impl FromStr for Labels {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut labels = BTreeMap::new();
        for pair in s.split(',').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or(())?;
            labels.insert(key.to_owned(), value.to_owned());
        }
        Ok(Labels(labels))
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Labels {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Labels(pairs.into_iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect())
    }
}

/// A named service port. Port numbers and names are unique within a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
    #[serde(default)]
    pub authentication_policy: AuthenticationPolicy,
}

impl Port {
    pub fn new(name: &str, port: u16, protocol: Protocol) -> Self {
        Self {
            name: name.to_owned(),
            port,
            protocol,
            authentication_policy: AuthenticationPolicy::Inherit,
        }
    }
}

/// A service registered in the mesh. `address` is the virtual IP assigned for
/// intra-mesh addressing; services without one are routed to the connection's
/// original destination. `external_name` marks a service living outside the
/// mesh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub hostname: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub external_name: Option<String>,
    pub ports: Vec<Port>,
    #[serde(default)]
    pub load_balancing_disabled: bool,
}

impl Service {
    pub fn external(&self) -> bool {
        self.external_name.as_deref().is_some_and(|name| !name.is_empty())
    }

    pub fn get_port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name == name)
    }

    pub fn get_port_by_number(&self, number: u16) -> Option<&Port> {
        self.ports.iter().find(|p| p.port == number)
    }

    /// Key identifying one port (and optional label subset) of this service,
    /// e.g. `hello.default.svc.cluster.local|http|version=v1`.
    pub fn key(&self, port: &Port, labels: Option<&Labels>) -> String {
        let collection: LabelsCollection = labels.into_iter().cloned().collect();
        service_key(&self.hostname, &[port], &collection)
    }
}

/// Renders `hostname|port-names|label-sets`. Port names are sorted and
/// comma-joined, label sets sorted and semicolon-joined; empty sections are
/// dropped from the right.
pub fn service_key(hostname: &str, ports: &[&Port], labels: &LabelsCollection) -> String {
    let mut out = hostname.to_owned();

    let single_unnamed = ports.len() == 1 && ports[0].name.is_empty();
    if (ports.is_empty() || single_unnamed) && labels.is_empty() {
        return out;
    }

    out.push('|');
    let mut names = ports.iter().map(|p| p.name.as_str()).collect::<Vec<_>>();
    names.sort_unstable();
    out.push_str(&names.join(","));

    if !labels.is_empty() {
        out.push('|');
        let mut rendered = labels.iter().map(ToString::to_string).collect::<Vec<_>>();
        rendered.sort_unstable();
        out.push_str(&rendered.join(";"));
    }

    out
}

/// Inverse of [`service_key`]. A key with no port section yields a single
/// empty port name, mirroring the render side.
pub fn parse_service_key(key: &str) -> (String, Vec<String>, LabelsCollection) {
    let mut parts = key.splitn(3, '|');
    let hostname = parts.next().unwrap_or_default().to_owned();
    let ports = match parts.next() {
        Some(section) => section.split(',').map(ToOwned::to_owned).collect(),
        None => vec![String::new()],
    };
    let labels = parts
        .next()
        .into_iter()
        .flat_map(|section| section.split(';'))
        .filter(|set| !set.is_empty())
        .filter_map(|set| set.parse().ok())
        .collect();
    (hostname, ports, labels)
}

/// Network address of a single workload backing a service. The endpoint port
/// may differ from the service port it implements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEndpoint {
    pub address: String,
    pub port: u16,
    pub service_port: Port,
}

/// One workload instance of a service, with its labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub endpoint: NetworkEndpoint,
    pub service: Service,
    #[serde(default)]
    pub labels: Labels,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello() -> Service {
        Service {
            hostname: "hello.default.svc.cluster.local".to_owned(),
            address: Some("10.1.0.0".to_owned()),
            external_name: None,
            ports: vec![Port::new("http", 80, Protocol::Http), Port::new("custom", 90, Protocol::Tcp)],
            load_balancing_disabled: false,
        }
    }

    #[test]
    fn service_key_round_trip() {
        let service = hello();
        let labels = Labels::from([("version", "v1")]);
        let key = service.key(&service.ports[0], Some(&labels));
        assert_eq!(key, "hello.default.svc.cluster.local|http|version=v1");

        let (hostname, ports, parsed) = parse_service_key(&key);
        assert_eq!(hostname, service.hostname);
        assert_eq!(ports, vec!["http".to_owned()]);
        assert_eq!(parsed, vec![labels]);
    }

    #[test]
    fn service_key_without_sections() {
        let (hostname, ports, labels) = parse_service_key("world.default.svc.cluster.local");
        assert_eq!(hostname, "world.default.svc.cluster.local");
        assert_eq!(ports, vec![String::new()]);
        assert!(labels.is_empty());
    }

    #[test]
    fn multi_label_keys_are_sorted() {
        let labels = Labels::from([("zone", "us"), ("version", "v2")]);
        assert_eq!(labels.to_string(), "version=v2,zone=us");
    }

    #[test]
    fn label_subset_matching() {
        let instance = Labels::from([("version", "v0"), ("app", "hello")]);
        assert!(Labels::from([("version", "v0")]).is_subset_of(&instance));
        assert!(!Labels::from([("version", "v1")]).is_subset_of(&instance));
        assert!(instance.matches_collection(&vec![]));
        assert!(instance.matches_collection(&vec![Labels::from([("app", "hello")])]));
    }

    #[test]
    fn protocol_parsing_is_case_insensitive() {
        assert_eq!(Protocol::try_from("grpc"), Ok(Protocol::Grpc));
        assert_eq!(Protocol::try_from("Mongo"), Ok(Protocol::Mongo));
        assert!(Protocol::try_from("carrier-pigeon").is_err());
    }
}
