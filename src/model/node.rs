use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SERVICE_NODE_SEPARATOR: char = '~';

/// Role a proxy instance plays in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Sidecar,
    Ingress,
    Router,
}

impl Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Sidecar => write!(f, "sidecar"),
            NodeType::Ingress => write!(f, "ingress"),
            NodeType::Router => write!(f, "router"),
        }
    }
}

impl TryFrom<&str> for NodeType {
    type Error = NodeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "sidecar" => Ok(NodeType::Sidecar),
            "ingress" => Ok(NodeType::Ingress),
            "router" => Ok(NodeType::Router),
            _ => Err(NodeError::UnknownType(value.to_owned())),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum NodeError {
    #[error("unknown node type {0}")]
    UnknownType(String),
    #[error("expected four ~-separated fields in {0}")]
    MalformedServiceNode(String),
}

/// Identity of the proxy issuing a discovery request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub node_type: NodeType,
    pub ip_address: String,
    pub id: String,
    pub domain: String,
}

impl Node {
    /// Canonical rendering used as the discovery-request subject,
    /// `<type>~<ip>~<id>~<domain>`.
    pub fn service_node(&self) -> String {
        format!("{}~{}~{}~{}", self.node_type, self.ip_address, self.id, self.domain)
    }

    pub fn parse_service_node(s: &str) -> Result<Self, NodeError> {
        let parts = s.split(SERVICE_NODE_SEPARATOR).collect::<Vec<_>>();
        let [node_type, ip_address, id, domain] = parts.as_slice() else {
            return Err(NodeError::MalformedServiceNode(s.to_owned()));
        };
        Ok(Node {
            node_type: NodeType::try_from(*node_type)?,
            ip_address: (*ip_address).to_owned(),
            id: (*id).to_owned(),
            domain: (*domain).to_owned(),
        })
    }

    /// Labels of the node domain, used to shorten virtual-host domains.
    pub fn domain_parts(&self) -> Vec<&str> {
        self.domain.split('.').filter(|part| !part.is_empty()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_node_round_trip() {
        let node = Node {
            node_type: NodeType::Sidecar,
            ip_address: "10.1.1.0".to_owned(),
            id: "v0.default".to_owned(),
            domain: "default.svc.cluster.local".to_owned(),
        };
        let rendered = node.service_node();
        assert_eq!(rendered, "sidecar~10.1.1.0~v0.default~default.svc.cluster.local");
        assert_eq!(Node::parse_service_node(&rendered), Ok(node));
    }

    #[test]
    fn rejects_malformed_service_node() {
        assert_eq!(
            Node::parse_service_node("sidecar~10.1.1.0~v0.default"),
            Err(NodeError::MalformedServiceNode("sidecar~10.1.1.0~v0.default".to_owned()))
        );
        assert_eq!(
            Node::parse_service_node("lighthouse~1.2.3.4~id~domain"),
            Err(NodeError::UnknownType("lighthouse".to_owned()))
        );
    }
}
