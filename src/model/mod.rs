mod mesh;
mod node;
pub mod rules;
mod service;

pub use mesh::{ConsolidatedAuthPolicy, MeshAuthPolicy, MeshConfig};
pub use node::{Node, NodeError, NodeType};
pub use service::{
    parse_service_key, service_key, AuthenticationPolicy, Labels, LabelsCollection, NetworkEndpoint, Port, Protocol,
    ProtocolError, Service, ServiceInstance,
};
