//! Narrow interfaces to the external service registry and config store.
//! Platform adapters (Kubernetes, Consul, …) implement these traits outside
//! this crate; the in-memory implementations here back tests and demos.

pub mod config;
pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{LabelsCollection, Port, Service, ServiceInstance};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("service registry unavailable: {0}")]
    Unavailable(String),
    #[error("service registry call timed out after {0}ms")]
    Timeout(u64),
}

/// Read-only view of the service registry. Every call observes a snapshot;
/// updates become visible on subsequent calls.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn services(&self) -> Result<Vec<Service>, RegistryError>;

    async fn get_service(&self, hostname: &str) -> Result<Option<Service>, RegistryError>;

    /// Instances of a service filtered to the named ports and, when the
    /// collection is non-empty, to instances matching one of its label sets.
    async fn instances(
        &self,
        hostname: &str,
        ports: &[String],
        labels: &LabelsCollection,
    ) -> Result<Vec<ServiceInstance>, RegistryError>;

    /// Instances co-located with the given workload addresses, across all
    /// services.
    async fn host_instances(&self, addrs: &HashSet<String>) -> Result<Vec<ServiceInstance>, RegistryError>;

    /// Health/management ports exposed by the workload at `addr`.
    async fn management_ports(&self, addr: &str) -> Vec<Port>;
}

/// Resolves the workload identities (SPIFFE URIs) a client should accept for
/// a destination service.
#[async_trait]
pub trait ServiceAccounts: Send + Sync {
    async fn service_accounts(&self, hostname: &str, ports: &[String]) -> Vec<String>;
}
