//! In-memory service registry. Serves as the test fixture registry and as a
//! standalone demo backend seeded from a YAML snapshot.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{Mutex, PoisonError, RwLock},
};

use async_trait::async_trait;
use serde::Deserialize;

use super::{RegistryError, ServiceAccounts, ServiceDiscovery};
use crate::model::{LabelsCollection, Port, Service, ServiceInstance};

/// Serialized registry snapshot accepted by [`MemoryServiceDiscovery::from_snapshot`].
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegistrySnapshot {
    pub services: Vec<Service>,
    pub instances: Vec<ServiceInstance>,
    pub management_ports: Vec<Port>,
    pub service_accounts: BTreeMap<String, Vec<String>>,
}

/// Registry fixture. Failure injection mirrors the upstream registries'
/// error surface so discovery error paths can be exercised per test.
#[derive(Default)]
pub struct MemoryServiceDiscovery {
    services: RwLock<BTreeMap<String, Service>>,
    instances: RwLock<Vec<ServiceInstance>>,
    management_ports: RwLock<Vec<Port>>,
    service_accounts: RwLock<BTreeMap<String, Vec<String>>>,
    services_error: Mutex<Option<String>>,
    instances_error: Mutex<Option<String>>,
    host_instances_error: Mutex<Option<String>>,
}

impl MemoryServiceDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        let registry = Self::new();
        for service in snapshot.services {
            registry.add_service(service);
        }
        for instance in snapshot.instances {
            registry.add_instance(instance);
        }
        *registry.management_ports.write().unwrap_or_else(PoisonError::into_inner) = snapshot.management_ports;
        *registry.service_accounts.write().unwrap_or_else(PoisonError::into_inner) = snapshot.service_accounts;
        registry
    }

    pub fn add_service(&self, service: Service) {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service.hostname.clone(), service);
    }

    pub fn add_instance(&self, instance: ServiceInstance) {
        self.instances.write().unwrap_or_else(PoisonError::into_inner).push(instance);
    }

    pub fn set_management_ports(&self, ports: Vec<Port>) {
        *self.management_ports.write().unwrap_or_else(PoisonError::into_inner) = ports;
    }

    pub fn set_service_accounts(&self, hostname: &str, accounts: Vec<String>) {
        self.service_accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hostname.to_owned(), accounts);
    }

    pub fn set_services_error(&self, message: Option<&str>) {
        *self.services_error.lock().unwrap_or_else(PoisonError::into_inner) = message.map(ToOwned::to_owned);
    }

    pub fn set_instances_error(&self, message: Option<&str>) {
        *self.instances_error.lock().unwrap_or_else(PoisonError::into_inner) = message.map(ToOwned::to_owned);
    }

    pub fn set_host_instances_error(&self, message: Option<&str>) {
        *self.host_instances_error.lock().unwrap_or_else(PoisonError::into_inner) = message.map(ToOwned::to_owned);
    }

    fn injected(slot: &Mutex<Option<String>>) -> Result<(), RegistryError> {
        match slot.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(message) => Err(RegistryError::Unavailable(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ServiceDiscovery for MemoryServiceDiscovery {
    async fn services(&self) -> Result<Vec<Service>, RegistryError> {
        Self::injected(&self.services_error)?;
        Ok(self.services.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect())
    }

    async fn get_service(&self, hostname: &str) -> Result<Option<Service>, RegistryError> {
        Self::injected(&self.services_error)?;
        Ok(self.services.read().unwrap_or_else(PoisonError::into_inner).get(hostname).cloned())
    }

    async fn instances(
        &self,
        hostname: &str,
        ports: &[String],
        labels: &LabelsCollection,
    ) -> Result<Vec<ServiceInstance>, RegistryError> {
        Self::injected(&self.instances_error)?;
        Ok(self
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|instance| instance.service.hostname == hostname)
            .filter(|instance| ports.contains(&instance.endpoint.service_port.name))
            .filter(|instance| instance.labels.matches_collection(labels))
            .cloned()
            .collect())
    }

    async fn host_instances(&self, addrs: &HashSet<String>) -> Result<Vec<ServiceInstance>, RegistryError> {
        Self::injected(&self.host_instances_error)?;
        Ok(self
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|instance| addrs.contains(&instance.endpoint.address))
            .cloned()
            .collect())
    }

    async fn management_ports(&self, _addr: &str) -> Vec<Port> {
        self.management_ports.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ServiceAccounts for MemoryServiceDiscovery {
    async fn service_accounts(&self, hostname: &str, _ports: &[String]) -> Vec<String> {
        self.service_accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hostname)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Labels, NetworkEndpoint, Protocol};

    fn fixture() -> MemoryServiceDiscovery {
        let registry = MemoryServiceDiscovery::new();
        let port = Port::new("http", 80, Protocol::Http);
        let service = Service {
            hostname: "hello.default.svc.cluster.local".to_owned(),
            address: Some("10.1.0.0".to_owned()),
            ports: vec![port.clone()],
            ..Service::default()
        };
        registry.add_service(service.clone());
        for (version, address) in [("v0", "10.1.1.0"), ("v1", "10.1.1.1")] {
            registry.add_instance(ServiceInstance {
                endpoint: NetworkEndpoint {
                    address: address.to_owned(),
                    port: 80,
                    service_port: port.clone(),
                },
                service: service.clone(),
                labels: Labels::from([("version", version)]),
            });
        }
        registry
    }

    #[tokio::test]
    async fn instances_filter_by_port_and_labels() {
        let registry = fixture();
        let all = registry
            .instances("hello.default.svc.cluster.local", &["http".to_owned()], &vec![])
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let v1 = registry
            .instances(
                "hello.default.svc.cluster.local",
                &["http".to_owned()],
                &vec![Labels::from([("version", "v1")])],
            )
            .await
            .unwrap();
        assert_eq!(v1.len(), 1);
        assert_eq!(v1[0].endpoint.address, "10.1.1.1");
    }

    #[tokio::test]
    async fn injected_errors_propagate() {
        let registry = fixture();
        registry.set_services_error(Some("registry down"));
        assert!(matches!(registry.services().await, Err(RegistryError::Unavailable(_))));
        registry.set_services_error(None);
        assert!(registry.services().await.is_ok());
    }
}
