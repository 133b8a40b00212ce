//! Read-only projection of the externally-managed rule store.

use std::sync::RwLock;

use crate::{
    model::rules::{DestinationPolicy, EgressRule, IngressRule, RouteRule},
    model::{Labels, ServiceInstance},
    rules,
};

/// View over routing rules, destination policies, egress and ingress rules.
/// Implementations return deterministic, fully-sorted lists; selection by
/// source workload happens here so builders stay pure.
pub trait ConfigStoreView: Send + Sync {
    /// Route rules for traffic from any of `instances` to `destination`,
    /// sorted by precedence.
    fn route_rules(&self, instances: &[ServiceInstance], destination: &str) -> Vec<RouteRule>;

    /// Route rules whose destination is one of the services backed by
    /// `instances`, used for inbound route construction.
    fn route_rules_by_destination(&self, instances: &[ServiceInstance]) -> Vec<RouteRule>;

    fn egress_rules(&self) -> Vec<EgressRule>;

    fn ingress_rules(&self) -> Vec<IngressRule>;

    /// The destination policy applying to `destination` workloads labelled
    /// exactly `labels`, if any.
    fn policy(&self, instances: &[ServiceInstance], destination: &str, labels: &Labels) -> Option<DestinationPolicy>;
}

/// In-memory rule store for tests and demos. Mutation is only used by test
/// fixtures; the discovery path reads snapshots.
#[derive(Default)]
pub struct MemoryConfigStore {
    route_rules: RwLock<Vec<RouteRule>>,
    destination_policies: RwLock<Vec<DestinationPolicy>>,
    egress_rules: RwLock<Vec<EgressRule>>,
    ingress_rules: RwLock<Vec<IngressRule>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route_rule(&self, rule: RouteRule) {
        self.route_rules.write().unwrap_or_else(std::sync::PoisonError::into_inner).push(rule);
    }

    pub fn add_destination_policy(&self, policy: DestinationPolicy) {
        self.destination_policies.write().unwrap_or_else(std::sync::PoisonError::into_inner).push(policy);
    }

    pub fn add_egress_rule(&self, rule: EgressRule) {
        self.egress_rules.write().unwrap_or_else(std::sync::PoisonError::into_inner).push(rule);
    }

    pub fn add_ingress_rule(&self, rule: IngressRule) {
        self.ingress_rules.write().unwrap_or_else(std::sync::PoisonError::into_inner).push(rule);
    }
}

impl ConfigStoreView for MemoryConfigStore {
    fn route_rules(&self, instances: &[ServiceInstance], destination: &str) -> Vec<RouteRule> {
        let mut selected = self
            .route_rules
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|rule| rule.destination == destination)
            .filter(|rule| rule.r#match.as_ref().is_none_or(|m| m.matches_source(instances)))
            .cloned()
            .collect::<Vec<_>>();
        rules::sort_route_rules(&mut selected);
        selected
    }

    fn route_rules_by_destination(&self, instances: &[ServiceInstance]) -> Vec<RouteRule> {
        let mut selected = self
            .route_rules
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|rule| {
                instances.iter().any(|instance| {
                    rule.destination == instance.service.hostname
                        && rule.applies_to_destination_labels(&instance.labels)
                })
            })
            .cloned()
            .collect::<Vec<_>>();
        rules::sort_route_rules(&mut selected);
        selected
    }

    fn egress_rules(&self) -> Vec<EgressRule> {
        let mut selected = self.egress_rules.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
        selected.sort_by(|a, b| a.name.cmp(&b.name));
        selected
    }

    fn ingress_rules(&self) -> Vec<IngressRule> {
        let mut selected = self.ingress_rules.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
        rules::sort_ingress_rules(&mut selected);
        selected
    }

    fn policy(&self, _instances: &[ServiceInstance], destination: &str, labels: &Labels) -> Option<DestinationPolicy> {
        let mut candidates = self
            .destination_policies
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|policy| policy.destination == destination && policy.labels == *labels)
            .cloned()
            .collect::<Vec<_>>();
        rules::sort_destination_policies(&mut candidates);
        candidates.into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::rules::MatchCondition;

    #[test]
    fn route_rules_filter_by_destination_and_source() {
        let store = MemoryConfigStore::new();
        store.add_route_rule(RouteRule {
            name: "for-hello".to_owned(),
            destination: "hello.default.svc.cluster.local".to_owned(),
            ..RouteRule::default()
        });
        store.add_route_rule(RouteRule {
            name: "for-world".to_owned(),
            destination: "world.default.svc.cluster.local".to_owned(),
            ..RouteRule::default()
        });
        store.add_route_rule(RouteRule {
            name: "for-hello-from-v9".to_owned(),
            destination: "hello.default.svc.cluster.local".to_owned(),
            r#match: Some(MatchCondition {
                source_labels: Labels::from([("version", "v9")]),
                ..MatchCondition::default()
            }),
            ..RouteRule::default()
        });

        let selected = store.route_rules(&[], "hello.default.svc.cluster.local");
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "for-hello");
    }

    #[test]
    fn policy_lookup_requires_exact_labels() {
        let store = MemoryConfigStore::new();
        store.add_destination_policy(DestinationPolicy {
            name: "cb".to_owned(),
            destination: "hello.default.svc.cluster.local".to_owned(),
            labels: Labels::from([("version", "v1")]),
            ..DestinationPolicy::default()
        });

        assert!(store
            .policy(&[], "hello.default.svc.cluster.local", &Labels::from([("version", "v1")]))
            .is_some());
        assert!(store.policy(&[], "hello.default.svc.cluster.local", &Labels::default()).is_none());
    }
}
