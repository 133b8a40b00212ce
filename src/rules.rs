//! Rule selection and conflict resolution. All orderings here are total so
//! that generated configuration is deterministic for a fixed rule set.

use std::{cmp::Ordering, collections::HashSet};

use tracing::warn;

use crate::model::rules::{DestinationPolicy, EgressRule, IngressRule, RouteRule};

/// Orders route rules by descending precedence, ties broken by ascending
/// rule name.
pub fn sort_route_rules(rules: &mut [RouteRule]) {
    rules.sort_by(|a, b| match b.precedence.cmp(&a.precedence) {
        Ordering::Equal => a.name.cmp(&b.name),
        other => other,
    });
}

pub fn sort_ingress_rules(rules: &mut [IngressRule]) {
    rules.sort_by(|a, b| match b.precedence.cmp(&a.precedence) {
        Ordering::Equal => a.name.cmp(&b.name),
        other => other,
    });
}

pub fn sort_destination_policies(policies: &mut [DestinationPolicy]) {
    policies.sort_by(|a, b| match b.precedence.cmp(&a.precedence) {
        Ordering::Equal => a.name.cmp(&b.name),
        other => other,
    });
}

/// Drops egress rules whose (destination, port) pair is already claimed by an
/// earlier rule. Rules are considered in ascending name order; rejection is
/// logged, never fatal.
pub fn reject_conflicting_egress_rules(mut rules: Vec<EgressRule>) -> Vec<EgressRule> {
    rules.sort_by(|a, b| a.name.cmp(&b.name));

    let mut claimed = HashSet::new();
    let mut accepted = Vec::with_capacity(rules.len());
    for rule in rules {
        let conflict = rule
            .ports
            .iter()
            .find(|port| claimed.contains(&(rule.destination.clone(), port.port)));
        if let Some(port) = conflict {
            warn!(
                rule = %rule.name,
                destination = %rule.destination,
                port = port.port,
                "rejecting egress rule, destination and port already claimed"
            );
            continue;
        }
        for port in &rule.ports {
            claimed.insert((rule.destination.clone(), port.port));
        }
        accepted.push(rule);
    }
    accepted
}
