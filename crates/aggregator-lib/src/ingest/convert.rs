//! Conversion between wire messages and internal models

use crate::error::FlowError;
use crate::models::{Action, EndpointType, Flow, FlowKey, FlowStats, Reporter};
use crate::policy::{PolicyHit, PolicyKind, PolicyTrace};
use crate::proto;

impl From<i32> for EndpointType {
    fn from(value: i32) -> Self {
        match proto::EndpointType::try_from(value) {
            Ok(proto::EndpointType::WorkloadEndpoint) => EndpointType::WorkloadEndpoint,
            Ok(proto::EndpointType::HostEndpoint) => EndpointType::HostEndpoint,
            Ok(proto::EndpointType::NetworkSet) => EndpointType::NetworkSet,
            Ok(proto::EndpointType::Network) => EndpointType::Network,
            _ => EndpointType::Unspecified,
        }
    }
}

impl From<EndpointType> for i32 {
    fn from(value: EndpointType) -> Self {
        let wire = match value {
            EndpointType::Unspecified => proto::EndpointType::Unspecified,
            EndpointType::WorkloadEndpoint => proto::EndpointType::WorkloadEndpoint,
            EndpointType::HostEndpoint => proto::EndpointType::HostEndpoint,
            EndpointType::NetworkSet => proto::EndpointType::NetworkSet,
            EndpointType::Network => proto::EndpointType::Network,
        };
        wire as i32
    }
}

impl From<i32> for Reporter {
    fn from(value: i32) -> Self {
        match proto::Reporter::try_from(value) {
            Ok(proto::Reporter::Src) => Reporter::Src,
            Ok(proto::Reporter::Dst) => Reporter::Dst,
            _ => Reporter::Unspecified,
        }
    }
}

impl From<Reporter> for i32 {
    fn from(value: Reporter) -> Self {
        let wire = match value {
            Reporter::Unspecified => proto::Reporter::Unspecified,
            Reporter::Src => proto::Reporter::Src,
            Reporter::Dst => proto::Reporter::Dst,
        };
        wire as i32
    }
}

impl From<i32> for Action {
    fn from(value: i32) -> Self {
        match proto::Action::try_from(value) {
            Ok(proto::Action::Allow) => Action::Allow,
            Ok(proto::Action::Deny) => Action::Deny,
            Ok(proto::Action::Pass) => Action::Pass,
            _ => Action::Unspecified,
        }
    }
}

impl From<Action> for i32 {
    fn from(value: Action) -> Self {
        let wire = match value {
            Action::Unspecified => proto::Action::Unspecified,
            Action::Allow => proto::Action::Allow,
            Action::Deny => proto::Action::Deny,
            Action::Pass => proto::Action::Pass,
        };
        wire as i32
    }
}

impl From<i32> for PolicyKind {
    fn from(value: i32) -> Self {
        use proto::PolicyKind as Wire;
        match Wire::try_from(value) {
            Ok(Wire::CalicoNetworkPolicy) => PolicyKind::CalicoNetworkPolicy,
            Ok(Wire::GlobalNetworkPolicy) => PolicyKind::GlobalNetworkPolicy,
            Ok(Wire::StagedNetworkPolicy) => PolicyKind::StagedNetworkPolicy,
            Ok(Wire::StagedGlobalNetworkPolicy) => PolicyKind::StagedGlobalNetworkPolicy,
            Ok(Wire::StagedKubernetesNetworkPolicy) => PolicyKind::StagedKubernetesNetworkPolicy,
            Ok(Wire::NetworkPolicy) => PolicyKind::NetworkPolicy,
            Ok(Wire::AdminNetworkPolicy) => PolicyKind::AdminNetworkPolicy,
            Ok(Wire::BaselineAdminNetworkPolicy) => PolicyKind::BaselineAdminNetworkPolicy,
            Ok(Wire::Profile) => PolicyKind::Profile,
            Ok(Wire::EndOfTier) => PolicyKind::EndOfTier,
            _ => PolicyKind::Unspecified,
        }
    }
}

impl From<PolicyKind> for i32 {
    fn from(value: PolicyKind) -> Self {
        use proto::PolicyKind as Wire;
        let wire = match value {
            PolicyKind::Unspecified => Wire::Unspecified,
            PolicyKind::CalicoNetworkPolicy => Wire::CalicoNetworkPolicy,
            PolicyKind::GlobalNetworkPolicy => Wire::GlobalNetworkPolicy,
            PolicyKind::StagedNetworkPolicy => Wire::StagedNetworkPolicy,
            PolicyKind::StagedGlobalNetworkPolicy => Wire::StagedGlobalNetworkPolicy,
            PolicyKind::StagedKubernetesNetworkPolicy => Wire::StagedKubernetesNetworkPolicy,
            PolicyKind::NetworkPolicy => Wire::NetworkPolicy,
            PolicyKind::AdminNetworkPolicy => Wire::AdminNetworkPolicy,
            PolicyKind::BaselineAdminNetworkPolicy => Wire::BaselineAdminNetworkPolicy,
            PolicyKind::Profile => Wire::Profile,
            PolicyKind::EndOfTier => Wire::EndOfTier,
        };
        wire as i32
    }
}

impl From<proto::PolicyHit> for PolicyHit {
    fn from(hit: proto::PolicyHit) -> Self {
        Self {
            kind: hit.kind.into(),
            namespace: hit.namespace,
            name: hit.name,
            tier: hit.tier,
            action: hit.action.into(),
            policy_index: hit.policy_index,
            rule_index: hit.rule_index,
            trigger: hit.trigger.map(|t| Box::new(PolicyHit::from(*t))),
        }
    }
}

impl From<PolicyHit> for proto::PolicyHit {
    fn from(hit: PolicyHit) -> Self {
        Self {
            kind: hit.kind.into(),
            namespace: hit.namespace,
            name: hit.name,
            tier: hit.tier,
            action: hit.action.into(),
            policy_index: hit.policy_index,
            rule_index: hit.rule_index,
            trigger: hit.trigger.map(|t| Box::new(proto::PolicyHit::from(*t))),
        }
    }
}

impl From<proto::PolicyTrace> for PolicyTrace {
    fn from(trace: proto::PolicyTrace) -> Self {
        Self {
            enforced: trace.enforced_policies.into_iter().map(Into::into).collect(),
            pending: trace.pending_policies.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<PolicyTrace> for proto::PolicyTrace {
    fn from(trace: PolicyTrace) -> Self {
        Self {
            enforced_policies: trace.enforced.into_iter().map(Into::into).collect(),
            pending_policies: trace.pending.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<proto::FlowKey> for FlowKey {
    /// Converts without validation; the policy trace is normalized
    fn from(key: proto::FlowKey) -> Self {
        Self {
            source_name: key.source_name,
            source_namespace: key.source_namespace,
            source_type: key.source_type.into(),
            dest_name: key.dest_name,
            dest_namespace: key.dest_namespace,
            dest_type: key.dest_type.into(),
            dest_port: key.dest_port,
            dest_service_name: key.dest_service_name,
            dest_service_namespace: key.dest_service_namespace,
            dest_service_port_name: key.dest_service_port_name,
            dest_service_port: key.dest_service_port,
            proto: key.proto,
            reporter: key.reporter.into(),
            action: key.action.into(),
            policies: key
                .policies
                .map(PolicyTrace::from)
                .unwrap_or_default()
                .normalize(),
        }
    }
}

impl From<FlowKey> for proto::FlowKey {
    fn from(key: FlowKey) -> Self {
        Self {
            source_name: key.source_name,
            source_namespace: key.source_namespace,
            source_type: key.source_type.into(),
            dest_name: key.dest_name,
            dest_namespace: key.dest_namespace,
            dest_type: key.dest_type.into(),
            dest_port: key.dest_port,
            dest_service_name: key.dest_service_name,
            dest_service_namespace: key.dest_service_namespace,
            dest_service_port_name: key.dest_service_port_name,
            dest_service_port: key.dest_service_port,
            proto: key.proto,
            reporter: key.reporter.into(),
            action: key.action.into(),
            policies: Some(key.policies.into()),
        }
    }
}

/// Convert and validate an ingested update
pub fn flow_from_update(update: proto::FlowUpdate) -> Result<Flow, FlowError> {
    let flow = update.flow.ok_or(FlowError::MalformedFlowKey("flow"))?;
    let key: FlowKey = flow.key.ok_or(FlowError::MalformedFlowKey("key"))?.into();
    key.validate()?;

    Ok(Flow {
        key,
        start_time: flow.start_time,
        end_time: flow.end_time,
        stats: FlowStats {
            packets_in: flow.packets_in,
            packets_out: flow.packets_out,
            bytes_in: flow.bytes_in,
            bytes_out: flow.bytes_out,
            num_connections_started: flow.num_connections_started,
            num_connections_completed: flow.num_connections_completed,
            num_connections_live: flow.num_connections_live,
        },
    })
}

/// Wrap a flow into an update message, as a node agent would send it
pub fn update_from_flow(flow: Flow) -> proto::FlowUpdate {
    proto::FlowUpdate {
        flow: Some(proto::Flow {
            key: Some(flow.key.into()),
            start_time: flow.start_time,
            end_time: flow.end_time,
            packets_in: flow.stats.packets_in,
            packets_out: flow.stats.packets_out,
            bytes_in: flow.stats.bytes_in,
            bytes_out: flow.stats.bytes_out,
            num_connections_started: flow.stats.num_connections_started,
            num_connections_completed: flow.stats.num_connections_completed,
            num_connections_live: flow.stats.num_connections_live,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_key() -> proto::FlowKey {
        proto::FlowKey {
            source_name: "web".to_string(),
            dest_name: "db".to_string(),
            dest_port: 5432,
            proto: "tcp".to_string(),
            source_type: proto::EndpointType::WorkloadEndpoint as i32,
            reporter: proto::Reporter::Dst as i32,
            action: proto::Action::Deny as i32,
            ..Default::default()
        }
    }

    #[test]
    fn test_flow_from_update() {
        let update = proto::FlowUpdate {
            flow: Some(proto::Flow {
                key: Some(wire_key()),
                start_time: 30,
                end_time: 45,
                packets_in: 4,
                bytes_in: 400,
                num_connections_live: 1,
                ..Default::default()
            }),
        };

        let flow = flow_from_update(update).unwrap();
        assert_eq!(flow.key.source_type, EndpointType::WorkloadEndpoint);
        assert_eq!(flow.key.reporter, Reporter::Dst);
        assert_eq!(flow.key.action, Action::Deny);
        assert_eq!(flow.start_time, 30);
        assert_eq!(flow.stats.bytes_in, 400);
        assert_eq!(flow.stats.num_connections_live, 1);
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        assert_eq!(
            flow_from_update(proto::FlowUpdate { flow: None }),
            Err(FlowError::MalformedFlowKey("flow"))
        );

        let mut key = wire_key();
        key.reporter = proto::Reporter::Unspecified as i32;
        let update = proto::FlowUpdate {
            flow: Some(proto::Flow {
                key: Some(key),
                ..Default::default()
            }),
        };
        assert_eq!(
            flow_from_update(update),
            Err(FlowError::MalformedFlowKey("reporter"))
        );
    }

    #[test]
    fn test_unknown_enum_values_become_unspecified() {
        assert_eq!(Action::from(42), Action::Unspecified);
        assert_eq!(PolicyKind::from(-1), PolicyKind::Unspecified);
    }

    #[test]
    fn test_policy_trace_normalized_on_ingest() {
        let mut key = wire_key();
        key.policies = Some(proto::PolicyTrace {
            enforced_policies: vec![proto::PolicyHit {
                kind: proto::PolicyKind::NetworkPolicy as i32,
                name: "deny-all".to_string(),
                tier: "default".to_string(),
                action: proto::Action::Deny as i32,
                trigger: Some(Box::new(proto::PolicyHit::default())),
                ..Default::default()
            }],
            pending_policies: vec![],
        });

        let converted = FlowKey::from(key);
        assert_eq!(converted.policies.enforced.len(), 1);
        assert!(converted.policies.enforced[0].trigger.is_none());
    }

    #[test]
    fn test_end_of_tier_trigger_survives_wire_conversion() {
        let hit = PolicyHit {
            kind: PolicyKind::EndOfTier,
            tier: "security".to_string(),
            action: Action::Deny,
            trigger: Some(Box::new(PolicyHit {
                kind: PolicyKind::CalicoNetworkPolicy,
                name: "ingress".to_string(),
                namespace: "backend".to_string(),
                tier: "security".to_string(),
                action: Action::Pass,
                ..Default::default()
            })),
            ..Default::default()
        };

        let wire: proto::PolicyHit = hit.clone().into();
        assert_eq!(PolicyHit::from(wire), hit);
    }
}
