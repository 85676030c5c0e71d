use crate::children::ChildKind;

/// Next-tier work unlocked by a dependency reporting Ready.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateAction {
    EnsureClusterAdmin,
    CreateWorkload,
}

/// Actions for a dependency of `kind` that just reported Ready.
pub fn gate_actions(kind: ChildKind, has_workload: bool) -> Vec<GateAction> {
    match kind {
        ChildKind::ContainerCluster => vec![GateAction::EnsureClusterAdmin],
        ChildKind::ContainerNodePool if has_workload => {
            vec![GateAction::CreateWorkload]
        }
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cluster_and_node_pool_open_gates() {
        assert_eq!(
            gate_actions(ChildKind::ContainerCluster, false),
            vec![GateAction::EnsureClusterAdmin]
        );
        assert_eq!(
            gate_actions(ChildKind::ContainerNodePool, true),
            vec![GateAction::CreateWorkload]
        );
        assert!(gate_actions(ChildKind::ContainerNodePool, false).is_empty());
        for kind in [
            ChildKind::ComputeNetwork,
            ChildKind::ComputeSubnetwork,
            ChildKind::IAMPolicyMember,
        ] {
            assert!(gate_actions(kind, true).is_empty());
        }
    }
}
