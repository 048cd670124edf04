//! Worker slot → (network, roles) assignment

use crate::settings::CoordinatorConfig;
use protocol::{NetworkDescriptor, Roles, WorkerId};

/// What a worker slot runs. Identical for every process that fills the slot.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerAssignment {
    pub id: WorkerId,
    pub network: NetworkDescriptor,
    pub roles: Roles,
}

/// Round-robin networks over slots. Slots come in rounds of one per network;
/// the first round of every `observer_stride` rounds observes, so each
/// network gets its own observer as soon as every network has a worker.
///
/// Returns `None` only when no networks are configured.
pub fn assign(id: WorkerId, config: &CoordinatorConfig) -> Option<WorkerAssignment> {
    if config.networks.is_empty() {
        return None;
    }

    let slot = id.0.saturating_sub(1) as usize;
    let networks = config.networks.len();
    let network = config.networks[slot % networks].clone();

    let round = slot / networks;
    let stride = config.supervisor.observer_stride.max(1) as usize;
    let roles = if round % stride == 0 {
        if config.supervisor.observers_execute {
            Roles::BOTH
        } else {
            Roles::OBSERVER
        }
    } else {
        Roles::EXECUTOR
    };

    Some(WorkerAssignment { id, network, roles })
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::ChainId;

    #[test]
    fn test_round_robin_networks_and_observer_stride() {
        let config = CoordinatorConfig::with_default_networks();

        let ids: Vec<_> = (1..=10)
            .map(|i| assign(WorkerId(i), &config).unwrap())
            .collect();

        let chains: Vec<u64> = ids.iter().map(|a| a.network.chain_id.0).collect();
        assert_eq!(chains, vec![8453, 1, 8453, 1, 8453, 1, 8453, 1, 8453, 1]);

        let observers: Vec<u32> = ids
            .iter()
            .filter(|a| a.roles.observer)
            .map(|a| a.id.0)
            .collect();
        assert_eq!(observers, vec![1, 2, 9, 10]);
        assert!(ids.iter().filter(|a| a.roles.observer).all(|a| !a.roles.executor));
    }

    #[test]
    fn test_every_network_gets_an_observer() {
        let mut config = CoordinatorConfig::with_default_networks();
        let mut third = config.networks[0].clone();
        third.name = "OP_MAINNET".to_string();
        third.chain_id = ChainId(10);
        config.networks.push(third);

        for stride in 1..=5u32 {
            config.supervisor.observer_stride = stride;
            let window = config.networks.len() as u32 * stride;
            let assignments: Vec<_> = (1..=window)
                .map(|i| assign(WorkerId(i), &config).unwrap())
                .collect();

            for network in &config.networks {
                let observers = assignments
                    .iter()
                    .filter(|a| a.network.chain_id == network.chain_id && a.roles.observer)
                    .count();
                assert_eq!(observers, 1, "{} with stride {}", network.name, stride);
            }
        }
    }

    #[test]
    fn test_observers_may_execute() {
        let mut config = CoordinatorConfig::with_default_networks();
        config.supervisor.observers_execute = true;
        let a = assign(WorkerId(2), &config).unwrap();
        assert_eq!(a.roles, Roles::BOTH);
        assert_eq!(a.network.chain_id, ChainId(1));
        assert_eq!(assign(WorkerId(4), &config).unwrap().roles, Roles::EXECUTOR);
    }

    #[test]
    fn test_no_networks_no_assignment() {
        let config = CoordinatorConfig::default();
        assert!(assign(WorkerId(1), &config).is_none());
    }
}
