//! Placement of new instances.

use std::collections::BTreeMap;

use emupool_id::NodeIndex;
use rand::seq::IndexedRandom;
use rand::Rng;

/// Default cap on the instances a single node runs.
pub const DEFAULT_MAX_INSTANCES_PER_NODE: usize = 4;

/// Chooses the node of a new instance from the current load.
///
/// `load` maps each candidate node to its running instance count; nodes
/// absent from the map are not candidates.
pub trait BalancingStrategy: Send + Sync {
    fn select_node(&self, load: &BTreeMap<NodeIndex, usize>) -> Option<NodeIndex>;
}

/// Picks among the least loaded nodes, preferring peers over the master.
#[derive(Debug, Clone, Copy)]
pub struct LeastLoaded {
    max_instances_per_node: usize,
}

impl Default for LeastLoaded {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INSTANCES_PER_NODE)
    }
}

impl LeastLoaded {
    pub fn new(max_instances_per_node: usize) -> Self {
        Self {
            max_instances_per_node,
        }
    }

    pub fn max_instances_per_node(&self) -> usize {
        self.max_instances_per_node
    }

    /// Selection with an explicit random source.
    pub fn select_with<R: Rng + ?Sized>(
        &self,
        load: &BTreeMap<NodeIndex, usize>,
        rng: &mut R,
    ) -> Option<NodeIndex> {
        let min = *load.values().min()?;
        if min >= self.max_instances_per_node {
            return None;
        }

        let least: Vec<NodeIndex> = load
            .iter()
            .filter(|(_, count)| **count == min)
            .map(|(node, _)| *node)
            .collect();

        match least.as_slice() {
            [only] => Some(*only),
            _ => {
                let peers: Vec<NodeIndex> =
                    least.into_iter().filter(|node| !node.is_master()).collect();
                peers.choose(rng).copied()
            }
        }
    }
}

impl BalancingStrategy for LeastLoaded {
    fn select_node(&self, load: &BTreeMap<NodeIndex, usize>) -> Option<NodeIndex> {
        self.select_with(load, &mut rand::rng())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rstest::rstest;

    fn load(entries: &[(u32, usize)]) -> BTreeMap<NodeIndex, usize> {
        entries
            .iter()
            .map(|(node, count)| (NodeIndex::new(*node), *count))
            .collect()
    }

    #[rstest]
    #[case::master_alone_at_minimum(&[(0, 0), (1, 1)], Some(0))]
    #[case::single_peer_at_minimum(&[(0, 3), (1, 1), (2, 2)], Some(1))]
    #[case::only_master(&[(0, 2)], Some(0))]
    #[case::all_full(&[(0, 4), (1, 4)], None)]
    #[case::over_capacity(&[(0, 5)], None)]
    #[case::no_candidates(&[], None)]
    fn test_least_loaded_selection(
        #[case] entries: &[(u32, usize)],
        #[case] expected: Option<u32>,
    ) {
        let strategy = LeastLoaded::default();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            strategy.select_with(&load(entries), &mut rng),
            expected.map(NodeIndex::new)
        );
    }

    #[test]
    fn test_tie_never_picks_master() {
        let strategy = LeastLoaded::default();
        let load = load(&[(0, 1), (1, 1), (2, 1)]);
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let picked = strategy.select_with(&load, &mut rng).unwrap();
            assert!(!picked.is_master());
        }
    }

    #[test]
    fn test_tie_between_peers_spreads() {
        let strategy = LeastLoaded::default();
        let load = load(&[(0, 2), (1, 1), (2, 1)]);
        let mut seen = std::collections::BTreeSet::new();
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            seen.insert(strategy.select_with(&load, &mut rng).unwrap().value());
        }
        assert_eq!(seen, [1, 2].into_iter().collect());
    }

    #[test]
    fn test_custom_capacity() {
        let strategy = LeastLoaded::new(1);
        assert_eq!(strategy.select_node(&load(&[(0, 1), (1, 1)])), None);
        assert_eq!(
            strategy.select_node(&load(&[(0, 1), (1, 0)])),
            Some(NodeIndex::new(1))
        );
    }
}
