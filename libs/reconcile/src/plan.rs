//! Cluster sync planning.

use std::collections::BTreeSet;

/// Images to delete from and pull to the pool so every peer matches the
/// reference node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Present on some peer but absent from the reference node.
    pub to_remove: Vec<String>,
    /// Present on the reference node but absent from some peer.
    pub to_pull: Vec<String>,
}

impl SyncPlan {
    /// Computes the plan from the reference node's image names and each
    /// peer's image names. Each name appears at most once per list, in the
    /// order it is first found.
    pub fn compute<R, P>(reference: R, peers: &[P]) -> Self
    where
        R: IntoIterator,
        R::Item: AsRef<str>,
        for<'a> &'a P: IntoIterator<Item = &'a String>,
    {
        let reference: BTreeSet<String> = reference
            .into_iter()
            .map(|name| name.as_ref().to_string())
            .collect();

        let mut plan = SyncPlan::default();
        let mut removing = BTreeSet::new();
        let mut pulling = BTreeSet::new();

        for peer in peers {
            let peer: BTreeSet<&String> = peer.into_iter().collect();

            for name in &peer {
                if !reference.contains(*name) && removing.insert((*name).clone()) {
                    plan.to_remove.push((*name).clone());
                }
            }
            for name in &reference {
                if !peer.contains(name) && pulling.insert(name.clone()) {
                    plan.to_pull.push(name.clone());
                }
            }
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_pull.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plan_against_reference() {
        let plan = SyncPlan::compute(["A", "B"], &[names(&["A", "C"])]);
        assert_eq!(plan.to_remove, vec!["C"]);
        assert_eq!(plan.to_pull, vec!["B"]);
    }

    #[test]
    fn test_plan_deduplicates_across_peers() {
        let plan = SyncPlan::compute(
            ["A"],
            &[names(&["B"]), names(&["B", "A"]), names(&[])],
        );
        assert_eq!(plan.to_remove, vec!["B"]);
        assert_eq!(plan.to_pull, vec!["A"]);
    }

    #[test]
    fn test_no_peers_no_work() {
        let plan = SyncPlan::compute(["A", "B"], &Vec::<Vec<String>>::new());
        assert!(plan.is_empty());
    }
}
