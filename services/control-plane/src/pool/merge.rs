//! Pool-wide image view.

use std::collections::BTreeSet;

use emupool_proto::{ImageLocation, ImageMap};

/// Merges per-node image views into the pool view.
///
/// An image is local in the pool view only if every node reports it local;
/// it then carries the digest reported by the first node. Every other name
/// any node reports, locally or as a registry entry, is `Remote`.
pub fn merge_image_views(views: &[ImageMap]) -> ImageMap {
    let Some((first, rest)) = views.split_first() else {
        return ImageMap::new();
    };

    let everywhere: BTreeSet<&str> = first
        .iter()
        .filter(|(name, location)| {
            location.is_local()
                && rest
                    .iter()
                    .all(|view| view.get(*name).is_some_and(ImageLocation::is_local))
        })
        .map(|(name, _)| name.as_str())
        .collect();

    let mut merged = ImageMap::new();
    for view in views {
        for name in view.keys() {
            if !everywhere.contains(name.as_str()) {
                merged.insert(name.clone(), ImageLocation::Remote);
            }
        }
    }
    for name in everywhere {
        merged.insert(name.to_string(), first[name].clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn view(entries: &[(&str, Option<&str>)]) -> ImageMap {
        entries
            .iter()
            .map(|(name, digest)| {
                let location = match digest {
                    Some(digest) => ImageLocation::local(*digest),
                    None => ImageLocation::Remote,
                };
                (name.to_string(), location)
            })
            .collect()
    }

    #[test]
    fn test_merge_keeps_only_pool_wide_locals() {
        let master = view(&[("a", Some("sha:a0")), ("b", Some("sha:b0")), ("r", None)]);
        let peer = view(&[("a", Some("sha:a1")), ("c", Some("sha:c1"))]);

        let merged = merge_image_views(&[master, peer]);

        assert_eq!(merged["a"], ImageLocation::local("sha:a0"));
        assert_eq!(merged["b"], ImageLocation::Remote);
        assert_eq!(merged["c"], ImageLocation::Remote);
        assert_eq!(merged["r"], ImageLocation::Remote);
        assert_eq!(merged.len(), 4);
    }

    #[test]
    fn test_merge_of_remote_everywhere_stays_remote() {
        let merged = merge_image_views(&[view(&[("r", None)]), view(&[("r", None)])]);
        assert_eq!(merged["r"], ImageLocation::Remote);
    }

    #[test]
    fn test_merge_single_node_is_identity() {
        let master = view(&[("a", Some("sha:a0")), ("r", None)]);
        assert_eq!(merge_image_views(std::slice::from_ref(&master)), master);
    }

    #[test]
    fn test_merge_of_nothing_is_empty() {
        assert!(merge_image_views(&[]).is_empty());
    }

    proptest! {
        #[test]
        fn prop_partial_presence_is_remote(
            presence in prop::collection::vec(prop::collection::vec(any::<bool>(), 4), 1..6)
        ) {
            let names = ["w", "x", "y", "z"];
            let views: Vec<ImageMap> = presence
                .iter()
                .map(|row| {
                    names
                        .iter()
                        .zip(row)
                        .filter(|(_, present)| **present)
                        .map(|(name, _)| (name.to_string(), ImageLocation::local("sha")))
                        .collect()
                })
                .collect();

            let merged = merge_image_views(&views);
            for (i, name) in names.iter().enumerate() {
                let holders = presence.iter().filter(|row| row[i]).count();
                match merged.get(*name) {
                    Some(location) => {
                        prop_assert!(holders > 0);
                        prop_assert_eq!(location.is_local(), holders == presence.len());
                    }
                    None => prop_assert_eq!(holders, 0),
                }
            }
        }
    }
}
