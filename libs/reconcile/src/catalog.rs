//! Image categories and youngest-image selection.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use emupool_proto::ImageMap;
use regex::Regex;
use tracing::debug;

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{8}").expect("date pattern is valid"));

static DATED_BUILD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{8}_\d+").expect("dated build pattern is valid"));

/// Default image families.
pub const DEFAULT_PATTERNS: [&str; 2] = ["cloud_android", "cloud_cluster"];

/// Default build-type tokens.
pub const DEFAULT_BUILD_TYPES: [&str; 3] = ["REL", "DB", "PREINT"];

/// Platform version inside a family. `None` is the group of names that
/// carry the family prefix but no parsable version.
type Version = Option<u64>;

/// Known image families and build types.
///
/// A category is `(pattern, version, build type)`; a name may fall into
/// more than one build type when several tokens occur in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCatalog {
    patterns: Vec<String>,
    build_types: Vec<String>,
}

impl Default for ImageCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERNS, DEFAULT_BUILD_TYPES)
    }
}

impl ImageCatalog {
    pub fn new<P, B>(patterns: P, build_types: B) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        B: IntoIterator,
        B::Item: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            build_types: build_types.into_iter().map(Into::into).collect(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn build_types(&self) -> &[String] {
        &self.build_types
    }

    /// First family whose pattern occurs in the image name.
    pub fn pattern_for(&self, image: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|pattern| image.contains(pattern.as_str()))
            .map(String::as_str)
    }

    /// Returns up to `per_category` youngest names for every category.
    ///
    /// Output order is deterministic: families in catalog order, versions
    /// ascending with the unversioned group last, build types in catalog
    /// order, youngest first within a category. A name is listed once.
    pub fn youngest<'a, I>(&self, names: I, per_category: usize) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: BTreeSet<&str> = names.into_iter().collect();
        let mut chosen: Vec<String> = Vec::new();
        let mut seen: BTreeSet<&str> = BTreeSet::new();

        for pattern in &self.patterns {
            for (version, group) in group_by_version(pattern, &names) {
                for build_type in &self.build_types {
                    let needle = build_type.to_lowercase();
                    let mut candidates: Vec<&str> = group
                        .iter()
                        .copied()
                        .filter(|name| name.to_lowercase().contains(&needle))
                        .collect();

                    for _ in 0..per_category {
                        let Some(pos) = pick_youngest(&candidates) else {
                            break;
                        };
                        let name = candidates.remove(pos);
                        debug!(%pattern, ?version, %build_type, image = name, "youngest image");
                        if seen.insert(name) {
                            chosen.push(name.to_string());
                        }
                    }
                }
            }
        }

        chosen
    }

    /// Keeps every local entry and only the `per_category` youngest remote
    /// entries of each category.
    pub fn filter_remote_by_youngest(&self, images: &ImageMap, per_category: usize) -> ImageMap {
        let remote = images
            .iter()
            .filter(|(_, location)| location.is_remote())
            .map(|(name, _)| name.as_str());
        let keep: BTreeSet<String> = self.youngest(remote, per_category).into_iter().collect();

        images
            .iter()
            .filter(|(name, location)| location.is_local() || keep.contains(name.as_str()))
            .map(|(name, location)| (name.clone(), location.clone()))
            .collect()
    }
}

/// Splits the names of one family into version groups.
fn group_by_version<'a>(
    pattern: &str,
    names: &BTreeSet<&'a str>,
) -> BTreeMap<SortVersion, Vec<&'a str>> {
    let prefix = format!("{pattern}_");
    let mut groups: BTreeMap<SortVersion, Vec<&'a str>> = BTreeMap::new();
    for name in names.iter().copied().filter(|name| name.contains(&prefix)) {
        let version = parse_version(name, &prefix);
        groups.entry(SortVersion(version)).or_default().push(name);
    }
    groups
}

/// Orders versioned groups ascending and the unversioned group last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SortVersion(Version);

impl PartialOrd for SortVersion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortVersion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self.0, other.0) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
    }
}

/// Numeric token right after the first `<pattern>_` occurrence that has one.
fn parse_version(name: &str, prefix: &str) -> Version {
    name.match_indices(prefix).find_map(|(idx, _)| {
        let digits: String = name[idx + prefix.len()..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    })
}

/// First 8-digit token, read as an integer.
pub fn image_date(name: &str) -> Option<u64> {
    DATE_RE.find(name).and_then(|m| m.as_str().parse().ok())
}

/// Trailing `_N` suffix of the name.
pub fn build_suffix(name: &str) -> Option<u64> {
    name.rsplit('_').next().and_then(|last| last.parse().ok())
}

/// Index of the youngest dated candidate.
///
/// Ties on the date go to the largest trailing suffix; remaining ties go to
/// the first candidate in name order.
fn pick_youngest(candidates: &[&str]) -> Option<usize> {
    let max_date = candidates.iter().filter_map(|name| image_date(name)).max()?;
    let mut best: Option<(usize, Option<u64>)> = None;
    for (idx, name) in candidates.iter().enumerate() {
        if image_date(name) != Some(max_date) {
            continue;
        }
        let suffix = build_suffix(name);
        match best {
            Some((_, best_suffix)) if suffix <= best_suffix => {}
            _ => best = Some((idx, suffix)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Name prefix shared by builds of the same date bucket.
///
/// For `cloud_android_12_rel_20230102_3` this is `cloud_android_12_rel_`.
/// Returns `None` when the name has no `<date>_<n>` token or it starts the
/// name.
pub fn supersede_prefix(image: &str) -> Option<&str> {
    let start = DATED_BUILD_RE.find(image)?.start();
    (start > 0).then(|| &image[..start])
}
