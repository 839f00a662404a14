//! Image-set convergence helpers.
//!
//! Everything here is pure: callers gather image names from nodes, these
//! helpers decide what the pool should converge to.
//!
//! - [`ImageCatalog::youngest`] picks the newest builds per category.
//! - [`SyncPlan`] diffs peers against a reference node.
//! - [`supersede_prefix`] names the date bucket a new build replaces.

mod catalog;
mod plan;

pub use catalog::{
    build_suffix, image_date, supersede_prefix, ImageCatalog, DEFAULT_BUILD_TYPES,
    DEFAULT_PATTERNS,
};
pub use plan::SyncPlan;

/// Pull attempts the refresh job makes per missing image.
pub const DEFAULT_MAX_PULL_ATTEMPTS: u32 = 3;
