//! # emupool-id
//!
//! Identifier types for the emupool fleet.
//!
//! ## Addressing
//!
//! Every node in a pool has a stable [`NodeIndex`]; index 0 is always the
//! master (the node co-located with the pool manager). Each node numbers its
//! own instances with a [`LocalInstanceId`]. The pool exposes a single
//! address space of [`PoolInstanceId`] values:
//!
//! ```text
//! pool_id = node_index * INSTANCE_INDEX_BASE + local_id
//! ```
//!
//! `INSTANCE_INDEX_BASE` is larger than any realistic per-node instance
//! count, so decoding is the plain division/modulo pair.
//!
//! Examples:
//! - node 0, local 3  -> `3`
//! - node 2, local 0  -> `200`
//! - node 12, local 7 -> `1207`

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
