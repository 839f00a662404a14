//! Identifier definitions for nodes and instances.

use crate::define_index;
use crate::IdError;

/// Base of the pool-wide instance encoding.
///
/// Must stay larger than any per-node instance count; hosts never allocate a
/// local id at or above this value.
pub const INSTANCE_INDEX_BASE: u32 = 100;

// =============================================================================
// Nodes
// =============================================================================

define_index!(
    /// Position of a node within its pool.
    NodeIndex
);

impl NodeIndex {
    /// The master node, co-located with the pool manager.
    pub const MASTER: Self = Self::new(0);

    /// Returns true for the master node.
    #[must_use]
    pub const fn is_master(&self) -> bool {
        self.value() == 0
    }

    /// Returns the index as a `usize` for slice addressing.
    #[must_use]
    pub const fn as_usize(&self) -> usize {
        self.value() as usize
    }
}

// =============================================================================
// Instances
// =============================================================================

define_index!(
    /// Instance number assigned by a single host.
    LocalInstanceId
);

define_index!(
    /// Pool-wide instance address (`node * BASE + local`).
    PoolInstanceId
);

impl PoolInstanceId {
    /// Encodes a (node, local id) pair into a pool-wide id.
    pub fn encode(node: NodeIndex, local: LocalInstanceId) -> Result<Self, IdError> {
        if local.value() >= INSTANCE_INDEX_BASE {
            return Err(IdError::LocalIdOutOfRange {
                id: local.value(),
                base: INSTANCE_INDEX_BASE,
            });
        }

        node.value()
            .checked_mul(INSTANCE_INDEX_BASE)
            .and_then(|base| base.checked_add(local.value()))
            .map(Self::new)
            .ok_or(IdError::Overflow {
                node: node.value(),
                local: local.value(),
            })
    }

    /// Splits a pool-wide id back into its (node, local id) pair.
    #[must_use]
    pub const fn decode(&self) -> (NodeIndex, LocalInstanceId) {
        (
            NodeIndex::new(self.value() / INSTANCE_INDEX_BASE),
            LocalInstanceId::new(self.value() % INSTANCE_INDEX_BASE),
        )
    }

    /// Returns the node that owns this instance.
    #[must_use]
    pub const fn node(&self) -> NodeIndex {
        self.decode().0
    }
}

// =============================================================================
// Tests
// =============================================================================
