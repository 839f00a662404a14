//! emupool control plane library.
//!
//! The control plane runs on the master host. It composes every emulator
//! host of the pool into one [`PoolManager`] and keeps the pool's images
//! fresh with a daily [`RefreshWorker`].
//!
//! ## Architecture
//!
//! ```text
//! PoolManager
//! ├── node 0: LocalNode  -> HostManager (in-process)
//! ├── node 1..N: RemoteNode -> node agent over HTTP
//! ├── BalancingStrategy (placement)
//! └── pull fan-out, image merge, cluster sync
//! RefreshWorker -> RefreshJob -> PoolManager
//! ```

pub mod balancing;
pub mod config;
pub mod node;
pub mod pool;
pub mod refresh;
pub mod sync;

pub use balancing::{BalancingStrategy, LeastLoaded};
pub use node::{Availability, LocalNode, Node, RemoteNode};
pub use pool::{LinkRewrite, NodeInfo, NodeRole, PoolInstanceMap, PoolManager};
pub use refresh::{DailySchedule, RefreshError, RefreshJob, RefreshReport, RefreshWorker};
pub use sync::SyncStatus;
