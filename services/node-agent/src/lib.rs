//! emupool Node Agent Library
//!
//! The node agent runs on every emulator host of a pool. It owns the
//! host's container runtime and exposes it over a small HTTP control
//! surface consumed by the pool manager on the master host.
//!
//! ## Architecture
//!
//! ```text
//! api (axum router)
//! ├── HostManager   (id allocation, launch preconditions, pull termination)
//! │   └── ContainerRuntime (mock in dev)
//! └── ProgressHub   (per-image push channel for pulls)
//! ```
//!
//! The master host embeds a [`HostManager`] directly instead of going
//! through HTTP.

pub mod api;
pub mod config;
pub mod host;
pub mod hub;
pub mod runtime;

// Re-export commonly used types
pub use api::{router, AgentState};
pub use host::HostManager;
pub use runtime::{ContainerRuntime, LaunchSpec, MockRuntime, ProgressStream, RuntimeError};
