//! Keyed resource pool with single-flight creation and TTL eviction.
//!
//! Used to share expensive clients (connections, senders) between jobs
//! that target the same endpoint.

pub mod error;
pub mod pool;

pub use error::{BoxError, PoolError, PoolResult};
pub use pool::{DEFAULT_TTL, KeyedResourcePool, PoolBuilder, PoolKey, PoolResource};
