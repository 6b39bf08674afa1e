pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{CountingFactory, EvictionLog, TestClient};
