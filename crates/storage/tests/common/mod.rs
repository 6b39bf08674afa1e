pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{file_source, seeded_bytes, wait_for_terminal};
