use bytes::Bytes;
use ferry_core::SourceUri;
use ferry_storage::traits::{BlobProperties, RemoteCopyStore};
use std::path::Path;
use tokio::time::Duration;

/// Generate deterministic test data using a seeded pseudo-random generator
/// Same seed produces same output (reproducible tests)
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Write `data` to `dir/name` and return its `file://` source URI.
#[allow(dead_code)]
pub fn file_source(dir: &Path, name: &str, data: &[u8]) -> SourceUri {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    SourceUri::parse(&format!("file://{}", path.display())).unwrap()
}

/// Poll copy properties until the copy leaves the pending state.
#[allow(dead_code)]
pub async fn wait_for_terminal(store: &dyn RemoteCopyStore, key: &str) -> BlobProperties {
    for _ in 0..1000 {
        let props = store.properties(key).await.unwrap();
        if props.copy_status.is_terminal() {
            return props;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("copy into {key} never completed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        let data1 = seeded_bytes(42, 1000);
        let data2 = seeded_bytes(42, 1000);
        assert_eq!(data1, data2);
    }

    #[test]
    fn test_seeded_bytes_different_seeds() {
        let data1 = seeded_bytes(42, 1000);
        let data2 = seeded_bytes(43, 1000);
        assert_ne!(data1, data2);
    }
}
