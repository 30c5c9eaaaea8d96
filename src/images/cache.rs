use crate::images::ImageRecord;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Run-scoped image records per image key. A key is stored at most once;
/// later inserts for the same key are ignored.
#[derive(Debug, Default)]
pub struct ImageCache {
    entries: RwLock<HashMap<String, Vec<ImageRecord>>>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, image_key: &str) -> Option<Vec<ImageRecord>> {
        self.entries.read().await.get(image_key).cloned()
    }

    /// Returns `false` when the key was already cached.
    pub async fn insert(&self, image_key: &str, records: Vec<ImageRecord>) -> bool {
        let mut guard = self.entries.write().await;
        if guard.contains_key(image_key) {
            return false;
        }
        guard.insert(image_key.to_string(), records);
        true
    }
}
