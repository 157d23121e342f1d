use common::domain::{DataType, ThingId};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaKey {
    pub thing_id: ThingId,
    pub feature_id: String,
    pub property: String,
}

impl SchemaKey {
    pub fn new(thing_id: ThingId, feature_id: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            thing_id,
            feature_id: feature_id.into(),
            property: property.into(),
        }
    }
}

/// Declared property types, resolved once per key and never invalidated.
#[derive(Default)]
pub struct SchemaCache {
    entries: RwLock<HashMap<SchemaKey, DataType>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &SchemaKey) -> Option<DataType> {
        self.entries.read().await.get(key).copied()
    }

    /// Store `data_type` unless the key is already known, and return the
    /// value that is now cached. The first writer wins.
    pub async fn insert_if_absent(&self, key: SchemaKey, data_type: DataType) -> DataType {
        *self.entries.write().await.entry(key).or_insert(data_type)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(property: &str) -> SchemaKey {
        SchemaKey::new("test:test".parse().unwrap(), "feature1", property)
    }

    #[tokio::test]
    async fn test_first_insert_wins() {
        let cache = SchemaCache::new();
        assert_eq!(cache.get(&key("myValue")).await, None);

        let stored = cache.insert_if_absent(key("myValue"), DataType::Integer).await;
        assert_eq!(stored, DataType::Integer);

        let stored = cache.insert_if_absent(key("myValue"), DataType::String).await;
        assert_eq!(stored, DataType::Integer);
        assert_eq!(cache.get(&key("myValue")).await, Some(DataType::Integer));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_agree() {
        let cache = Arc::new(SchemaCache::new());
        let candidates = [
            DataType::Integer,
            DataType::String,
            DataType::Boolean,
            DataType::Number,
        ];

        let handles: Vec<_> = candidates
            .into_iter()
            .map(|data_type| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.insert_if_absent(key("x"), data_type).await })
            })
            .collect();

        let mut observed = Vec::new();
        for handle in handles {
            observed.push(handle.await.unwrap());
        }

        assert!(observed.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.get(&key("x")).await, Some(observed[0]));
    }

    #[tokio::test]
    async fn test_keys_are_per_property() {
        let cache = SchemaCache::new();
        cache.insert_if_absent(key("a"), DataType::Integer).await;
        cache.insert_if_absent(key("b"), DataType::Boolean).await;

        assert_eq!(cache.get(&key("a")).await, Some(DataType::Integer));
        assert_eq!(cache.get(&key("b")).await, Some(DataType::Boolean));
    }
}
