use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use tokio::sync::{Mutex, MutexGuard};

/// A fixed arena of locks indexed by key hash. Distinct keys may share a
/// shard, which only costs parallelism.
pub struct KeyMutex {
    shards: Vec<Mutex<()>>,
}

impl KeyMutex {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        self.shards[self.shard_of(key)].lock().await
    }

    fn shard_of(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);

        (hasher.finish() % self.shards.len() as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::KeyMutex;

    #[test]
    fn keys_map_to_stable_shards() {
        let mutex = KeyMutex::new(97);

        assert_eq!(mutex.shard_of("ext-net"), mutex.shard_of("ext-net"));
        assert!(mutex.shard_of("ext-net") < 97);
        assert_eq!(KeyMutex::new(0).shard_of("anything"), 0);
    }

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let mutex = Arc::new(KeyMutex::new(97));
        let guard = mutex.lock("ext-net").await;

        let contender = {
            let mutex = mutex.clone();
            tokio::spawn(async move {
                let _guard = mutex.lock("ext-net").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }
}
