//! Capacity-bounded shard container (spec.md §4.2). Single-writer via an
//! internal `RwLock`, matching the teacher's `Arc<RwLock<...>>` idiom for
//! in-memory state that never suspends across `.await`.

use crate::error::{XmblError, XmblResult};
use crate::shard::Shard;
use std::collections::HashMap;
use std::sync::RwLock;

pub struct StorageNode {
    capacity: u64,
    used: RwLock<u64>,
    shards: RwLock<HashMap<String, Shard>>,
}

impl StorageNode {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            used: RwLock::new(0),
            shards: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn used(&self) -> u64 {
        *self.used.read().expect("storage node lock poisoned")
    }

    pub fn store_shard(&self, shard: Shard) -> XmblResult<String> {
        let id = shard.id();
        let incoming = shard.data.len() as u64;
        let mut used = self.used.write().expect("storage node lock poisoned");
        if *used + incoming > self.capacity {
            return Err(XmblError::CapacityExceeded {
                used: *used,
                incoming,
                capacity: self.capacity,
            });
        }
        let mut shards = self.shards.write().expect("storage node lock poisoned");
        if shards.insert(id.clone(), shard).is_none() {
            *used += incoming;
        }
        Ok(id)
    }

    pub fn get_shard(&self, id: &str) -> XmblResult<Shard> {
        self.shards
            .read()
            .expect("storage node lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| XmblError::NotFound(format!("shard {id}")))
    }

    pub fn delete_shard(&self, id: &str) -> XmblResult<()> {
        let mut shards = self.shards.write().expect("storage node lock poisoned");
        let removed = shards
            .remove(id)
            .ok_or_else(|| XmblError::NotFound(format!("shard {id}")))?;
        let mut used = self.used.write().expect("storage node lock poisoned");
        *used -= removed.data.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::encode;

    fn sample_shard(index: usize, is_parity: bool, len: usize) -> Shard {
        Shard {
            index,
            chunk_size: len,
            is_parity,
            original_length: len,
            data: vec![42u8; len],
        }
    }

    #[test]
    fn stores_and_retrieves_shard() {
        let node = StorageNode::new(1024);
        let shard = sample_shard(0, false, 16);
        let id = node.store_shard(shard.clone()).unwrap();
        let fetched = node.get_shard(&id).unwrap();
        assert_eq!(fetched.data, shard.data);
        assert_eq!(node.used(), 16);
    }

    #[test]
    fn rejects_when_capacity_exceeded() {
        let node = StorageNode::new(10);
        let shard = sample_shard(0, false, 16);
        let result = node.store_shard(shard);
        assert!(matches!(result, Err(XmblError::CapacityExceeded { .. })));
        assert_eq!(node.used(), 0);
    }

    #[test]
    fn delete_shard_frees_capacity() {
        let node = StorageNode::new(32);
        let shard = sample_shard(0, false, 16);
        let id = node.store_shard(shard).unwrap();
        node.delete_shard(&id).unwrap();
        assert_eq!(node.used(), 0);
        assert!(matches!(node.get_shard(&id), Err(XmblError::NotFound(_))));
    }

    #[test]
    fn shards_of_real_encode_output_fit_and_round_trip_ids() {
        let node = StorageNode::new(4096);
        let data = b"storage node smoke test payload".to_vec();
        let shards = encode(&data, 4, 2).unwrap();
        let mut ids = Vec::new();
        for shard in shards {
            ids.push(node.store_shard(shard).unwrap());
        }
        for id in ids {
            assert!(node.get_shard(&id).is_ok());
        }
    }
}
