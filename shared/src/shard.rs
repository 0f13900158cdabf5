//! Shard bookkeeping shared by both repository flavours.
//!
//! Every repository keeps an `active_shard_map` of the shards it knows
//! about plus an optional `active_shard`, which must always name an entry of
//! the map.

use crate::channel::DoId;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescriptor {
    pub do_id: DoId,
    pub name: String,
    pub available: bool,
}

impl ShardDescriptor {
    /// New shards start out unavailable until they finish starting up.
    pub fn new(do_id: DoId, name: impl Into<String>) -> Self {
        Self {
            do_id,
            name: name.into(),
            available: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShardDirectory {
    active_shard_map: HashMap<DoId, ShardDescriptor>,
    active_shard: Option<DoId>,
}

impl ShardDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the descriptor for `descriptor.do_id`.
    pub fn insert(&mut self, descriptor: ShardDescriptor) {
        self.active_shard_map.insert(descriptor.do_id, descriptor);
    }

    /// Applies `update` to a known shard. Returns false for unknown ids.
    pub fn update<F>(&mut self, do_id: DoId, update: F) -> bool
    where
        F: FnOnce(&mut ShardDescriptor),
    {
        match self.active_shard_map.get_mut(&do_id) {
            Some(descriptor) => {
                update(descriptor);
                true
            }
            None => false,
        }
    }

    /// Removes a shard, clearing `active_shard` if it pointed at it.
    pub fn remove(&mut self, do_id: DoId) -> Option<ShardDescriptor> {
        let removed = self.active_shard_map.remove(&do_id)?;
        if self.active_shard == Some(do_id) {
            self.active_shard = None;
        }
        Some(removed)
    }

    /// Marks a known shard as the active one. Unknown ids are refused.
    pub fn select(&mut self, do_id: DoId) -> bool {
        if self.active_shard_map.contains_key(&do_id) {
            self.active_shard = Some(do_id);
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.active_shard_map.clear();
        self.active_shard = None;
    }

    pub fn get(&self, do_id: DoId) -> Option<&ShardDescriptor> {
        self.active_shard_map.get(&do_id)
    }

    pub fn active_shard(&self) -> Option<&ShardDescriptor> {
        self.active_shard
            .and_then(|do_id| self.active_shard_map.get(&do_id))
    }

    pub fn active_shard_id(&self) -> Option<DoId> {
        self.active_shard
    }

    pub fn len(&self) -> usize {
        self.active_shard_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active_shard_map.is_empty()
    }

    /// Descriptors sorted by `do_id`.
    pub fn shards(&self) -> Vec<&ShardDescriptor> {
        let mut shards: Vec<_> = self.active_shard_map.values().collect();
        shards.sort_by_key(|descriptor| descriptor.do_id);
        shards
    }

    pub fn has_available_shards(&self) -> bool {
        self.active_shard_map
            .values()
            .any(|descriptor| descriptor.available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_available_shards_truth_table() {
        let mut directory = ShardDirectory::new();
        assert!(!directory.has_available_shards());

        directory.insert(ShardDescriptor::new(77, "Hacker Valley"));
        assert!(!directory.has_available_shards());

        directory.insert(ShardDescriptor::new(78, "Byte Beach"));
        directory.update(78, |shard| shard.available = true);
        assert!(directory.has_available_shards());

        directory.update(78, |shard| shard.available = false);
        assert!(!directory.has_available_shards());
    }

    #[test]
    fn test_update_unknown_shard() {
        let mut directory = ShardDirectory::new();
        assert!(!directory.update(5, |shard| shard.available = true));
        assert!(directory.is_empty());
    }

    #[test]
    fn test_active_shard_follows_removal() {
        let mut directory = ShardDirectory::new();
        assert!(!directory.select(77));

        directory.insert(ShardDescriptor::new(77, "Hacker Valley"));
        assert!(directory.select(77));
        assert_eq!(directory.active_shard().unwrap().name, "Hacker Valley");

        let removed = directory.remove(77).unwrap();
        assert_eq!(removed.do_id, 77);
        assert_eq!(directory.active_shard_id(), None);
        assert!(directory.remove(77).is_none());
    }

    #[test]
    fn test_removing_other_shard_keeps_active() {
        let mut directory = ShardDirectory::new();
        directory.insert(ShardDescriptor::new(1, "a"));
        directory.insert(ShardDescriptor::new(2, "b"));
        directory.select(1);

        directory.remove(2);
        assert_eq!(directory.active_shard_id(), Some(1));
        assert_eq!(directory.shards().len(), 1);
    }
}
