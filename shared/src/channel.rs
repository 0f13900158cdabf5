//! Channel addressing and channel/object-id allocation
//!
//! Every object and connection on the message bus is addressed by a 64-bit
//! channel. Client sender channels pack two 32-bit identifiers: the account
//! in the high half and the character in the low half.

use crate::error::AllocatorError;
use std::collections::HashSet;

/// Address on the message bus.
pub type ChannelId = u64;
/// Identity of a distributed object. Objects are also subscribed on the
/// channel with the same numeric value.
pub type DoId = u32;
/// Coarse interest grouping. Zero means "none".
pub type ZoneId = u32;

/// Packs an account and character id into a client sender channel.
pub fn sender_channel(account_id: u32, character_id: u32) -> ChannelId {
    ((account_id as ChannelId) << 32) | character_id as ChannelId
}

/// Extracts the account id (high 32 bits) from a sender channel.
pub fn account_id_from_sender(sender: ChannelId) -> u32 {
    ((sender >> 32) & 0xFFFF_FFFF) as u32
}

/// Extracts the character id (low 32 bits) from a sender channel.
pub fn character_id_from_sender(sender: ChannelId) -> u32 {
    (sender & 0xFFFF_FFFF) as u32
}

/// Size of the id range owned by one internal server process.
pub const CHANNELS_PER_SERVER: ChannelId = 1_000_000;

/// Hands out unique channel ids from a fixed inclusive range
///
/// Ids are issued in ascending order until the range is consumed, after
/// which freed ids are recycled. An id is never issued twice while it is
/// still live.
#[derive(Debug)]
pub struct ChannelAllocator {
    min: ChannelId,
    max: ChannelId,
    /// Next never-issued id, `None` once the range has been walked.
    next: Option<ChannelId>,
    free: Vec<ChannelId>,
    live: HashSet<ChannelId>,
}

impl ChannelAllocator {
    pub fn new(min: ChannelId, max: ChannelId) -> Result<Self, AllocatorError> {
        if min > max {
            return Err(AllocatorError::EmptyRange { min, max });
        }

        Ok(Self {
            min,
            max,
            next: Some(min),
            free: Vec::new(),
            live: HashSet::new(),
        })
    }

    /// Allocator over the channels owned by a server, starting at its base
    /// channel. The first id issued is the base channel itself.
    pub fn for_base_channel(base_channel: ChannelId) -> Result<Self, AllocatorError> {
        Self::new(
            base_channel,
            base_channel.saturating_add(CHANNELS_PER_SERVER - 1),
        )
    }

    pub fn allocate(&mut self) -> Result<ChannelId, AllocatorError> {
        if let Some(id) = self.next {
            self.next = id.checked_add(1).filter(|n| *n <= self.max);
            self.live.insert(id);
            return Ok(id);
        }

        match self.free.pop() {
            Some(id) => {
                self.live.insert(id);
                Ok(id)
            }
            None => Err(AllocatorError::Exhausted {
                min: self.min,
                max: self.max,
            }),
        }
    }

    pub fn free(&mut self, id: ChannelId) -> Result<(), AllocatorError> {
        if id < self.min || id > self.max {
            return Err(AllocatorError::OutOfRange(id));
        }
        if !self.live.remove(&id) {
            return Err(AllocatorError::NotAllocated(id));
        }

        self.free.push(id);
        Ok(())
    }

    pub fn is_live(&self, id: ChannelId) -> bool {
        self.live.contains(&id)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn range(&self) -> (ChannelId, ChannelId) {
        (self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_channel_round_trip() {
        let cases = [(0, 0), (1, 2), (u32::MAX, 0), (0, u32::MAX), (u32::MAX, u32::MAX)];

        for (account, character) in cases {
            let sender = sender_channel(account, character);
            assert_eq!(account_id_from_sender(sender), account);
            assert_eq!(character_id_from_sender(sender), character);
        }
    }

    #[test]
    fn test_sender_channel_layout() {
        let sender = (7u64 << 32) | 42;
        assert_eq!(account_id_from_sender(sender), 7);
        assert_eq!(character_id_from_sender(sender), 42);
    }

    #[test]
    fn test_allocate_unique_ids() {
        let mut allocator = ChannelAllocator::new(10, 19).unwrap();
        let mut seen = HashSet::new();

        for _ in 0..10 {
            let id = allocator.allocate().unwrap();
            assert!((10..=19).contains(&id));
            assert!(seen.insert(id), "id {} issued twice", id);
        }

        assert_eq!(allocator.live_count(), 10);
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let mut allocator = ChannelAllocator::new(5, 6).unwrap();
        allocator.allocate().unwrap();
        allocator.allocate().unwrap();

        assert_eq!(
            allocator.allocate(),
            Err(AllocatorError::Exhausted { min: 5, max: 6 })
        );
    }

    #[test]
    fn test_freed_id_can_be_reused() {
        let mut allocator = ChannelAllocator::new(1, 2).unwrap();
        let first = allocator.allocate().unwrap();
        let second = allocator.allocate().unwrap();

        allocator.free(first).unwrap();
        assert!(!allocator.is_live(first));

        let reused = allocator.allocate().unwrap();
        assert_eq!(reused, first);
        assert_ne!(reused, second);
    }

    #[test]
    fn test_live_ids_are_never_reissued() {
        let mut allocator = ChannelAllocator::new(0, 3).unwrap();
        let ids: Vec<_> = (0..4).map(|_| allocator.allocate().unwrap()).collect();

        allocator.free(ids[1]).unwrap();
        allocator.free(ids[3]).unwrap();

        let a = allocator.allocate().unwrap();
        let b = allocator.allocate().unwrap();
        assert_ne!(a, b);
        for id in [a, b] {
            assert!(id == ids[1] || id == ids[3]);
        }
        assert!(allocator.allocate().is_err());
    }

    #[test]
    fn test_free_errors() {
        let mut allocator = ChannelAllocator::new(100, 199).unwrap();
        assert_eq!(allocator.free(5), Err(AllocatorError::OutOfRange(5)));
        assert_eq!(allocator.free(150), Err(AllocatorError::NotAllocated(150)));

        let id = allocator.allocate().unwrap();
        allocator.free(id).unwrap();
        assert_eq!(allocator.free(id), Err(AllocatorError::NotAllocated(id)));
    }

    #[test]
    fn test_full_64_bit_range() {
        let mut allocator = ChannelAllocator::new(u64::MAX - 1, u64::MAX).unwrap();
        assert_eq!(allocator.allocate().unwrap(), u64::MAX - 1);
        assert_eq!(allocator.allocate().unwrap(), u64::MAX);
        assert!(allocator.allocate().is_err());
    }

    #[test]
    fn test_empty_range_rejected() {
        assert!(ChannelAllocator::new(10, 9).is_err());
    }

    #[test]
    fn test_base_channel_range() {
        let mut allocator = ChannelAllocator::for_base_channel(300001).unwrap();
        assert_eq!(allocator.range(), (300001, 1300000));
        assert_eq!(allocator.allocate().unwrap(), 300001);
        assert_eq!(allocator.allocate().unwrap(), 300002);
    }
}
