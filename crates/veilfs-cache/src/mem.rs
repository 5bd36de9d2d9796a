use std::collections::HashMap;
use std::sync::Mutex;

use tracing::trace;
use veilfs_block::{Block, BlockPointer, TlfId};

use crate::cache::{BlockCache, CacheError, CacheLifetime, CacheResult};

struct CachedBlock {
    block: Block,
    has_prefetched: bool,
    tlf: TlfId,
}

struct TransientBlock {
    cached: CachedBlock,
    /// Logical clock value of the last touch, for LRU eviction.
    last_used: u64,
}

struct MemCacheInner {
    transient: HashMap<BlockPointer, TransientBlock>,
    permanent: HashMap<BlockPointer, CachedBlock>,
    clock: u64,
}

impl MemCacheInner {
    fn touch(&mut self, ptr: &BlockPointer) {
        self.clock += 1;
        let clock = self.clock;
        if let Some(entry) = self.transient.get_mut(ptr) {
            entry.last_used = clock;
        }
    }

    /// Evict the least-recently-used transient entry. Linear scan: transient
    /// capacities are small and eviction is off the read path.
    fn evict_one(&mut self) {
        let victim = self
            .transient
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(ptr, _)| *ptr);
        if let Some(ptr) = victim {
            trace!(%ptr, "evicting transient block");
            self.transient.remove(&ptr);
        }
    }
}

/// In-memory [`BlockCache`]: transient entries live in an LRU bounded by
/// entry count, permanent entries in an unbounded side map.
pub struct MemBlockCache {
    inner: Mutex<MemCacheInner>,
    transient_capacity: usize,
}

impl MemBlockCache {
    pub fn new(transient_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(MemCacheInner {
                transient: HashMap::new(),
                permanent: HashMap::new(),
                clock: 0,
            }),
            transient_capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemCacheInner> {
        self.inner.lock().expect("block cache mutex poisoned")
    }
}

impl BlockCache for MemBlockCache {
    fn get(&self, ptr: &BlockPointer) -> CacheResult<Block> {
        self.get_with_prefetch(ptr).map(|(block, _, _)| block)
    }

    fn get_with_prefetch(&self, ptr: &BlockPointer) -> CacheResult<(Block, bool, CacheLifetime)> {
        let mut inner = self.lock();
        if let Some(cached) = inner.permanent.get(ptr) {
            return Ok((
                cached.block.clone(),
                cached.has_prefetched,
                CacheLifetime::Permanent,
            ));
        }
        inner.touch(ptr);
        match inner.transient.get(ptr) {
            Some(entry) => Ok((
                entry.cached.block.clone(),
                entry.cached.has_prefetched,
                CacheLifetime::Transient,
            )),
            None => Err(CacheError::NoSuchBlock(ptr.id)),
        }
    }

    fn put_with_prefetch(
        &self,
        ptr: BlockPointer,
        tlf: TlfId,
        block: Block,
        lifetime: CacheLifetime,
        has_prefetched: bool,
    ) -> CacheResult<()> {
        let mut inner = self.lock();
        let cached = CachedBlock {
            block,
            has_prefetched,
            tlf,
        };
        match lifetime {
            CacheLifetime::Permanent => {
                inner.transient.remove(&ptr);
                inner.permanent.insert(ptr, cached);
            }
            CacheLifetime::Transient => {
                inner.clock += 1;
                let last_used = inner.clock;
                inner.transient.insert(ptr, TransientBlock { cached, last_used });
                while inner.transient.len() > self.transient_capacity {
                    inner.evict_one();
                }
            }
        }
        Ok(())
    }

    fn delete_transient(&self, ptr: &BlockPointer, _tlf: TlfId) -> CacheResult<()> {
        self.lock().transient.remove(ptr);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use veilfs_block::{BlockId, DataVer, FileBlock, KeyGen};

    use super::*;

    fn ptr(byte: u8) -> BlockPointer {
        let mut bytes = [0u8; BlockId::LEN];
        bytes[0] = byte;
        BlockPointer::new(BlockId::from_bytes(bytes), KeyGen(1), DataVer(1))
    }

    fn block(byte: u8) -> Block {
        Block::File(FileBlock::direct(Bytes::from(vec![byte; 4])))
    }

    #[test]
    fn get_misses_on_empty_cache() {
        let cache = MemBlockCache::new(4);
        assert_eq!(
            cache.get(&ptr(1)),
            Err(CacheError::NoSuchBlock(ptr(1).id))
        );
    }

    #[test]
    fn put_then_get_round_trips_flag_and_lifetime() {
        let cache = MemBlockCache::new(4);
        cache
            .put_with_prefetch(ptr(1), TlfId::default(), block(1), CacheLifetime::Transient, true)
            .unwrap();
        let (got, has_prefetched, lifetime) = cache.get_with_prefetch(&ptr(1)).unwrap();
        assert_eq!(got, block(1));
        assert!(has_prefetched);
        assert_eq!(lifetime, CacheLifetime::Transient);
    }

    #[test]
    fn transient_capacity_evicts_least_recently_used() {
        let cache = MemBlockCache::new(2);
        for i in 1..=2 {
            cache
                .put_with_prefetch(
                    ptr(i),
                    TlfId::default(),
                    block(i),
                    CacheLifetime::Transient,
                    false,
                )
                .unwrap();
        }
        // Touch 1 so that 2 becomes the LRU victim.
        cache.get(&ptr(1)).unwrap();
        cache
            .put_with_prefetch(ptr(3), TlfId::default(), block(3), CacheLifetime::Transient, false)
            .unwrap();

        assert!(cache.get(&ptr(1)).is_ok());
        assert!(cache.get(&ptr(2)).is_err());
        assert!(cache.get(&ptr(3)).is_ok());
    }

    #[test]
    fn permanent_entries_survive_capacity_pressure_and_transient_delete() {
        let cache = MemBlockCache::new(1);
        cache
            .put_with_prefetch(ptr(1), TlfId::default(), block(1), CacheLifetime::Permanent, false)
            .unwrap();
        for i in 2..=4 {
            cache
                .put_with_prefetch(
                    ptr(i),
                    TlfId::default(),
                    block(i),
                    CacheLifetime::Transient,
                    false,
                )
                .unwrap();
        }
        assert!(cache.get(&ptr(1)).is_ok());

        cache.delete_transient(&ptr(1), TlfId::default()).unwrap();
        let (_, _, lifetime) = cache.get_with_prefetch(&ptr(1)).unwrap();
        assert_eq!(lifetime, CacheLifetime::Permanent);
    }

    #[test]
    fn delete_transient_removes_entry() {
        let cache = MemBlockCache::new(4);
        cache
            .put_with_prefetch(ptr(1), TlfId::default(), block(1), CacheLifetime::Transient, false)
            .unwrap();
        cache.delete_transient(&ptr(1), TlfId::default()).unwrap();
        assert!(cache.get(&ptr(1)).is_err());
    }

    #[test]
    fn permanent_put_upgrades_transient_entry() {
        let cache = MemBlockCache::new(4);
        cache
            .put_with_prefetch(ptr(1), TlfId::default(), block(1), CacheLifetime::Transient, false)
            .unwrap();
        cache
            .put_with_prefetch(ptr(1), TlfId::default(), block(1), CacheLifetime::Permanent, true)
            .unwrap();
        let (_, has_prefetched, lifetime) = cache.get_with_prefetch(&ptr(1)).unwrap();
        assert!(has_prefetched);
        assert_eq!(lifetime, CacheLifetime::Permanent);
    }
}
