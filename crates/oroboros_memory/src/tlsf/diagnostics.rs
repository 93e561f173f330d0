//! # Heap Diagnostics
//!
//! Address-order walks over the arena: leak reporting, usage statistics and
//! a full invariant check. All of these are O(blocks) and meant for
//! shutdown, tooling and tests, never for the allocation path.

use std::collections::HashMap;

use crate::error::IntegrityError;

use super::allocator::TlsfAllocator;
use super::block::{all_size_for, BlockRef, BLOCK_OVERHEAD, HEAD_TAG_SIZE, TAIL_TAG_SIZE};
use super::index::{SizeClass, FL_COUNT, SL_COUNT_MAX};

/// A used block still live when the leak report ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeakedBlock {
    /// Header offset of the block.
    pub offset: u32,
    /// Data size of the block.
    pub data_size: u32,
}

/// One block as seen by an address-order walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Header offset.
    pub offset: u32,
    /// Payload size.
    pub data_size: u32,
    /// Total occupied size (overhead included).
    pub all_size: u32,
    /// Whether the block is handed out (or is a sentinel).
    pub used: bool,
}

impl BlockInfo {
    /// Sentinels are the only zero-size blocks.
    #[inline]
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        self.data_size == 0
    }
}

/// Usage snapshot, sentinels excluded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Live allocations.
    pub used_blocks: usize,
    /// Free blocks.
    pub free_blocks: usize,
    /// Data bytes held by live allocations.
    pub used_bytes: u64,
    /// Data bytes available in free blocks.
    pub free_bytes: u64,
    /// Data size of the largest free block.
    pub largest_free: u32,
}

impl HeapStats {
    /// Free bytes outside the largest free block, as a fraction of all free
    /// bytes. 0.0 means one contiguous free region.
    #[must_use]
    pub fn fragmentation(&self) -> f64 {
        if self.free_bytes == 0 {
            return 0.0;
        }
        1.0 - f64::from(self.largest_free) / self.free_bytes as f64
    }
}

/// Iterator over every block from the head sentinel to the tail sentinel.
pub struct Blocks<'a> {
    arena: &'a [u8],
    cursor: u32,
    end: u32,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.cursor >= self.end {
            return None;
        }
        let block = BlockRef::new(self.arena, self.cursor);
        let info = BlockInfo {
            offset: self.cursor,
            data_size: block.data_size(),
            all_size: block.all_size(),
            used: block.is_used(),
        };
        // A zero all-size would never advance; stop instead of spinning.
        self.cursor = if info.all_size == 0 { self.end } else { self.cursor + info.all_size };
        Some(info)
    }
}

impl<A: AsRef<[u8]>> TlsfAllocator<A> {
    /// Walks the arena in address order, sentinels included.
    ///
    /// Empty while uninitialized.
    #[must_use]
    pub fn blocks(&self) -> Blocks<'_> {
        let arena: &[u8] = self.arena.as_ref().map_or(&[][..], |arena| arena.as_ref());
        Blocks {
            arena,
            cursor: 0,
            end: self.arena_size,
        }
    }

    /// Current usage snapshot.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.blocks()
            .filter(|info| !info.is_sentinel())
            .fold(HeapStats::default(), |mut stats, info| {
                if info.used {
                    stats.used_blocks += 1;
                    stats.used_bytes += u64::from(info.data_size);
                } else {
                    stats.free_blocks += 1;
                    stats.free_bytes += u64::from(info.data_size);
                    stats.largest_free = stats.largest_free.max(info.data_size);
                }
                stats
            })
    }

    /// Logs every allocation that is still live.
    ///
    /// Emits one `warn` event per leaked block with its data size and
    /// returns the same records. An empty vector means no leaks.
    pub fn leak_report(&self) -> Vec<LeakedBlock> {
        let leaks: Vec<LeakedBlock> = self
            .blocks()
            .filter(|info| info.used && !info.is_sentinel())
            .map(|info| LeakedBlock {
                offset: info.offset,
                data_size: info.data_size,
            })
            .collect();

        for leak in &leaks {
            tracing::warn!("TLSF leak: block at offset {} still holds {} bytes", leak.offset, leak.data_size);
        }
        if !leaks.is_empty() {
            tracing::warn!("TLSF leak report: {} block(s) never deallocated", leaks.len());
        }
        leaks
    }

    /// Checks every heap invariant.
    ///
    /// - the block walk covers the arena exactly, head to tail sentinel
    /// - both sentinels are used, zero-size, and never linked
    /// - every free block sits in the bucket for its size, and only there
    /// - bitmap bits match bucket occupancy
    /// - no two adjacent blocks are both free
    ///
    /// # Errors
    ///
    /// The first broken invariant found.
    pub fn verify(&self) -> Result<HeapStats, IntegrityError> {
        let arena: &[u8] = self.arena.as_ref().ok_or(IntegrityError::NotInitialized)?.as_ref();
        let exp = self.exponent;
        let arena_size = self.arena_size;

        let mut free_blocks: HashMap<u32, SizeClass> = HashMap::new();
        let mut stats = HeapStats::default();
        let mut cursor = 0u32;
        let mut previous_free: Option<u32> = None;
        let mut last = None;

        while cursor < arena_size {
            let info = read_block(arena, cursor)?;

            if cursor == 0 && !(info.used && info.is_sentinel()) {
                return Err(IntegrityError::CorruptSentinel { offset: 0 });
            }

            if info.used {
                previous_free = None;
                if !info.is_sentinel() {
                    stats.used_blocks += 1;
                    stats.used_bytes += u64::from(info.data_size);
                }
            } else {
                if let Some(first) = previous_free {
                    return Err(IntegrityError::UncoalescedNeighbors { first, second: cursor });
                }
                if info.data_size < (1 << exp) {
                    return Err(IntegrityError::CorruptTags { offset: cursor });
                }
                previous_free = Some(cursor);
                free_blocks.insert(cursor, SizeClass::of(info.data_size.into(), exp));
                stats.free_blocks += 1;
                stats.free_bytes += u64::from(info.data_size);
                stats.largest_free = stats.largest_free.max(info.data_size);
            }

            last = Some(info);
            cursor += info.all_size;
        }

        if cursor != arena_size {
            return Err(IntegrityError::SizeMismatch {
                walked: u64::from(cursor),
                arena_size: u64::from(arena_size),
            });
        }
        match last {
            Some(tail) if tail.used && tail.is_sentinel() && tail.offset == arena_size - BLOCK_OVERHEAD => {}
            Some(tail) => return Err(IntegrityError::CorruptSentinel { offset: tail.offset }),
            None => return Err(IntegrityError::CorruptSentinel { offset: 0 }),
        }

        let listed = self.verify_buckets(arena, &free_blocks)?;
        if listed != free_blocks.len() {
            return Err(IntegrityError::FreeCountMismatch {
                listed,
                walked: free_blocks.len(),
            });
        }

        Ok(stats)
    }

    /// Walks every bucket, checking membership and bitmap bits. Returns the
    /// number of linked blocks.
    fn verify_buckets(&self, arena: &[u8], free_blocks: &HashMap<u32, SizeClass>) -> Result<usize, IntegrityError> {
        let mut listed = 0usize;

        for fli in 0..FL_COUNT as u32 {
            let mut class_nonempty = false;

            for sli in 0..SL_COUNT_MAX as u32 {
                let class = SizeClass { fli, sli };
                let head = self.lists.head(class);
                if head.is_some() != self.lists.bitmaps.is_set(class) {
                    return Err(IntegrityError::BitmapMismatch { fli, sli });
                }
                class_nonempty |= head.is_some();

                let mut node = head;
                let mut prev = None;
                while let Some(offset) = node {
                    match free_blocks.get(&offset) {
                        Some(expected) if *expected == class => {}
                        Some(_) => return Err(IntegrityError::MisfiledBlock { offset, fli, sli }),
                        None => return Err(IntegrityError::UsedBlockInFreeList { offset }),
                    }
                    let block = BlockRef::new(arena, offset);
                    if block.prev_free() != prev {
                        return Err(IntegrityError::CorruptTags { offset });
                    }
                    listed += 1;
                    // A cycle would revisit blocks forever.
                    if listed > free_blocks.len() {
                        return Err(IntegrityError::FreeCountMismatch {
                            listed,
                            walked: free_blocks.len(),
                        });
                    }
                    prev = Some(offset);
                    node = block.next_free();
                }
            }

            if class_nonempty != self.lists.bitmaps.class_is_set(fli) {
                return Err(IntegrityError::BitmapMismatch { fli, sli: 0 });
            }
        }

        Ok(listed)
    }
}

/// Reads one block's tags, refusing anything that would index past the arena.
fn read_block(arena: &[u8], offset: u32) -> Result<BlockInfo, IntegrityError> {
    let corrupt = IntegrityError::CorruptTags { offset };
    let len = arena.len() as u64;
    if u64::from(offset) + u64::from(HEAD_TAG_SIZE) > len {
        return Err(corrupt);
    }
    let block = BlockRef::new(arena, offset);
    let data_size = block.data_size();
    if u64::from(block.data_offset()) + u64::from(data_size) + u64::from(TAIL_TAG_SIZE) > len {
        return Err(corrupt);
    }
    let all_size = block.all_size();
    if all_size != all_size_for(data_size) {
        return Err(corrupt);
    }
    Ok(BlockInfo {
        offset,
        data_size,
        all_size,
        used: block.is_used(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(len: usize) -> TlsfAllocator<Vec<u8>> {
        let mut tlsf = TlsfAllocator::new();
        tlsf.initialize(vec![0u8; len], 3).unwrap();
        tlsf
    }

    #[test]
    fn test_fresh_arena_walk() {
        let tlsf = fresh(1024);
        let blocks: Vec<BlockInfo> = tlsf.blocks().collect();
        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].used && blocks[0].is_sentinel());
        assert!(!blocks[1].used);
        assert_eq!(blocks[1].data_size, 1024 - 60);
        assert!(blocks[2].used && blocks[2].is_sentinel());
        assert_eq!(blocks.iter().map(|b| u64::from(b.all_size)).sum::<u64>(), 1024);
    }

    #[test]
    fn test_stats_track_usage() {
        let mut tlsf = fresh(4096);
        let a = tlsf.allocate(100).unwrap();
        let _b = tlsf.allocate(200).unwrap();

        let stats = tlsf.stats();
        assert_eq!(stats.used_blocks, 2);
        assert_eq!(stats.used_bytes, 300);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.largest_free as u64, stats.free_bytes);
        assert!(stats.fragmentation().abs() < f64::EPSILON);

        tlsf.deallocate(a);
        let stats = tlsf.verify().unwrap();
        assert_eq!(stats.used_blocks, 1);
        assert_eq!(stats.free_blocks, 2);
        assert!(stats.fragmentation() > 0.0);
    }

    #[test]
    fn test_leak_report_lists_live_blocks() {
        let mut tlsf = fresh(2048);
        let a = tlsf.allocate(24).unwrap();
        let b = tlsf.allocate(48).unwrap();
        tlsf.deallocate(a);

        let leaks = tlsf.leak_report();
        assert_eq!(leaks.len(), 1);
        assert_eq!(leaks[0].data_size, 48);
        assert_eq!(leaks[0].offset + HEAD_TAG_SIZE, b.offset());

        tlsf.deallocate(b);
        assert!(tlsf.leak_report().is_empty());
    }

    #[test]
    fn test_verify_uninitialized() {
        let tlsf: TlsfAllocator<Vec<u8>> = TlsfAllocator::new();
        assert_eq!(tlsf.verify(), Err(IntegrityError::NotInitialized));
        assert_eq!(tlsf.blocks().count(), 0);
        assert!(tlsf.leak_report().is_empty());
    }

    #[test]
    fn test_verify_detects_corrupt_tag() {
        let mut tlsf = fresh(1024);
        let ptr = tlsf.allocate(32).unwrap();
        assert!(tlsf.verify().is_ok());

        // Overwrite the data-size tag of the live block.
        let tag = (ptr.offset() - TAIL_TAG_SIZE) as usize;
        if let Some(arena) = tlsf.arena.as_mut() {
            arena[tag..tag + 4].copy_from_slice(&33u32.to_ne_bytes());
        }
        assert!(matches!(tlsf.verify(), Err(IntegrityError::CorruptTags { .. })));
    }

    #[test]
    fn test_verify_detects_bitmap_mismatch() {
        let mut tlsf = fresh(1024);
        let class = SizeClass::of(tlsf.capacity(), 3);
        tlsf.lists.bitmaps.clear(class);
        assert!(matches!(tlsf.verify(), Err(IntegrityError::BitmapMismatch { .. })));
    }
}
