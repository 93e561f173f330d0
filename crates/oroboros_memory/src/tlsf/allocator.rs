//! # TLSF Allocator Core
//!
//! Two-Level Segregated Fit over a single caller-supplied arena.
//!
//! ## Guarantees
//!
//! - `allocate` / `deallocate` do a bounded amount of work: a few bit scans
//!   over at most 64 classes and 32 sub-buckets, never a walk over blocks.
//! - Physically adjacent free blocks are always coalesced.
//! - The arena is borrowed, never freed: [`TlsfAllocator::destroy`] hands
//!   the buffer back untouched.
//!
//! ## Thread Safety
//!
//! NOT thread-safe and deliberately `!Sync`. Wrap it in a mutex to share it
//! (see [`crate::ArenaPool`]).
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut arena = vec![0u8; 1 << 20];
//! let mut tlsf = TlsfAllocator::new();
//! tlsf.initialize(arena.as_mut_slice(), 3)?;
//!
//! let ptr = tlsf.allocate(64).expect("arena exhausted");
//! tlsf.data_mut(ptr).unwrap()[0] = 7;
//! assert!(tlsf.deallocate(ptr));
//! ```

use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZeroU32;

use crate::config::TlsfConfig;
use crate::error::InitError;

use super::block::{self, BlockRef, BLOCK_OVERHEAD, HEAD_TAG_SIZE};
use super::index::{FreeBitmaps, SizeClass, FL_COUNT, SL_COUNT_MAX};

/// A split only happens when the leftover block would carry at least this
/// many data bytes. Fixed at the largest second-level granularity, whatever
/// exponent the instance was configured with.
pub const MIN_SPLIT_REMAINDER: u32 = SL_COUNT_MAX as u32;

/// Location of an allocation's data: a byte offset into the arena.
///
/// Offset 0 always belongs to the head sentinel, so a live allocation is
/// never at 0 and `Option<ArenaPtr>` is the nullable pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ArenaPtr(NonZeroU32);

impl ArenaPtr {
    /// Wraps a raw data offset. Returns `None` for 0.
    #[inline]
    #[must_use]
    pub const fn from_offset(offset: u32) -> Option<Self> {
        match NonZeroU32::new(offset) {
            Some(offset) => Some(Self(offset)),
            None => None,
        }
    }

    /// Byte offset of the first data byte inside the arena.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> u32 {
        self.0.get()
    }
}

/// Bucket heads plus their bitmaps.
#[derive(Clone)]
pub(super) struct FreeLists {
    pub(super) bitmaps: FreeBitmaps,
    pub(super) heads: [[Option<u32>; SL_COUNT_MAX]; FL_COUNT],
}

impl FreeLists {
    const fn new() -> Self {
        Self {
            bitmaps: FreeBitmaps::new(),
            heads: [[None; SL_COUNT_MAX]; FL_COUNT],
        }
    }

    #[inline]
    pub(super) fn head(&self, class: SizeClass) -> Option<u32> {
        self.heads[class.fli as usize][class.sli as usize]
    }

    /// Pushes a free block onto the front of the bucket matching its size.
    fn register(&mut self, arena: &mut [u8], exp: u32, offset: u32) {
        let class = SizeClass::of(BlockRef::new(arena, offset).data_size().into(), exp);
        let slot = &mut self.heads[class.fli as usize][class.sli as usize];
        if let Some(head) = *slot {
            block::insert_prev(arena, head, offset);
        }
        *slot = Some(offset);
        self.bitmaps.set(class);
    }

    /// Unlinks a free block from its bucket.
    fn remove(&mut self, arena: &mut [u8], exp: u32, offset: u32) {
        let class = SizeClass::of(BlockRef::new(arena, offset).data_size().into(), exp);
        let (_, next) = block::remove(arena, offset);
        let slot = &mut self.heads[class.fli as usize][class.sli as usize];
        if *slot == Some(offset) {
            *slot = next;
            if next.is_none() {
                self.bitmaps.clear(class);
            }
        }
    }

    /// Unlinks and returns the most recently freed block of a bucket.
    fn pop(&mut self, arena: &mut [u8], exp: u32, class: SizeClass) -> Option<u32> {
        let head = self.head(class)?;
        self.remove(arena, exp, head);
        Some(head)
    }

    /// Smallest non-empty bucket strictly above `class`: first the rest of
    /// its own class, then the next populated class.
    fn find_larger(&self, class: SizeClass) -> Option<SizeClass> {
        if let Some(sli) = self.bitmaps.nonempty_subbucket_above(class.fli, class.sli) {
            return Some(SizeClass { fli: class.fli, sli });
        }
        let fli = self.bitmaps.smallest_nonempty_class_at_or_above(class.fli + 1)?;
        let sli = self.bitmaps.smallest_nonempty_subbucket(fli)?;
        Some(SizeClass { fli, sli })
    }
}

/// TLSF allocator over one arena buffer `A`.
///
/// `A` is anything that exposes the arena bytes: `&mut [u8]`, `Box<[u8]>`,
/// `Vec<u8>`. The allocator keeps it while initialized and returns it from
/// [`destroy`](Self::destroy).
pub struct TlsfAllocator<A> {
    /// The arena. `None` while uninitialized.
    pub(super) arena: Option<A>,
    /// Arena length in bytes.
    pub(super) arena_size: u32,
    /// Configured second-level exponent.
    pub(super) exponent: u32,
    /// Segregated free lists.
    pub(super) lists: FreeLists,
    /// Opts out of `Sync`: no internal locking.
    _not_sync: PhantomData<Cell<()>>,
}

impl<A> Default for TlsfAllocator<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> TlsfAllocator<A> {
    /// Creates an uninitialized allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            arena: None,
            arena_size: 0,
            exponent: 0,
            lists: FreeLists::new(),
            _not_sync: PhantomData,
        }
    }

    /// Whether an arena is currently managed.
    #[inline]
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.arena.is_some()
    }

    /// Arena size in bytes (0 while uninitialized).
    #[inline]
    #[must_use]
    pub const fn arena_size(&self) -> u64 {
        self.arena_size as u64
    }

    /// Configured second-level exponent (0 while uninitialized).
    #[inline]
    #[must_use]
    pub const fn second_level_exponent(&self) -> u32 {
        self.exponent
    }

    /// Largest single allocation an empty arena can serve: the data size of
    /// the initial free block.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        if self.arena.is_none() {
            return 0;
        }
        self.arena_size as u64 - 3 * BLOCK_OVERHEAD as u64
    }

    /// Drops all bookkeeping and hands the arena back untouched.
    ///
    /// Returns `None` if the allocator was not initialized. Outstanding
    /// [`ArenaPtr`]s become meaningless.
    pub fn destroy(&mut self) -> Option<A> {
        let arena = self.arena.take()?;
        tracing::debug!("TLSF arena destroyed: {} bytes", self.arena_size);
        self.arena_size = 0;
        self.exponent = 0;
        self.lists = FreeLists::new();
        Some(arena)
    }
}

impl<A: AsRef<[u8]> + AsMut<[u8]>> TlsfAllocator<A> {
    /// Bootstraps the arena: head sentinel, one free block, tail sentinel.
    ///
    /// # Arguments
    ///
    /// * `arena` - The memory to manage
    /// * `second_level_exponent` - log2 of sub-buckets per size class (1..=5, usually 3)
    ///
    /// # Errors
    ///
    /// Returns an [`InitError`] and leaves the allocator untouched if it is
    /// already initialized, the arena is empty, too small or too large, or
    /// the exponent is out of range.
    pub fn initialize(&mut self, arena: A, second_level_exponent: u32) -> Result<(), InitError> {
        if self.is_initialized() {
            return Err(InitError::AlreadyInitialized);
        }

        let size = AsRef::<[u8]>::as_ref(&arena).len() as u64;
        if size == 0 {
            return Err(InitError::EmptyArena);
        }

        let config = TlsfConfig { second_level_exponent };
        config.validate()?;

        let required = config.min_arena_size();
        if size < required {
            return Err(InitError::ArenaTooSmall { size, required });
        }
        let size = u32::try_from(size).map_err(|_| InitError::ArenaTooLarge {
            size,
            max: u64::from(u32::MAX),
        })?;

        let mut arena = arena;
        let bytes: &mut [u8] = arena.as_mut();

        let head = block::place(bytes, 0, 0);
        block::set_used(bytes, head, true);
        let head_size = BlockRef::new(bytes, head).all_size();

        let tail = block::place(bytes, size - head_size, 0);
        block::set_used(bytes, tail, true);
        let tail_size = BlockRef::new(bytes, tail).all_size();

        let mut lists = FreeLists::new();
        let first = block::place(bytes, head_size, size - head_size - tail_size - BLOCK_OVERHEAD);
        lists.register(bytes, second_level_exponent, first);

        self.arena = Some(arena);
        self.arena_size = size;
        self.exponent = second_level_exponent;
        self.lists = lists;

        tracing::debug!(
            "TLSF arena initialized: {} bytes, exponent {}, capacity {}",
            size,
            second_level_exponent,
            self.capacity()
        );
        Ok(())
    }

    /// [`initialize`](Self::initialize) with a [`TlsfConfig`].
    ///
    /// # Errors
    ///
    /// Same as [`initialize`](Self::initialize).
    pub fn initialize_with(&mut self, arena: A, config: &TlsfConfig) -> Result<(), InitError> {
        self.initialize(arena, config.second_level_exponent)
    }

    /// Allocates at least `size` bytes.
    ///
    /// This is **bounded-time**: no loop over blocks.
    ///
    /// # Returns
    ///
    /// The data location, or `None` for a zero-size request, an
    /// uninitialized allocator, or when no free block is large enough.
    pub fn allocate(&mut self, size: u64) -> Option<ArenaPtr> {
        if size == 0 {
            return None;
        }
        let exp = self.exponent;
        let bytes: &mut [u8] = self.arena.as_mut()?.as_mut();

        let Ok(request) = u32::try_from(size.max(1 << exp)) else {
            tracing::debug!("TLSF allocation of {} bytes exceeds arena addressing", size);
            return None;
        };
        let class = SizeClass::of(request.into(), exp);

        // Exact class: hand the newest block out whole.
        if let Some(head) = self.lists.head(class) {
            if BlockRef::new(bytes, head).data_size() >= request {
                self.lists.remove(bytes, exp, head);
                block::set_used(bytes, head, true);
                tracing::trace!("TLSF allocate {} -> block {} (exact fit)", size, head);
                return ArenaPtr::from_offset(head + HEAD_TAG_SIZE);
            }
        }

        let Some(found) = self.lists.find_larger(class) else {
            tracing::debug!("TLSF out of memory: no free block for {} bytes", size);
            return None;
        };
        let header = self.lists.pop(bytes, exp, found)?;
        if let Some(rest) = divide_block(bytes, header, request) {
            self.lists.register(bytes, exp, rest);
        }
        block::set_used(bytes, header, true);
        tracing::trace!("TLSF allocate {} -> block {}", size, header);
        ArenaPtr::from_offset(header + HEAD_TAG_SIZE)
    }

    /// Returns an allocation to the arena, merging it with free neighbours.
    ///
    /// Double frees and pointers from another allocator are NOT detected.
    ///
    /// # Returns
    ///
    /// `false` if the allocator is uninitialized or `ptr` lies outside the
    /// arena's data range; `true` otherwise.
    pub fn deallocate(&mut self, ptr: ArenaPtr) -> bool {
        let Some(header) = self.header_of(ptr) else {
            return false;
        };
        let exp = self.exponent;
        let Some(arena) = self.arena.as_mut() else {
            return false;
        };
        let bytes: &mut [u8] = arena.as_mut();

        let this = BlockRef::new(bytes, header);
        let prev = header - block::preceding_all_size(bytes, header);
        let next = this.end();
        let mut start = header;
        let mut merged = this.all_size();

        let prev_block = BlockRef::new(bytes, prev);
        if !prev_block.is_used() {
            merged += prev_block.all_size();
            self.lists.remove(bytes, exp, prev);
            start = prev;
            tracing::trace!("TLSF merge block {} into previous {}", header, prev);
        }

        let next_block = BlockRef::new(bytes, next);
        if !next_block.is_used() {
            merged += next_block.all_size();
            self.lists.remove(bytes, exp, next);
            tracing::trace!("TLSF merge next {} into block {}", next, start);
        }

        block::place(bytes, start, merged - BLOCK_OVERHEAD);
        self.lists.register(bytes, exp, start);
        tracing::trace!("TLSF deallocate block {} -> free block {} ({} bytes)", header, start, merged);
        true
    }

    /// Data size of a live allocation (may exceed what was requested).
    #[must_use]
    pub fn usable_size(&self, ptr: ArenaPtr) -> Option<u32> {
        let header = self.header_of(ptr)?;
        let bytes: &[u8] = self.arena.as_ref()?.as_ref();
        let block = BlockRef::new(bytes, header);
        block.is_used().then(|| block.data_size())
    }

    /// The bytes of a live allocation.
    #[must_use]
    pub fn data(&self, ptr: ArenaPtr) -> Option<&[u8]> {
        let len = self.usable_size(ptr)? as usize;
        let start = ptr.offset() as usize;
        let bytes: &[u8] = self.arena.as_ref()?.as_ref();
        bytes.get(start..start + len)
    }

    /// The bytes of a live allocation, mutably.
    pub fn data_mut(&mut self, ptr: ArenaPtr) -> Option<&mut [u8]> {
        let len = self.usable_size(ptr)? as usize;
        let start = ptr.offset() as usize;
        let bytes: &mut [u8] = self.arena.as_mut()?.as_mut();
        bytes.get_mut(start..start + len)
    }

    /// Header offset for `ptr` if it falls inside the arena's data range.
    fn header_of(&self, ptr: ArenaPtr) -> Option<u32> {
        if !self.is_initialized() {
            return None;
        }
        let data = ptr.offset();
        // Between the first real block's data and the tail sentinel.
        let lowest = BLOCK_OVERHEAD + HEAD_TAG_SIZE;
        let highest = self.arena_size - BLOCK_OVERHEAD;
        (lowest..highest).contains(&data).then_some(block::header_offset_of(data))
    }
}

/// Splits `header` into a front block of exactly `requested` data bytes and
/// a free remainder, returning the remainder's offset.
///
/// Returns `None` (block left untouched) when the remainder would carry
/// fewer than [`MIN_SPLIT_REMAINDER`] data bytes.
fn divide_block(arena: &mut [u8], header: u32, requested: u32) -> Option<u32> {
    let data_size = BlockRef::new(arena, header).data_size();
    let rest_size = data_size.checked_sub(requested)?.checked_sub(BLOCK_OVERHEAD)?;
    if rest_size < MIN_SPLIT_REMAINDER {
        return None;
    }

    block::place(arena, header, requested);
    let rest = block::place(arena, header + block::all_size_for(requested), rest_size);
    tracing::trace!("TLSF split block {}: {} + {} bytes", header, requested, rest_size);
    Some(rest)
}
