//! # Memory Error Types
//!
//! Errors surfaced by the allocator core and the pool wrapper.
//!
//! The allocation hot path (`allocate` / `deallocate`) never returns these:
//! it signals failure with `Option` / `bool` so callers can decide whether
//! exhaustion is fatal.

use thiserror::Error;

/// Errors that can occur while bootstrapping an arena.
///
/// On any of these the allocator is left exactly as it was.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    /// The supplied arena has no bytes at all.
    #[error("arena is empty")]
    EmptyArena,

    /// Second-level exponent is zero or above the supported maximum.
    #[error("second-level exponent {exponent} out of range (1..={max})")]
    InvalidSecondLevelExponent {
        /// The rejected exponent.
        exponent: u32,
        /// Largest supported exponent.
        max: u32,
    },

    /// Arena cannot hold both sentinels plus one minimum-size block.
    #[error("arena too small: {size} bytes, need at least {required}")]
    ArenaTooSmall {
        /// Supplied arena size in bytes.
        size: u64,
        /// Minimum arena size for the requested exponent.
        required: u64,
    },

    /// Arena exceeds what the 32-bit boundary tags can address.
    #[error("arena too large: {size} bytes, at most {max} supported")]
    ArenaTooLarge {
        /// Supplied arena size in bytes.
        size: u64,
        /// Largest addressable arena.
        max: u64,
    },

    /// The allocator already manages an arena; `destroy` it first.
    #[error("allocator already initialized")]
    AlreadyInitialized,
}

/// A broken heap invariant found by [`crate::TlsfAllocator::verify`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    /// Verification was requested on an allocator with no arena.
    #[error("allocator is not initialized")]
    NotInitialized,

    /// A sentinel block lost its used flag or its zero data size.
    #[error("sentinel block at offset {offset} is corrupted")]
    CorruptSentinel {
        /// Header offset of the sentinel.
        offset: u32,
    },

    /// A block's tags point outside the arena or disagree with each other.
    #[error("block at offset {offset} has inconsistent boundary tags")]
    CorruptTags {
        /// Header offset of the block.
        offset: u32,
    },

    /// The block walk did not land exactly on the tail sentinel.
    #[error("block walk covered {walked} bytes, arena is {arena_size}")]
    SizeMismatch {
        /// Bytes covered by the address-order walk.
        walked: u64,
        /// Total arena size.
        arena_size: u64,
    },

    /// Two physically adjacent blocks are both free.
    #[error("free blocks at offsets {first} and {second} were not coalesced")]
    UncoalescedNeighbors {
        /// Header offset of the lower block.
        first: u32,
        /// Header offset of the upper block.
        second: u32,
    },

    /// A free block is missing from, or misfiled in, the bucket for its size.
    #[error("free block at offset {offset} is not in bucket ({fli}, {sli})")]
    MisfiledBlock {
        /// Header offset of the block.
        offset: u32,
        /// Expected first-level index.
        fli: u32,
        /// Expected second-level index.
        sli: u32,
    },

    /// A used block (or a sentinel) is linked into a free list.
    #[error("used block at offset {offset} is linked into a free list")]
    UsedBlockInFreeList {
        /// Header offset of the block.
        offset: u32,
    },

    /// Bitmap bits disagree with bucket occupancy.
    #[error("bitmap mismatch at bucket ({fli}, {sli})")]
    BitmapMismatch {
        /// First-level index.
        fli: u32,
        /// Second-level index.
        sli: u32,
    },

    /// Free-list walk found a different number of blocks than the arena walk.
    #[error("free lists hold {listed} blocks, arena walk found {walked}")]
    FreeCountMismatch {
        /// Blocks reachable from the buckets.
        listed: usize,
        /// Free blocks found in address order.
        walked: usize,
    },
}

/// Errors that can occur in the pool wrapper.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Arena bootstrap failed.
    #[error("pool initialization failed: {0}")]
    Init(#[from] InitError),

    /// Zero-byte allocations are never served.
    #[error("zero-size allocation requested")]
    ZeroSize,

    /// No free block can satisfy the request in the current arena state.
    #[error("out of memory: requested {requested} bytes")]
    OutOfMemory {
        /// Requested size in bytes.
        requested: u64,
    },

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
