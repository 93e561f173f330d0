//! # OROBOROS Memory
//!
//! Bounded-time general-purpose allocation for engine subsystems that
//! cannot go through the global heap during a frame.
//!
//! ## Architecture
//!
//! 1. **TLSF core** - [`TlsfAllocator`]: two-level segregated free lists over
//!    one fixed arena, O(1) allocate and deallocate, adjacent-block coalescing
//! 2. **Boundary tags** - every block carries its size before and after its
//!    data, so neighbours are found with arithmetic, never searches
//! 3. **Pool wrapper** - [`ArenaPool`]: owns the arena, serializes access and
//!    hands out reference-counted [`PoolHandle`]s
//!
//! ## Example
//!
//! ```rust,ignore
//! use oroboros_memory::{ArenaPool, PoolConfig};
//!
//! let pool = ArenaPool::new(&PoolConfig::default())?; // 1 MiB, reserved once
//! let vertices = pool.allocate(4096)?;
//! // ... freed when the last clone of `vertices` drops
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod pool;
pub mod tlsf;

pub use config::{PoolConfig, TlsfConfig};
pub use error::{InitError, IntegrityError, PoolError, PoolResult};
pub use pool::{ArenaPool, PoolHandle};
pub use tlsf::{
    ArenaPtr, BlockInfo, HeapStats, LeakedBlock, SizeClass, TlsfAllocator, BLOCK_OVERHEAD,
    HEAD_TAG_SIZE, MAX_SECOND_LEVEL_EXPONENT, TAIL_TAG_SIZE,
};
