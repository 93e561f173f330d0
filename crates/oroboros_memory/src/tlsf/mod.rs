//! # TLSF Arena Allocator
//!
//! Two-Level Segregated Fit over boundary-tagged, in-place blocks.
//!
//! ## Design Philosophy
//!
//! The arena is one byte buffer. Headers, free-list links and neighbour
//! lookups are all byte offsets into it, so the allocator needs no unsafe
//! code and no pointers into its own memory.
//!
//! ```text
//! | head sentinel | block | block | ... | block | tail sentinel |
//!   (used, 0 B)                                    (used, 0 B)
//! ```

pub mod block;
pub mod index;

mod allocator;
mod diagnostics;

pub use allocator::{ArenaPtr, TlsfAllocator, MIN_SPLIT_REMAINDER};
pub use block::{BLOCK_OVERHEAD, HEAD_TAG_SIZE, TAIL_TAG_SIZE};
pub use diagnostics::{BlockInfo, Blocks, HeapStats, LeakedBlock};
pub use index::{SizeClass, FL_COUNT, MAX_SECOND_LEVEL_EXPONENT, SL_COUNT_MAX};
