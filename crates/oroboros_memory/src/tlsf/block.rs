//! # Boundary-Tagged Blocks
//!
//! Every block lives in place inside the arena bytes:
//!
//! ```text
//! offset                          +HEAD_TAG_SIZE                 +data_size       +TAIL_TAG_SIZE
//! | prev_free | next_free | used | data_size | ....... data ....... | all_size |
//! |<-------- BlockHeader ------->|<- u32 ->|                        |<- u32 ->|
//! ```
//!
//! The data-size tag sits right before the data and the all-size tag right
//! after it, so a block can be found from its data offset and its physical
//! neighbours can be found from the tags alone.
//!
//! `prev_free` / `next_free` link a block into its free-list bucket only.
//! They never describe physical adjacency. All references are byte offsets
//! into the arena; [`NIL`] marks a missing link.

use bytemuck::{Pod, Zeroable};

/// Encoded "no link" value for free-list offsets.
pub const NIL: u32 = u32::MAX;

const SIZE_TAG: usize = std::mem::size_of::<u32>();
const HEADER_LEN: usize = std::mem::size_of::<BlockHeader>();

/// Bytes before a block's data: the header plus the data-size tag.
pub const HEAD_TAG_SIZE: u32 = (HEADER_LEN + SIZE_TAG) as u32;

/// Bytes after a block's data: the all-size tag.
pub const TAIL_TAG_SIZE: u32 = SIZE_TAG as u32;

/// Fixed per-block overhead. Wrapping pools reserve this much per block.
pub const BLOCK_OVERHEAD: u32 = HEAD_TAG_SIZE + TAIL_TAG_SIZE;

/// In-place block header.
///
/// Stored unaligned inside the arena; always go through [`BlockRef`] or
/// the free functions of this module instead of touching it directly.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct BlockHeader {
    /// Previous block in the same free-list bucket, or [`NIL`].
    prev_free: u32,
    /// Next block in the same free-list bucket, or [`NIL`].
    next_free: u32,
    /// Non-zero while the block is handed out (or is a sentinel).
    used: u32,
}

impl BlockHeader {
    const UNLINKED: Self = Self {
        prev_free: NIL,
        next_free: NIL,
        used: 0,
    };
}

#[inline]
fn link(raw: u32) -> Option<u32> {
    (raw != NIL).then_some(raw)
}

#[inline]
fn read_u32(arena: &[u8], at: u32) -> u32 {
    let at = at as usize;
    bytemuck::pod_read_unaligned(&arena[at..at + SIZE_TAG])
}

#[inline]
fn write_u32(arena: &mut [u8], at: u32, value: u32) {
    let at = at as usize;
    arena[at..at + SIZE_TAG].copy_from_slice(bytemuck::bytes_of(&value));
}

#[inline]
fn read_header(arena: &[u8], offset: u32) -> BlockHeader {
    let at = offset as usize;
    bytemuck::pod_read_unaligned(&arena[at..at + HEADER_LEN])
}

#[inline]
fn write_header(arena: &mut [u8], offset: u32, header: &BlockHeader) {
    let at = offset as usize;
    arena[at..at + HEADER_LEN].copy_from_slice(bytemuck::bytes_of(header));
}

/// Total bytes a block with `data_size` bytes of payload occupies.
#[inline]
#[must_use]
pub const fn all_size_for(data_size: u32) -> u32 {
    HEAD_TAG_SIZE + data_size + TAIL_TAG_SIZE
}

/// Header offset of the block whose data starts at `data_offset`.
#[inline]
#[must_use]
pub const fn header_offset_of(data_offset: u32) -> u32 {
    data_offset - HEAD_TAG_SIZE
}

/// Writes a fresh block at `offset`: unlinked, free, both size tags set.
///
/// Also used to re-tag a region that already holds a block while splitting
/// or merging; the previous header contents are simply overwritten.
///
/// The caller keeps `offset + all_size_for(data_size)` inside the arena.
pub fn place(arena: &mut [u8], offset: u32, data_size: u32) -> u32 {
    write_header(arena, offset, &BlockHeader::UNLINKED);
    write_u32(arena, offset + HEAD_TAG_SIZE - TAIL_TAG_SIZE, data_size);
    write_u32(arena, offset + HEAD_TAG_SIZE + data_size, all_size_for(data_size));
    offset
}

/// All-size tag of the block physically preceding the one at `offset`.
#[inline]
#[must_use]
pub fn preceding_all_size(arena: &[u8], offset: u32) -> u32 {
    read_u32(arena, offset - TAIL_TAG_SIZE)
}

/// Marks the block at `offset` used or free.
pub fn set_used(arena: &mut [u8], offset: u32, used: bool) {
    let mut header = read_header(arena, offset);
    header.used = u32::from(used);
    write_header(arena, offset, &header);
}

fn set_next(arena: &mut [u8], offset: u32, next: Option<u32>) {
    let mut header = read_header(arena, offset);
    header.next_free = next.unwrap_or(NIL);
    write_header(arena, offset, &header);
}

fn set_prev(arena: &mut [u8], offset: u32, prev: Option<u32>) {
    let mut header = read_header(arena, offset);
    header.prev_free = prev.unwrap_or(NIL);
    write_header(arena, offset, &header);
}

/// Splices `node` into the list right after `at`.
pub fn insert_next(arena: &mut [u8], at: u32, node: u32) {
    let after = BlockRef::new(arena, at).next_free();
    set_prev(arena, node, Some(at));
    set_next(arena, node, after);
    if let Some(after) = after {
        set_prev(arena, after, Some(node));
    }
    set_next(arena, at, Some(node));
}

/// Splices `node` into the list right before `at`.
pub fn insert_prev(arena: &mut [u8], at: u32, node: u32) {
    let before = BlockRef::new(arena, at).prev_free();
    set_next(arena, node, Some(at));
    set_prev(arena, node, before);
    if let Some(before) = before {
        set_next(arena, before, Some(node));
    }
    set_prev(arena, at, Some(node));
}

/// Splices `node` out of its list and clears its links.
///
/// Returns the former `(prev, next)` neighbours.
pub fn remove(arena: &mut [u8], node: u32) -> (Option<u32>, Option<u32>) {
    let block = BlockRef::new(arena, node);
    let (prev, next) = (block.prev_free(), block.next_free());
    if let Some(prev) = prev {
        set_next(arena, prev, next);
    }
    if let Some(next) = next {
        set_prev(arena, next, prev);
    }
    set_prev(arena, node, None);
    set_next(arena, node, None);
    (prev, next)
}

/// Read-only view of the block at one header offset.
#[derive(Clone, Copy)]
pub struct BlockRef<'a> {
    arena: &'a [u8],
    offset: u32,
}

impl<'a> BlockRef<'a> {
    /// Views the block whose header starts at `offset`.
    #[inline]
    #[must_use]
    pub fn new(arena: &'a [u8], offset: u32) -> Self {
        Self { arena, offset }
    }

    /// Header offset (the block's identity).
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> u32 {
        self.offset
    }

    /// Offset of the first data byte.
    #[inline]
    #[must_use]
    pub const fn data_offset(&self) -> u32 {
        self.offset + HEAD_TAG_SIZE
    }

    /// Payload size, read from the head tag.
    #[inline]
    #[must_use]
    pub fn data_size(&self) -> u32 {
        read_u32(self.arena, self.offset + HEAD_TAG_SIZE - TAIL_TAG_SIZE)
    }

    /// Total occupied size, read from the tail tag.
    #[inline]
    #[must_use]
    pub fn all_size(&self) -> u32 {
        read_u32(self.arena, self.data_offset() + self.data_size())
    }

    /// Header offset of the physically following block.
    #[inline]
    #[must_use]
    pub fn end(&self) -> u32 {
        self.offset + self.all_size()
    }

    /// Whether the block is handed out (or is a sentinel).
    #[inline]
    #[must_use]
    pub fn is_used(&self) -> bool {
        read_header(self.arena, self.offset).used != 0
    }

    /// Next block in the same bucket.
    #[inline]
    #[must_use]
    pub fn next_free(&self) -> Option<u32> {
        link(read_header(self.arena, self.offset).next_free)
    }

    /// Previous block in the same bucket.
    #[inline]
    #[must_use]
    pub fn prev_free(&self) -> Option<u32> {
        link(read_header(self.arena, self.offset).prev_free)
    }

    /// The block's payload bytes.
    #[inline]
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        let start = self.data_offset() as usize;
        &self.arena[start..start + self.data_size() as usize]
    }
}

impl std::fmt::Debug for BlockRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockRef")
            .field("offset", &self.offset)
            .field("data_size", &self.data_size())
            .field("used", &self.is_used())
            .field("prev_free", &self.prev_free())
            .field("next_free", &self.next_free())
            .finish()
    }
}
