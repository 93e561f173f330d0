//! # Arena Pool
//!
//! Owns an arena and hands out reference-counted handles into it.
//!
//! The TLSF core is single-threaded by contract; the pool serializes every
//! call into it behind one `parking_lot::Mutex`. Dropping the last clone of
//! a [`PoolHandle`] routes the block back through the core's `deallocate`.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::error::{InitError, PoolError, PoolResult};
use crate::tlsf::{ArenaPtr, HeapStats, LeakedBlock, TlsfAllocator};

type SharedCore = Arc<Mutex<TlsfAllocator<Box<[u8]>>>>;

/// A thread-safe pool over one pre-reserved arena.
///
/// # Example
///
/// ```rust,ignore
/// let pool = ArenaPool::new(&PoolConfig::default())?;
///
/// let handle = pool.allocate(256)?;
/// handle.write(|bytes| bytes[..4].copy_from_slice(b"mesh"));
///
/// let shared = handle.clone();
/// drop(handle);   // still live through `shared`
/// drop(shared);   // block returned to the arena
/// ```
pub struct ArenaPool {
    /// Allocator core, shared with every outstanding handle.
    core: SharedCore,
    /// Configuration the pool was built with.
    config: PoolConfig,
}

impl ArenaPool {
    /// Reserves the arena and bootstraps the allocator.
    ///
    /// All memory is allocated here, once.
    ///
    /// # Errors
    ///
    /// [`PoolError::Init`] if the configuration cannot produce a valid arena.
    pub fn new(config: &PoolConfig) -> PoolResult<Self> {
        // Refuse oversized arenas before reserving anything.
        let size = u32::try_from(config.arena_size).map_err(|_| InitError::ArenaTooLarge {
            size: config.arena_size,
            max: u64::from(u32::MAX),
        })?;

        let arena = vec![0u8; size as usize].into_boxed_slice();
        let mut core = TlsfAllocator::new();
        core.initialize_with(arena, &config.tlsf())?;

        tracing::info!(
            "Arena pool ready: {} bytes, {} usable",
            config.arena_size,
            core.capacity()
        );

        Ok(Self {
            core: Arc::new(Mutex::new(core)),
            config: *config,
        })
    }

    /// Allocates at least `size` bytes.
    ///
    /// # Errors
    ///
    /// [`PoolError::ZeroSize`] for `size == 0`, [`PoolError::OutOfMemory`]
    /// when no free block is large enough.
    pub fn allocate(&self, size: u64) -> PoolResult<PoolHandle> {
        if size == 0 {
            return Err(PoolError::ZeroSize);
        }
        let ptr = self
            .core
            .lock()
            .allocate(size)
            .ok_or(PoolError::OutOfMemory { requested: size })?;

        Ok(PoolHandle {
            inner: Arc::new(HandleInner {
                core: Arc::clone(&self.core),
                ptr,
            }),
        })
    }

    /// Largest single allocation the empty arena can serve.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.core.lock().capacity()
    }

    /// Current usage snapshot.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.core.lock().stats()
    }

    /// Logs and returns every allocation still live.
    pub fn leak_report(&self) -> Vec<LeakedBlock> {
        self.core.lock().leak_report()
    }

    /// The configuration this pool was built with.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }
}

impl Drop for ArenaPool {
    fn drop(&mut self) {
        // Outstanding handles keep the core alive; the arena is released
        // with the last of them.
        let Some(core) = Arc::get_mut(&mut self.core) else {
            tracing::debug!(
                "Arena pool dropped with {} live handle(s)",
                Arc::strong_count(&self.core) - 1
            );
            return;
        };
        let core = core.get_mut();
        core.leak_report();
        drop(core.destroy());
    }
}

/// Reference-counted handle to one pool allocation.
///
/// Clones share the allocation; the block is deallocated when the last
/// clone drops.
#[derive(Clone)]
pub struct PoolHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    core: SharedCore,
    ptr: ArenaPtr,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        let freed = self.core.lock().deallocate(self.ptr);
        debug_assert!(freed, "pool handle outlived its arena");
    }
}

impl PoolHandle {
    /// Location of the allocation inside the pool's arena.
    #[inline]
    #[must_use]
    pub fn ptr(&self) -> ArenaPtr {
        self.inner.ptr
    }

    /// Usable bytes (at least what was requested).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .core
            .lock()
            .usable_size(self.inner.ptr)
            .map_or(0, |size| size as usize)
    }

    /// Whether the allocation has no usable bytes (never true for a live handle).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of clones sharing this allocation.
    #[inline]
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Runs `f` over the allocation's bytes.
    ///
    /// The pool lock is held for the duration of `f`; do not allocate from
    /// the same pool inside it.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let core = self.inner.core.lock();
        core.data(self.inner.ptr).map(f)
    }

    /// Runs `f` over the allocation's bytes, mutably.
    ///
    /// Same locking rule as [`read`](Self::read).
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let mut core = self.inner.core.lock();
        core.data_mut(self.inner.ptr).map(f)
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("ptr", &self.inner.ptr)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
