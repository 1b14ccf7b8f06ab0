//! Binary-buddy allocation over a fixed arena.
//!
//! A [`BuddyAllocator`] owns a byte buffer of `2^level` pages. Requests are
//! rounded up to a power-of-two number of pages and served from the leftmost
//! free block of that order, splitting larger blocks implicitly; freed blocks
//! coalesce with their buddies as soon as both halves of a pair are free.
//!
//! ## Characteristics
//!
//! #### Time complexity
//!
//! | Operation                | Best-case | Worst-case           |
//! |--------------------------|-----------|----------------------|
//! | Allocate                 | O(1)      | O(level + log live)  |
//! | Deallocate               | O(1)      | O(level + log live)  |
//!
//! Both operations walk the tree between the root and the block's node once,
//! and touch the table of live allocations once.
//!
//! #### Fragmentation
//!
//! Every allocation reserves a power-of-two number of pages, so a request just
//! over a power of two wastes nearly half of its block. The descent always
//! takes the leftmost subtree that fits rather than the tightest one, which
//! keeps it free of backtracking at the cost of somewhat worse packing.
//!
//! #### Concurrency
//!
//! `BuddyAllocator` itself requires `&mut self` to allocate or free. With the
//! `std` feature, [`MutexBuddyAllocator`] and [`RwLockBuddyAllocator`] wrap it in
//! a single lock that every mutating operation holds for its whole duration.
//! Callers needing more throughput should shard across several arenas.

use alloc::{boxed::Box, collections::BTreeMap, vec};
use core::{cmp, fmt, ops::Range, ptr::NonNull};

#[cfg(feature = "std")]
use std::sync::{Mutex, PoisonError, RwLock};

use crate::{
    order::{self, round_up_pow2},
    stats::{self, BuddyStats},
    tree::OrderTree,
    AllocError, AllocInitError, FreeError,
};

/// A live allocation.
///
/// A `Block` names a byte range of the arena. It is deliberately not `Clone`:
/// handing it back via [`BuddyAllocator::deallocate`] consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct Block {
    offset: usize,
    len: usize,
    order: u8,
}

impl Block {
    /// Returns the offset of the block from the start of the arena, in bytes.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the size that was requested, in bytes.
    ///
    /// The reserved block may be larger; see [`Block::pages`].
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the block covers no bytes.
    ///
    /// Zero-sized requests are rejected, so this is `false` for every block
    /// handed out by an allocator.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the order of the reserved block.
    #[inline]
    pub fn order(&self) -> u8 {
        self.order
    }

    /// Returns the number of pages reserved for this block.
    #[inline]
    pub fn pages(&self) -> usize {
        1 << self.order
    }

    /// Returns the byte range lent to the caller.
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// A binary-buddy allocator over a fixed byte buffer.
///
/// `B` is the backing buffer, owned for the lifetime of the allocator and
/// returned by [`into_inner`](BuddyAllocator::into_inner). Any type that
/// derefs to a byte slice works: `Box<[u8]>`, `Vec<u8>`, `&mut [u8]`, ...
///
/// ```
/// use buddy_arena::{AllocError, BuddyAllocator};
///
/// // Four 4 KiB pages, at most two pages per allocation.
/// let mut buddy = BuddyAllocator::with_capacity(4, 2, 4096).unwrap();
///
/// let a = buddy.allocate(6000).unwrap();
/// assert_eq!(a.pages(), 2);
///
/// assert!(matches!(
///     buddy.allocate(3 * 4096),
///     Err(AllocError::ExceedsMaxAllocatable { .. })
/// ));
///
/// buddy.deallocate(a).unwrap();
/// ```
pub struct BuddyAllocator<B = Box<[u8]>> {
    buffer: B,
    page_size: usize,
    max_alloc_order: u8,
    tree: OrderTree,
    /// Order reserved for each live allocation, keyed by byte offset.
    live: BTreeMap<usize, u8>,
    used_pages: usize,
}

impl BuddyAllocator<Box<[u8]>> {
    /// Constructs a new `BuddyAllocator` over a zeroed buffer of `page_count`
    /// pages.
    ///
    /// # Errors
    ///
    /// Returns an error under the same conditions as [`BuddyAllocator::new`],
    /// or [`AllocInitError::ArenaTooLarge`] if the arena would exceed
    /// `isize::MAX` bytes.
    pub fn with_capacity(
        page_count: usize,
        max_alloc_pages: usize,
        page_size: usize,
    ) -> Result<Self, AllocInitError> {
        let len = page_count
            .checked_mul(page_size)
            .filter(|&len| len <= isize::MAX as usize)
            .ok_or(AllocInitError::ArenaTooLarge {
                page_count,
                page_size,
            })?;

        BuddyAllocator::new(vec![0; len].into_boxed_slice(), max_alloc_pages, page_size)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> BuddyAllocator<B> {
    /// Constructs a new `BuddyAllocator` which manages `buffer`.
    ///
    /// `max_alloc_pages` caps the size of a single allocation, in pages. It is
    /// rounded down to a power of two and clamped to the size of the arena.
    ///
    /// # Errors
    ///
    /// Returns an error if `page_size` is zero, if the buffer is not a whole,
    /// nonzero, power-of-two number of pages, or if `max_alloc_pages` is zero.
    pub fn new(
        buffer: B,
        max_alloc_pages: usize,
        page_size: usize,
    ) -> Result<Self, AllocInitError> {
        if page_size == 0 {
            return Err(AllocInitError::ZeroPageSize);
        }

        let len = buffer.as_ref().len();
        if len % page_size != 0 {
            return Err(AllocInitError::UnalignedBuffer { len, page_size });
        }

        let page_count = len / page_size;
        if page_count == 0 {
            return Err(AllocInitError::EmptyArena);
        }

        if !order::is_power_of_two(page_count) {
            return Err(AllocInitError::PageCountNotPowerOfTwo { page_count });
        }

        if max_alloc_pages == 0 {
            return Err(AllocInitError::ZeroMaxAlloc);
        }

        let level = order::order(page_count);
        let max_alloc_order = cmp::min(order::order(max_alloc_pages), level);

        log::debug!(
            "buddy arena: {page_count} pages of {page_size} bytes, \
             level {level}, max alloc order {max_alloc_order}"
        );

        Ok(BuddyAllocator {
            buffer,
            page_size,
            max_alloc_order,
            tree: OrderTree::new(level),
            live: BTreeMap::new(),
            used_pages: 0,
        })
    }

    /// Allocates a block of at least `size` bytes.
    ///
    /// The block reserves the smallest power-of-two number of pages that holds
    /// `size` bytes; the returned [`Block`] covers exactly `size` bytes of it.
    ///
    /// # Errors
    ///
    /// - [`AllocError::ZeroSize`] if `size` is zero.
    /// - [`AllocError::ExceedsMaxAllocatable`] if the rounded request exceeds
    ///   the configured ceiling.
    /// - [`AllocError::OutOfMemory`] if no free block is large enough.
    ///
    /// The allocator is unchanged on error.
    pub fn allocate(&mut self, size: usize) -> Result<Block, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let order = self.order_for(order::pages_for(size, self.page_size))?;
        let offset = self.reserve(order)?;

        log::trace!("allocated {size:#x} bytes at {offset:#x} (order {order})");

        Ok(Block {
            offset,
            len: size,
            order,
        })
    }

    /// Allocates a block of at least `pages` pages.
    ///
    /// Unlike [`allocate`](Self::allocate), the returned block covers whole
    /// pages.
    ///
    /// # Errors
    ///
    /// As for [`allocate`](Self::allocate).
    pub fn allocate_pages(&mut self, pages: usize) -> Result<Block, AllocError> {
        if pages == 0 {
            return Err(AllocError::ZeroSize);
        }

        let order = self.order_for(pages)?;
        let offset = self.reserve(order)?;

        log::trace!("allocated {pages} pages at {offset:#x} (order {order})");

        Ok(Block {
            offset,
            len: pages * self.page_size,
            order,
        })
    }

    /// Frees the allocation starting at byte offset `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`FreeError::UnknownAllocation`] if `offset` is not the start of
    /// a live allocation, including when it has already been freed. The
    /// allocator is unchanged on error.
    pub fn free(&mut self, offset: usize) -> Result<(), FreeError> {
        let Some(order) = self.live.remove(&offset) else {
            log::warn!("free of unknown allocation at {offset:#x}");
            return Err(FreeError::UnknownAllocation { offset });
        };

        self.tree.release(offset / self.page_size, order);
        self.used_pages -= 1 << order;

        log::trace!("freed {offset:#x} (order {order})");

        Ok(())
    }

    /// Frees `block`.
    ///
    /// # Errors
    ///
    /// Returns [`FreeError::UnknownAllocation`] if `block` was not allocated by
    /// this allocator.
    #[inline]
    pub fn deallocate(&mut self, block: Block) -> Result<(), FreeError> {
        self.free(block.offset)
    }

    /// Returns the bytes lent to `block`, or `None` if `block` is not live.
    pub fn block_bytes(&self, block: &Block) -> Option<&[u8]> {
        self.is_live(block)
            .then(|| self.buffer.as_ref().get(block.range()))
            .flatten()
    }

    /// Returns the bytes lent to `block` mutably, or `None` if `block` is not
    /// live.
    pub fn block_bytes_mut(&mut self, block: &Block) -> Option<&mut [u8]> {
        if !self.is_live(block) {
            return None;
        }

        self.buffer.as_mut().get_mut(block.range())
    }

    /// Returns a pointer to the bytes lent to `block`, or `None` if `block` is
    /// not live.
    ///
    /// The pointer is valid for reads and writes until `block` is freed or the
    /// backing buffer is moved or dropped.
    pub fn block_ptr(&mut self, block: &Block) -> Option<NonNull<[u8]>> {
        self.block_bytes_mut(block).map(NonNull::from)
    }

    /// Frees the allocation whose first byte is at `ptr`.
    ///
    /// # Errors
    ///
    /// Returns [`FreeError::UnknownAllocation`] if `ptr` does not point at the
    /// first byte of a live allocation of this allocator.
    pub fn free_ptr(&mut self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        let base = NonNull::from(self.buffer.as_mut()).cast::<u8>();

        // Pointers below the base wrap around to offsets past the arena.
        let offset = ptr.addr().get().wrapping_sub(base.addr().get());

        self.free(offset)
    }

    /// Decomposes the allocator, returning the backing buffer.
    ///
    /// All outstanding allocations are forgotten.
    pub fn into_inner(self) -> B {
        self.buffer
    }

    fn is_live(&self, block: &Block) -> bool {
        self.live.get(&block.offset) == Some(&block.order)
    }

    /// Converts a page count to an order, enforcing the allocation ceiling.
    fn order_for(&self, pages: usize) -> Result<u8, AllocError> {
        let order = match round_up_pow2(pages) {
            Some(rounded) => order::order(rounded),
            None => usize::BITS as u8,
        };

        if order > self.max_alloc_order {
            return Err(AllocError::ExceedsMaxAllocatable {
                requested_order: order,
                max_order: self.max_alloc_order,
            });
        }

        Ok(order)
    }

    /// Reserves a block of the given order and records it as live.
    fn reserve(&mut self, order: u8) -> Result<usize, AllocError> {
        let page_offset = match self.tree.reserve(order) {
            Some(ofs) => ofs,
            None => {
                return Err(AllocError::OutOfMemory {
                    requested_order: order,
                    max_free_order: self.tree.max_free_order(),
                })
            }
        };

        let offset = page_offset * self.page_size;
        let prev = self.live.insert(offset, order);
        debug_assert!(prev.is_none(), "block at {offset:#x} handed out twice");

        self.used_pages += 1 << order;

        Ok(offset)
    }
}

impl<B> BuddyAllocator<B> {
    /// Returns the size of a page, in bytes.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the number of pages in the arena.
    #[inline]
    pub fn page_count(&self) -> usize {
        self.tree.page_count()
    }

    /// Returns the largest number of pages a single allocation may reserve.
    #[inline]
    pub fn max_alloc_pages(&self) -> usize {
        1 << self.max_alloc_order
    }

    /// Returns a snapshot of the allocator's configuration and occupancy.
    pub fn stats(&self) -> BuddyStats {
        BuddyStats {
            page_size: self.page_size,
            page_count: self.tree.page_count(),
            level: self.tree.level(),
            max_alloc_order: self.max_alloc_order,
            max_free_order: self.tree.max_free_order(),
            free_pages: self.tree.page_count() - self.used_pages,
            live_allocations: self.live.len(),
        }
    }

    /// Returns the cached order of every tree node, root first.
    ///
    /// Nodes are stored breadth-first; `-1` marks a node with nothing free
    /// beneath it. Nodes below an allocated node keep the values they had
    /// before the allocation.
    pub fn tree_orders(&self) -> &[i8] {
        self.tree.nodes()
    }

    /// Renders the allocator's statistics and tree for debugging.
    pub fn dump(&self) -> alloc::string::String {
        let mut out = alloc::string::String::new();
        stats::write_dump(&mut out, &self.stats(), &self.tree)
            .expect("writing to a String cannot fail");

        out
    }
}

impl<B> fmt::Display for BuddyAllocator<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        stats::write_dump(f, &self.stats(), &self.tree)
    }
}

impl<B> fmt::Debug for BuddyAllocator<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuddyAllocator")
            .field("page_size", &self.page_size)
            .field("page_count", &self.tree.page_count())
            .field("max_alloc_order", &self.max_alloc_order)
            .field("max_free_order", &self.tree.max_free_order())
            .field("live_allocations", &self.live.len())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "std")]
/// Declares lock-guarded wrappers around a `BuddyAllocator`.
///
/// `$write` is the locking method used by operations that mutate the
/// allocator, `$read` the one used by diagnostics.
macro_rules! declare_wrappers {
    ($($(#[$attr:meta])* $wrapper:ident uses $lock:ident via $write:ident / $read:ident)*) => {
        $(
            #[doc = concat!("A `BuddyAllocator` guarded by a `", stringify!($lock), "`.")]
            ///
            /// Every allocation and free holds the lock for its full duration,
            /// which makes operations linearizable with respect to one another.
            $(#[$attr])*
            pub struct $wrapper<B = Box<[u8]>> {
                inner: $lock<BuddyAllocator<B>>,
            }

            impl<B: AsRef<[u8]> + AsMut<[u8]>> $wrapper<B> {
                #[doc = concat!("Wraps `allocator` in a `", stringify!($lock), "`.")]
                pub fn new(allocator: BuddyAllocator<B>) -> Self {
                    $wrapper {
                        inner: $lock::new(allocator),
                    }
                }

                /// Locks the allocator and calls [`BuddyAllocator::allocate`].
                pub fn allocate(&self, size: usize) -> Result<Block, AllocError> {
                    self.write().allocate(size)
                }

                /// Locks the allocator and calls [`BuddyAllocator::allocate_pages`].
                pub fn allocate_pages(&self, pages: usize) -> Result<Block, AllocError> {
                    self.write().allocate_pages(pages)
                }

                /// Locks the allocator and calls [`BuddyAllocator::free`].
                pub fn free(&self, offset: usize) -> Result<(), FreeError> {
                    self.write().free(offset)
                }

                /// Locks the allocator and calls [`BuddyAllocator::deallocate`].
                pub fn deallocate(&self, block: Block) -> Result<(), FreeError> {
                    self.write().deallocate(block)
                }

                /// Calls `f` on the bytes lent to `block` while holding the lock.
                ///
                /// Returns `None` without calling `f` if `block` is not live.
                pub fn with_block_mut<R>(
                    &self,
                    block: &Block,
                    f: impl FnOnce(&mut [u8]) -> R,
                ) -> Option<R> {
                    self.write().block_bytes_mut(block).map(f)
                }

                /// Returns a snapshot of the allocator's statistics.
                pub fn stats(&self) -> BuddyStats {
                    self.read().stats()
                }

                /// Renders the allocator's statistics and tree for debugging.
                pub fn dump(&self) -> alloc::string::String {
                    self.read().dump()
                }

                /// Unwraps the allocator.
                pub fn into_inner(self) -> BuddyAllocator<B> {
                    self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
                }

                // No operation panics between mutations, so a poisoned lock
                // still guards a consistent allocator.
                fn write(&self) -> impl core::ops::DerefMut<Target = BuddyAllocator<B>> + '_ {
                    self.inner.$write().unwrap_or_else(PoisonError::into_inner)
                }

                fn read(&self) -> impl core::ops::Deref<Target = BuddyAllocator<B>> + '_ {
                    self.inner.$read().unwrap_or_else(PoisonError::into_inner)
                }
            }

            impl<B> fmt::Debug for $wrapper<B> {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.debug_struct(stringify!($wrapper)).finish_non_exhaustive()
                }
            }
        )*
    };
}

#[cfg(feature = "std")]
declare_wrappers! {
    #[cfg_attr(docs_rs, doc(cfg(feature = "std")))]
    MutexBuddyAllocator uses Mutex via lock / lock

    #[cfg_attr(docs_rs, doc(cfg(feature = "std")))]
    RwLockBuddyAllocator uses RwLock via write / read
}
