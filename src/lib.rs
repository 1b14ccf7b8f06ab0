//! A fixed-region buddy sub-allocator.
//!
//! A [`BuddyAllocator`] takes ownership of one contiguous byte buffer, splits it
//! into equal-size pages and hands out blocks whose page count is a power of
//! two. Free space is tracked with a complete binary tree over the pages in
//! which every node caches the largest free order available beneath it, so
//! both allocation and deallocation run in time proportional to the height of
//! the tree.
//!
//! ```
//! use buddy_arena::BuddyAllocator;
//!
//! // 64 pages of 1 byte each; no single allocation may exceed 16 pages.
//! let mut buddy = BuddyAllocator::new(vec![0u8; 64], 16, 1).unwrap();
//!
//! let block = buddy.allocate(5).unwrap();
//! assert_eq!(block.offset(), 0);
//! assert_eq!(block.len(), 5);
//! assert_eq!(block.pages(), 8);
//!
//! buddy.free(block.offset()).unwrap();
//! assert_eq!(buddy.stats().max_free_order, Some(6));
//! ```

#![doc(html_root_url = "https://docs.rs/buddy_arena/0.1.0")]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docs_rs, feature(doc_cfg))]

extern crate alloc;

pub mod buddy;
pub mod order;
mod stats;
mod tree;


use core::fmt;

pub use crate::{
    buddy::{Block, BuddyAllocator},
    stats::BuddyStats,
};

#[cfg(feature = "std")]
pub use crate::buddy::{MutexBuddyAllocator, RwLockBuddyAllocator};

/// The error type for allocator constructors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocInitError {
    /// The page size was zero.
    ZeroPageSize,

    /// The buffer length is not a whole number of pages.
    ///
    /// Trailing bytes are never silently discarded; the caller must trim the
    /// buffer itself if that is what it wants.
    UnalignedBuffer {
        /// Length of the rejected buffer, in bytes.
        len: usize,
        /// The requested page size.
        page_size: usize,
    },

    /// The buffer holds no pages at all.
    EmptyArena,

    /// The buffer holds a number of pages which is not a power of two.
    PageCountNotPowerOfTwo {
        /// The number of pages in the rejected buffer.
        page_count: usize,
    },

    /// The per-allocation ceiling was zero pages.
    ZeroMaxAlloc,

    /// The requested arena does not fit in the address space.
    ArenaTooLarge {
        /// The requested number of pages.
        page_count: usize,
        /// The requested page size.
        page_size: usize,
    },
}

impl fmt::Display for AllocInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocInitError::ZeroPageSize => f.write_str("page size must be nonzero"),
            AllocInitError::UnalignedBuffer { len, page_size } => write!(
                f,
                "buffer length {len} is not a multiple of the page size {page_size}"
            ),
            AllocInitError::EmptyArena => f.write_str("buffer contains no pages"),
            AllocInitError::PageCountNotPowerOfTwo { page_count } => {
                write!(f, "page count {page_count} is not a power of two")
            }
            AllocInitError::ZeroMaxAlloc => {
                f.write_str("maximum allocation size must be at least one page")
            }
            AllocInitError::ArenaTooLarge {
                page_count,
                page_size,
            } => write!(
                f,
                "arena of {page_count} pages of {page_size} bytes exceeds isize::MAX bytes"
            ),
        }
    }
}

/// Indicates an allocation failure due to resource exhaustion or an unsupported
/// request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// A zero-sized allocation was requested.
    ZeroSize,

    /// The request rounds up past the configured per-allocation ceiling.
    ExceedsMaxAllocatable {
        /// The order the request rounded up to.
        requested_order: u8,
        /// The largest order the allocator was configured to hand out.
        max_order: u8,
    },

    /// No free block of a sufficient order is currently available.
    OutOfMemory {
        /// The order the request rounded up to.
        requested_order: u8,
        /// The largest free order in the arena, if any page is free at all.
        max_free_order: Option<u8>,
    },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::ZeroSize => f.write_str("zero-sized allocation"),
            AllocError::ExceedsMaxAllocatable {
                requested_order,
                max_order,
            } => write!(
                f,
                "allocation of {} pages exceeds the maximum of {} pages",
                pages_of(*requested_order),
                pages_of(*max_order)
            ),
            AllocError::OutOfMemory {
                requested_order,
                max_free_order,
            } => {
                let max_free = max_free_order.map_or(0, pages_of);
                write!(
                    f,
                    "no free block of {} pages, largest free block is {} pages",
                    pages_of(*requested_order),
                    max_free
                )
            }
        }
    }
}

/// Page count of a block of the given order.
///
/// Oversized requests report an order of `usize::BITS`, which would overflow a
/// `usize` shift.
fn pages_of(order: u8) -> u128 {
    1u128 << order
}

/// The error type for deallocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FreeError {
    /// The offset does not name a live allocation.
    ///
    /// This is returned for double frees and for offsets that were never
    /// handed out by this allocator.
    UnknownAllocation {
        /// The offending byte offset.
        offset: usize,
    },
}

impl fmt::Display for FreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreeError::UnknownAllocation { offset } => {
                write!(f, "no live allocation at offset {offset:#x}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AllocInitError {}

#[cfg(feature = "std")]
impl std::error::Error for AllocError {}

#[cfg(feature = "std")]
impl std::error::Error for FreeError {}
