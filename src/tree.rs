//! The order tree.
//!
//! A complete binary tree over the pages of an arena, stored breadth-first in a
//! flat array: the root lives at index 0 and node `i` has children `2i + 1` and
//! `2i + 2`. Each node holds the order of the largest fully free block in its
//! subtree, or [`ALLOCATED`] if nothing beneath it is free.
//!
//! A node at depth `d` covers `2^(level - d)` pages. Allocating a block marks a
//! single node at the block's order; the nodes beneath it keep the values they
//! had while free, which is exactly what they must hold again once the block is
//! released.

use alloc::vec::Vec;
use core::{cmp, iter};

/// Marks a node with no free pages beneath it.
pub(crate) const ALLOCATED: i8 = -1;

#[inline]
fn left_child(index: usize) -> usize {
    2 * index + 1
}

#[inline]
fn parent(index: usize) -> usize {
    (index + 1) / 2 - 1
}

pub(crate) struct OrderTree {
    level: u8,
    nodes: Vec<i8>,
}

impl OrderTree {
    /// Builds a fully free tree over `2^level` pages.
    pub fn new(level: u8) -> OrderTree {
        assert!(u32::from(level) < usize::BITS - 1, "tree level overflows usize");

        let page_count = 1usize << level;
        let mut nodes = Vec::with_capacity(2 * page_count - 1);

        for depth in 0..=level {
            let order = (level - depth) as i8;
            nodes.extend(iter::repeat(order).take(1 << depth));
        }

        debug_assert_eq!(nodes.len(), 2 * page_count - 1);

        OrderTree { level, nodes }
    }

    /// The order of the root, i.e. of the whole arena.
    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        1 << self.level
    }

    #[inline]
    pub fn nodes(&self) -> &[i8] {
        &self.nodes
    }

    /// Returns the nodes at each depth, starting from the root.
    pub fn rows(&self) -> impl Iterator<Item = &[i8]> + '_ {
        (0..=self.level).map(move |depth| {
            let start = (1usize << depth) - 1;
            &self.nodes[start..2 * start + 1]
        })
    }

    /// Returns the order of the largest free block, if any page is free.
    #[inline]
    pub fn max_free_order(&self) -> Option<u8> {
        u8::try_from(self.nodes[0]).ok()
    }

    /// Reserves a block of `2^order` pages and returns its page offset.
    ///
    /// The leftmost node of a sufficient order is chosen; the descent never
    /// backtracks. Returns `None` without modifying the tree if no free block
    /// of `order` exists.
    pub fn reserve(&mut self, order: u8) -> Option<usize> {
        debug_assert!(order <= self.level);

        let want = order as i8;
        if self.nodes[0] < want {
            return None;
        }

        let mut index = 0;
        for _ in order..self.level {
            let left = left_child(index);
            index = if self.nodes[left] >= want {
                left
            } else {
                left + 1
            };
        }

        // A node can never hold more than its own order, and the descent only
        // enters nodes holding at least `want`.
        debug_assert_eq!(self.nodes[index], want);

        self.nodes[index] = ALLOCATED;
        self.refresh_ancestors(index, order);

        Some(self.page_offset(index, order))
    }

    /// Releases the block of `2^order` pages starting at `page_offset`,
    /// coalescing it with its buddies as far up the tree as possible.
    ///
    /// The block must have been returned by `reserve(order)`.
    pub fn release(&mut self, page_offset: usize, order: u8) {
        let index = self.index_of(page_offset, order);
        debug_assert_eq!(self.nodes[index], ALLOCATED, "block is not allocated");

        self.nodes[index] = order as i8;
        self.refresh_ancestors(index, order);
    }

    /// Recomputes every ancestor of `index`, a node of order `order`.
    ///
    /// A parent whose children are both entirely free becomes a single free
    /// block of the next order; otherwise it takes the larger of its
    /// children's values.
    fn refresh_ancestors(&mut self, mut index: usize, order: u8) {
        let mut child_order = order as i8;

        while index != 0 {
            index = parent(index);

            let left = self.nodes[left_child(index)];
            let right = self.nodes[left_child(index) + 1];

            self.nodes[index] = if left == child_order && right == child_order {
                child_order + 1
            } else {
                cmp::max(left, right)
            };

            child_order += 1;
        }
    }

    /// Converts a node index of the given order to the offset of its first
    /// page.
    #[inline]
    fn page_offset(&self, index: usize, order: u8) -> usize {
        ((index + 1) << order) - self.page_count()
    }

    /// Returns the index of the node of the given order whose first page is
    /// `page_offset`.
    #[inline]
    fn index_of(&self, page_offset: usize, order: u8) -> usize {
        debug_assert_eq!(page_offset & ((1 << order) - 1), 0, "misaligned block");

        (page_offset >> order) + (self.page_count() >> order) - 1
    }
}

#[cfg(test)]
impl OrderTree {
    /// Recomputes every node not hidden under an allocated node from its
    /// children and reports whether the stored orders all match.
    pub(crate) fn is_consistent(&self) -> bool {
        self.nodes.len() == 2 * self.page_count() - 1 && self.recompute(0, self.level).is_some()
    }

    fn recompute(&self, index: usize, order: u8) -> Option<i8> {
        let value = self.nodes[index];

        if value == ALLOCATED {
            return Some(value);
        }

        if order == 0 {
            return (value == 0).then_some(value);
        }

        let left = self.recompute(left_child(index), order - 1)?;
        let right = self.recompute(left_child(index) + 1, order - 1)?;
        let child_order = order as i8 - 1;

        let expected = if left == child_order && right == child_order {
            order as i8
        } else {
            cmp::max(left, right)
        };

        (value == expected).then_some(value)
    }
}
