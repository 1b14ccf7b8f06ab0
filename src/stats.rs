//! Allocator diagnostics.

use core::fmt::{self, Write};

use crate::tree::OrderTree;

/// A snapshot of an allocator's configuration and occupancy.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BuddyStats {
    /// Size of a page, in bytes.
    pub page_size: usize,
    /// Number of pages in the arena.
    pub page_count: usize,
    /// Order of the whole arena, i.e. `log2(page_count)`.
    pub level: u8,
    /// Order of the largest block a single allocation may reserve.
    pub max_alloc_order: u8,
    /// Order of the largest block currently free, or `None` if the arena is
    /// full.
    pub max_free_order: Option<u8>,
    /// Number of pages not reserved by any live allocation.
    pub free_pages: usize,
    /// Number of live allocations.
    pub live_allocations: usize,
}

impl BuddyStats {
    /// Number of pages reserved by live allocations, including the unused
    /// tails of blocks rounded up to a power of two.
    #[inline]
    pub fn used_pages(&self) -> usize {
        self.page_count - self.free_pages
    }

    /// Size of the arena in bytes.
    #[inline]
    pub fn total_bytes(&self) -> usize {
        self.page_count * self.page_size
    }

    /// Size of the free pages in bytes.
    #[inline]
    pub fn free_bytes(&self) -> usize {
        self.free_pages * self.page_size
    }
}

impl fmt::Display for BuddyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "buddy arena:")?;
        writeln!(f, "\tpage size:   {}", self.page_size)?;
        writeln!(f, "\tpage count:  {}", self.page_count)?;
        writeln!(f, "\tlevel:       {}", self.level)?;
        writeln!(f, "\tmax alloc:   {}", self.max_alloc_order)?;
        match self.max_free_order {
            Some(order) => writeln!(f, "\tmax free:    {order}")?,
            None => writeln!(f, "\tmax free:    -")?,
        }
        writeln!(f, "\tfree pages:  {}", self.free_pages)?;
        writeln!(f, "\tlive allocs: {}", self.live_allocations)
    }
}

/// Writes `stats` followed by the tree, one depth per line.
pub(crate) fn write_dump<W: Write>(
    out: &mut W,
    stats: &BuddyStats,
    tree: &OrderTree,
) -> fmt::Result {
    write!(out, "{stats}")?;
    writeln!(out, "tree:")?;

    for (depth, row) in tree.rows().enumerate() {
        let order = usize::from(tree.level()) - depth;
        write!(out, "\torder {order:>2} [{:>4}]:", row.len())?;

        for value in row {
            write!(out, " {value:>2}")?;
        }

        writeln!(out)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::prelude::rust_2021::*;

    use super::*;

    fn stats_for(tree: &OrderTree) -> BuddyStats {
        BuddyStats {
            page_size: 4096,
            page_count: tree.page_count(),
            level: tree.level(),
            max_alloc_order: 1,
            max_free_order: tree.max_free_order(),
            free_pages: tree.page_count(),
            live_allocations: 0,
        }
    }

    #[test]
    fn dump_lists_every_depth() {
        let mut tree = OrderTree::new(2);
        tree.reserve(0).unwrap();

        let mut out = String::new();
        write_dump(&mut out, &stats_for(&tree), &tree).unwrap();

        let rows: Vec<&str> = out.lines().skip_while(|l| *l != "tree:").skip(1).collect();
        assert_eq!(
            rows,
            [
                "\torder  2 [   1]:  1",
                "\torder  1 [   2]:  0  1",
                "\torder  0 [   4]: -1  0  0  0",
            ]
        );
    }

    #[test]
    fn full_arena_shows_no_free_order() {
        let mut tree = OrderTree::new(0);
        tree.reserve(0).unwrap();

        let text = stats_for(&tree).to_string();
        assert!(text.contains("\tmax free:    -\n"));
    }

    #[test]
    fn derived_sizes() {
        let stats = BuddyStats {
            page_size: 16,
            page_count: 8,
            level: 3,
            max_alloc_order: 2,
            max_free_order: Some(2),
            free_pages: 5,
            live_allocations: 2,
        };

        assert_eq!(stats.used_pages(), 3);
        assert_eq!(stats.total_bytes(), 128);
        assert_eq!(stats.free_bytes(), 80);
    }
}
