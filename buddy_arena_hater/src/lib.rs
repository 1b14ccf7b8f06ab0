use arbitrary::{Arbitrary, Unstructured};
use arena_hater::{AllocatorOp, Subject};
use buddy_arena::{AllocError, AllocInitError, Block, BuddyAllocator, FreeError};

const MAX_LEVEL: u8 = 12;
const MAX_PAGE_SIZE: usize = 4096;

/// Arena geometry and an operation stream, as fed to the fuzz targets.
///
/// Page sizes and ceilings may be zero, so some inputs are rejected at
/// construction.
#[derive(Clone, Debug)]
pub struct FuzzArgs {
    pub level: u8,
    pub page_size: usize,
    pub max_alloc_pages: usize,
    pub ops: Vec<AllocatorOp>,
}

impl FuzzArgs {
    pub fn page_count(&self) -> usize {
        1 << self.level
    }
}

impl Arbitrary<'_> for FuzzArgs {
    fn arbitrary(un: &mut Unstructured) -> arbitrary::Result<FuzzArgs> {
        let level = u8::arbitrary(un)? % (MAX_LEVEL + 1);
        let page_size = usize::arbitrary(un)? % MAX_PAGE_SIZE;
        let max_alloc_pages = usize::arbitrary(un)? % (2 << level);
        let ops = Vec::arbitrary(un)?;

        Ok(FuzzArgs {
            level,
            page_size,
            max_alloc_pages,
            ops,
        })
    }
}

pub struct BuddySubject {
    buddy: BuddyAllocator,
    pristine: Vec<i8>,
}

impl BuddySubject {
    pub fn new(
        page_count: usize,
        max_alloc_pages: usize,
        page_size: usize,
    ) -> Result<Self, AllocInitError> {
        let buddy = BuddyAllocator::with_capacity(page_count, max_alloc_pages, page_size)?;
        let pristine = buddy.tree_orders().to_vec();

        Ok(BuddySubject { buddy, pristine })
    }

    pub fn allocator(&self) -> &BuddyAllocator {
        &self.buddy
    }
}

impl Subject for BuddySubject {
    type Block = Block;
    type AllocError = AllocError;
    type FreeError = FreeError;

    fn allocate(&mut self, size: usize) -> Result<Block, AllocError> {
        self.buddy.allocate(size)
    }

    fn deallocate(&mut self, block: Block) -> Result<(), FreeError> {
        self.buddy.deallocate(block)
    }

    fn bytes_mut(&mut self, block: &Block) -> &mut [u8] {
        self.buddy
            .block_bytes_mut(block)
            .expect("evaluator presented a block that is not live")
    }

    fn is_pristine(&self) -> bool {
        let stats = self.buddy.stats();

        self.buddy.tree_orders() == &self.pristine[..]
            && stats.live_allocations == 0
            && stats.free_pages == stats.page_count
    }
}

/// Frees through raw pointers rather than offsets.
pub struct BuddyPtrSubject(BuddySubject);

impl BuddyPtrSubject {
    pub fn new(
        page_count: usize,
        max_alloc_pages: usize,
        page_size: usize,
    ) -> Result<Self, AllocInitError> {
        BuddySubject::new(page_count, max_alloc_pages, page_size).map(BuddyPtrSubject)
    }
}

impl Subject for BuddyPtrSubject {
    type Block = Block;
    type AllocError = AllocError;
    type FreeError = FreeError;

    fn allocate(&mut self, size: usize) -> Result<Block, AllocError> {
        self.0.allocate(size)
    }

    fn deallocate(&mut self, block: Block) -> Result<(), FreeError> {
        let ptr = self
            .0
            .buddy
            .block_ptr(&block)
            .ok_or(FreeError::UnknownAllocation {
                offset: block.offset(),
            })?;

        self.0.buddy.free_ptr(ptr.cast())
    }

    fn bytes_mut(&mut self, block: &Block) -> &mut [u8] {
        self.0.bytes_mut(block)
    }

    fn is_pristine(&self) -> bool {
        self.0.is_pristine()
    }
}
