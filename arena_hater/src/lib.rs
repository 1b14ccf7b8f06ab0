//! A small library for ~~hating on~~ evaluating the correctness of arena
//! allocators.
//!
//! An arena allocator lends out byte ranges of a buffer it owns. The
//! [`Evaluator`] drives a [`Subject`] through a sequence of operations, paints
//! every live allocation with the ID of the operation that created it, and
//! checks the paint is intact when the allocation is freed. Overlapping
//! allocations show up as clobbered paint.

use std::fmt::Debug;

/// Largest size requested by an arbitrary allocation, in bits.
const SIZE_LIMIT_BITS: u8 = 20;

/// An allocation size which implements `Arbitrary`.
///
/// Sizes are spread evenly across powers of two rather than across the whole
/// `usize` range, so that most requests are satisfiable.
#[derive(Copy, Clone, Debug)]
pub struct ArbSize(pub usize);

impl arbitrary::Arbitrary<'_> for ArbSize {
    fn arbitrary(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Self> {
        let exp = u8::arbitrary(u)? % (SIZE_LIMIT_BITS + 1);
        let size = usize::arbitrary(u)? % (1 << exp);

        Ok(ArbSize(size))
    }
}

#[derive(arbitrary::Arbitrary)]
enum AllocatorOpTag {
    Alloc,
    Dealloc,
}

#[derive(Clone, Debug)]
pub enum AllocatorOp {
    /// Allocate this many bytes.
    Alloc(usize),
    /// Free an outstanding allocation.
    ///
    /// Given `n` outstanding allocations, the allocation to free is at index
    /// `index % n`.
    Dealloc(usize),
}

impl arbitrary::Arbitrary<'_> for AllocatorOp {
    fn arbitrary(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Self> {
        let tag = AllocatorOpTag::arbitrary(u)?;

        let op = match tag {
            AllocatorOpTag::Alloc => AllocatorOp::Alloc(ArbSize::arbitrary(u)?.0),
            AllocatorOpTag::Dealloc => AllocatorOp::Dealloc(usize::arbitrary(u)?),
        };

        Ok(op)
    }
}

pub trait Subject {
    /// A handle to a live allocation.
    type Block;
    type AllocError: Debug;
    type FreeError: Debug;

    /// Allocates `size` bytes.
    fn allocate(&mut self, size: usize) -> Result<Self::Block, Self::AllocError>;

    /// Frees `block`.
    fn deallocate(&mut self, block: Self::Block) -> Result<(), Self::FreeError>;

    /// Returns the bytes lent to `block`.
    ///
    /// `block` is always a live allocation of this subject.
    fn bytes_mut(&mut self, block: &Self::Block) -> &mut [u8];

    /// Checks internal consistency once every allocation has been freed.
    fn is_pristine(&self) -> bool {
        true
    }
}

/// A list of allocated blocks.
struct Blocks<B> {
    blocks: Vec<Block<B>>,
}

impl<B> Blocks<B> {
    fn new() -> Blocks<B> {
        Blocks { blocks: Vec::new() }
    }

    fn push(&mut self, block: Block<B>) {
        self.blocks.push(block);
    }

    fn remove_modulo(&mut self, idx: usize) -> Option<Block<B>> {
        let len = self.blocks.len();
        (len != 0).then(|| self.blocks.swap_remove(idx % len))
    }
}

/// An allocated block of memory.
struct Block<B> {
    handle: B,
    // The unique ID of the last operation that wrote to this allocation.
    id: u64,
}

fn paint(slice: &mut [u8], id: u64) {
    let id_bytes = id.to_le_bytes().into_iter().cycle();

    for (byte, value) in slice.iter_mut().zip(id_bytes) {
        *byte = value;
    }
}

fn verify(slice: &[u8], id: u64) -> bool {
    let id_bytes = id.to_le_bytes().into_iter().cycle();

    slice.iter().zip(id_bytes).all(|(byte, value)| *byte == value)
}

pub struct Evaluator<S: Subject> {
    subject: S,
}

/// Why an evaluation failed.
#[derive(Clone, Debug)]
pub enum Failure {
    /// An allocation's contents were overwritten while it was live.
    Corrupted,
    /// Freeing a live allocation was refused.
    FreeRefused(String),
    /// The subject was not back in its initial state after every allocation
    /// was freed.
    Leaked,
}

#[derive(Clone, Debug)]
pub struct Failed {
    pub completed: Vec<AllocatorOp>,
    pub failed_op: Option<AllocatorOp>,
    pub failure: Failure,
}

impl<S: Subject> Evaluator<S> {
    pub fn new(subject: S) -> Evaluator<S> {
        Evaluator { subject }
    }

    pub fn into_subject(self) -> S {
        self.subject
    }

    pub fn evaluate<I>(&mut self, ops: I) -> Result<(), Failed>
    where
        I: IntoIterator<Item = AllocatorOp>,
    {
        let mut completed = Vec::new();
        let mut blocks = Blocks::new();

        for (op_id, op) in ops.into_iter().enumerate() {
            let op_id: u64 = op_id.try_into().unwrap();
            match op {
                AllocatorOp::Alloc(size) => {
                    let handle = match self.subject.allocate(size) {
                        Ok(h) => h,
                        Err(_) => continue,
                    };

                    paint(self.subject.bytes_mut(&handle), op_id);
                    blocks.push(Block { handle, id: op_id });
                }

                AllocatorOp::Dealloc(raw_idx) => {
                    let block = match blocks.remove_modulo(raw_idx) {
                        Some(b) => b,
                        None => continue,
                    };

                    let bytes = self.subject.bytes_mut(&block.handle);
                    if !verify(bytes, block.id) {
                        return Err(Failed {
                            completed,
                            failed_op: Some(op),
                            failure: Failure::Corrupted,
                        });
                    }

                    paint(bytes, op_id);

                    if let Err(e) = self.subject.deallocate(block.handle) {
                        return Err(Failed {
                            completed,
                            failed_op: Some(op),
                            failure: Failure::FreeRefused(format!("{e:?}")),
                        });
                    }
                }
            }

            completed.push(op);
        }

        for block in blocks.blocks {
            let intact = verify(self.subject.bytes_mut(&block.handle), block.id);
            let freed = self.subject.deallocate(block.handle);

            let failure = match (intact, freed) {
                (false, _) => Failure::Corrupted,
                (true, Err(e)) => Failure::FreeRefused(format!("{e:?}")),
                (true, Ok(())) => continue,
            };

            return Err(Failed {
                completed,
                failed_op: None,
                failure,
            });
        }

        if !self.subject.is_pristine() {
            return Err(Failed {
                completed,
                failed_op: None,
                failure: Failure::Leaked,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands out the same range over and over.
    struct Overlapping {
        buf: Vec<u8>,
    }

    impl Subject for Overlapping {
        type Block = usize;
        type AllocError = ();
        type FreeError = ();

        fn allocate(&mut self, size: usize) -> Result<usize, ()> {
            (size > 0 && size <= self.buf.len()).then_some(size).ok_or(())
        }

        fn deallocate(&mut self, _: usize) -> Result<(), ()> {
            Ok(())
        }

        fn bytes_mut(&mut self, &size: &usize) -> &mut [u8] {
            &mut self.buf[..size]
        }
    }

    #[test]
    fn overlap_is_detected() {
        let mut eval = Evaluator::new(Overlapping { buf: vec![0; 64] });

        let failed = eval
            .evaluate([
                AllocatorOp::Alloc(16),
                AllocatorOp::Alloc(16),
                AllocatorOp::Dealloc(0),
            ])
            .unwrap_err();

        assert!(matches!(failed.failure, Failure::Corrupted));
        assert_eq!(failed.completed.len(), 2);
    }

    #[test]
    fn disjoint_allocations_pass() {
        let mut eval = Evaluator::new(Overlapping { buf: vec![0; 64] });

        eval.evaluate([AllocatorOp::Alloc(8), AllocatorOp::Dealloc(3)])
            .unwrap();
    }
}
