#![no_main]
use arena_hater::Evaluator;
use buddy_arena_hater::{BuddySubject, FuzzArgs};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|args: FuzzArgs| {
    // Zero page sizes and ceilings are rejected at construction.
    let buddy = match BuddySubject::new(args.page_count(), args.max_alloc_pages, args.page_size) {
        Ok(b) => b,
        Err(_) => return,
    };

    let mut eval = Evaluator::new(buddy);
    eval.evaluate(args.ops).unwrap();
});
