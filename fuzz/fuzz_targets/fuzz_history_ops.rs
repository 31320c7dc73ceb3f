#![no_main]

use arbitrary::Arbitrary;
use bounded_history::{DeferredQueue, HistoryConfig, HistoryEngine, ManualClock, Patch, PatchComposer};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Op {
    Push { key: u8, value: u16 },
    ReplaceTop { key: u8, value: u16 },
    Undo,
    Redo,
    Pause(bool),
    RunListeners,
}

#[derive(Debug, Arbitrary)]
struct Input {
    max_undo_steps: u8,
    total_threshold_bytes: u16,
    is_free_threshold_bytes: u8,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    // Keep the ceiling positive and at least the free threshold.
    let threshold = usize::from(input.total_threshold_bytes).max(1);
    let free = usize::from(input.is_free_threshold_bytes).min(threshold);
    let config = HistoryConfig::new(usize::from(input.max_undo_steps), threshold, free);

    let queue = DeferredQueue::new();
    let mut history = HistoryEngine::new(
        Patch::new(),
        PatchComposer::<u8, u16>::new(),
        queue.clone(),
    )
    .with_config(config)
    .with_clock(ManualClock::new(0));
    let _guard = history.add_listener(|_| {});

    let mut last_change = history.change_count();
    for op in input.ops.iter().take(512) {
        match *op {
            Op::Push { key, value } => {
                history.push(Patch::new().with(key, value));
            }
            Op::ReplaceTop { key, value } => {
                history.push_replacing_top(Patch::new().with(key, value));
            }
            Op::Undo => {
                history.undo();
            }
            Op::Redo => {
                history.redo();
            }
            Op::Pause(paused) => history.pause(paused),
            Op::RunListeners => {
                queue.run_pending();
            }
        }

        // Post-conditions that must always hold:
        assert!(!history.is_empty(), "history lost its last entry");
        assert!(history.index() < history.len(), "cursor OOB");
        assert!(history.total_index() >= history.index_offset());
        assert!(
            history.memory_usage() <= threshold || history.len() == 1,
            "byte ceiling exceeded with {} entries",
            history.len()
        );
        assert!(history.change_count() >= last_change, "change_count went backwards");
        last_change = history.change_count();
    }
    queue.run_pending();
});
