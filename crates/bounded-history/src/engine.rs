#![forbid(unsafe_code)]

//! The bounded-memory history engine.
//!
//! [`HistoryEngine`] keeps a linear list of [`Entry`] values and a cursor
//! into it. Pushing truncates the redo tail and appends; undo and redo move
//! the cursor. After every push the list is compacted (see
//! [`crate::compaction`]) so that both the number of individually retained
//! steps and the summed byte estimates stay within [`HistoryConfig`].
//!
//! # Invariants
//!
//! 1. `entries` is never empty.
//! 2. `index < entries.len()`.
//! 3. `composed` equals the composition of `entries[..=index]`.
//! 4. `total_index()` equals the number of pushes applied on the current
//!    branch minus undos, regardless of how much history was folded.
//! 5. `change_count` increases by one per push, undo or redo call (paused
//!    pushes excluded).
//!
//! # Example
//!
//! ```text
//! new(seed)            [seed]                 index 0  total 0
//! push(a) push(b)      [seed a b]             index 2  total 2
//! undo()               [seed a b]             index 1  total 1
//! push(c)              [seed a c]             index 2  total 2
//! ```

use std::fmt;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::compaction::{self, total_bytes};
use crate::composer::Composer;
use crate::config::HistoryConfig;
use crate::entry::Entry;
use crate::notify::{
    ChangeKind, HistoryEvent, ListenerGuard, Listeners, PushOutcome, Scheduler,
};

/// Options for [`HistoryEngine::push_with`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOptions {
    /// Replace the current top entry instead of stacking a new step.
    pub replace_top: bool,
    /// Description stored on the entry.
    pub description: Option<String>,
}

impl PushOptions {
    /// Plain push.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current top entry.
    #[must_use]
    pub fn replace_top(mut self, replace_top: bool) -> Self {
        self.replace_top = replace_top;
        self
    }

    /// Attach a description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Point-in-time engine metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryStats {
    /// Retained entries, including the redo tail.
    pub retained: usize,
    /// Cursor into the retained entries.
    pub index: usize,
    /// Logical positions folded away by compaction.
    pub index_offset: u64,
    /// `index_offset + index`.
    pub total_index: u64,
    /// Summed byte estimates of retained entries.
    pub memory_usage: usize,
    /// Mutation counter.
    pub change_count: u64,
    /// Pause nesting depth.
    pub pause_depth: usize,
}

/// Undo/redo history with step and memory budgets.
///
/// Single-threaded: all calls are expected on one logical thread. Listener
/// callbacks are never run from inside a mutating call; they are handed to
/// the [`Scheduler`] given at construction.
pub struct HistoryEngine<P, C> {
    entries: Vec<Entry<P>>,
    index: usize,
    index_offset: u64,
    composed: Arc<P>,
    pause_depth: usize,
    change_count: u64,
    config: HistoryConfig,
    composer: C,
    clock: Box<dyn Clock>,
    scheduler: Box<dyn Scheduler>,
    listeners: Listeners<P>,
}

impl<P, C> fmt::Debug for HistoryEngine<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryEngine")
            .field("retained", &self.entries.len())
            .field("index", &self.index)
            .field("index_offset", &self.index_offset)
            .field("memory_usage", &total_bytes(&self.entries))
            .field("pause_depth", &self.pause_depth)
            .field("change_count", &self.change_count)
            .field("listeners", &self.listeners.len())
            .field("config", &self.config)
            .finish()
    }
}

impl<P, C> HistoryEngine<P, C>
where
    P: Clone + 'static,
    C: Composer<P>,
{
    /// Create an engine whose only entry is `seed`.
    ///
    /// The seed is also the initial composed state. Uses
    /// [`HistoryConfig::default`] and the system clock; see
    /// [`with_config`](Self::with_config) and [`with_clock`](Self::with_clock).
    #[must_use]
    pub fn new(seed: P, composer: C, scheduler: impl Scheduler + 'static) -> Self {
        let clock: Box<dyn Clock> = Box::new(SystemClock);
        let bytes = composer.estimate_bytes(&seed);
        let seed_entry = Entry::new(clock.now_ms(), bytes, seed.clone(), None);
        Self {
            entries: vec![seed_entry],
            index: 0,
            index_offset: 0,
            composed: Arc::new(seed),
            pause_depth: 0,
            change_count: 0,
            config: HistoryConfig::default(),
            composer,
            clock,
            scheduler: Box::new(scheduler),
            listeners: Listeners::default(),
        }
    }

    /// Replace the budgets. Takes effect at the next push.
    #[must_use]
    pub fn with_config(mut self, config: HistoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the timestamp source.
    ///
    /// If nothing has happened yet, the seed entry is re-stamped with the new
    /// clock.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        if self.change_count == 0 && self.entries.len() == 1 {
            let seed = self.entries.remove(0);
            let bytes = seed.memory_estimate_bytes();
            self.entries.push(Entry::new(
                self.clock.now_ms(),
                bytes,
                seed.into_data(),
                None,
            ));
        }
        self
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Record a new step, discarding any redo tail.
    pub fn push(&mut self, data: P) -> PushOutcome {
        self.push_with(data, PushOptions::new())
    }

    /// Replace the current top step with `data`.
    ///
    /// The previous top (and any redo tail) is dropped. The new entry is kept
    /// only if it changes the state composed up to the entry below; otherwise
    /// the net effect of the interaction was nothing and the cursor stays one
    /// step lower. At the oldest entry this behaves like [`push`](Self::push).
    pub fn push_replacing_top(&mut self, data: P) -> PushOutcome {
        self.push_with(data, PushOptions::new().replace_top(true))
    }

    /// Push with explicit options.
    pub fn push_with(&mut self, data: P, options: PushOptions) -> PushOutcome {
        if self.is_paused() {
            tracing::debug!(
                target: "history.engine",
                pause_depth = self.pause_depth,
                "push ignored while paused"
            );
            return PushOutcome::Paused;
        }

        let bytes = self.composer.estimate_bytes(&data);
        let entry = Entry::new(self.clock.now_ms(), bytes, data, options.description);

        let outcome = if options.replace_top && self.index > 0 {
            self.index -= 1;
            self.entries.truncate(self.index + 1);
            let reference = self.compose_through(self.index);
            if self.composer.causes_change(entry.data(), &reference) {
                self.entries.push(entry);
                PushOutcome::Replaced
            } else {
                PushOutcome::Suppressed
            }
        } else {
            self.entries.truncate(self.index + 1);
            self.entries.push(entry);
            PushOutcome::Appended
        };

        let entries = std::mem::take(&mut self.entries);
        let (entries, compaction) = compaction::compact(entries, &self.config, &self.composer);
        self.entries = entries;
        self.index_offset += compaction.positions_folded as u64;
        self.index = self.entries.len() - 1;

        self.refresh(ChangeKind::Push(outcome));

        tracing::debug!(
            target: "history.engine",
            outcome = ?outcome,
            bytes,
            total_index = self.total_index(),
            retained = self.entries.len(),
            folds = compaction.folds,
            change_count = self.change_count,
            "push"
        );

        outcome
    }

    /// Step back one entry. At the oldest retained entry the position is
    /// unchanged, but the call still counts as a mutation.
    ///
    /// Returns the entry now current.
    #[doc(alias = "decrease_index")]
    pub fn undo(&mut self) -> &Entry<P> {
        if self.index > 0 {
            self.index -= 1;
        }
        self.refresh(ChangeKind::Undo);
        tracing::trace!(
            target: "history.engine",
            total_index = self.total_index(),
            "undo"
        );
        &self.entries[self.index]
    }

    /// Step forward one entry. At the newest entry the position is unchanged,
    /// but the call still counts as a mutation.
    ///
    /// Returns the entry now current.
    #[doc(alias = "increase_index")]
    pub fn redo(&mut self) -> &Entry<P> {
        if self.index + 1 < self.entries.len() {
            self.index += 1;
        }
        self.refresh(ChangeKind::Redo);
        tracing::trace!(
            target: "history.engine",
            total_index = self.total_index(),
            "redo"
        );
        &self.entries[self.index]
    }

    /// Same as [`undo`](Self::undo).
    pub fn decrease_index(&mut self) -> &Entry<P> {
        self.undo()
    }

    /// Same as [`redo`](Self::redo).
    pub fn increase_index(&mut self) -> &Entry<P> {
        self.redo()
    }

    /// `pause(true)` nests one level of push suppression; `pause(false)`
    /// removes one, never going below zero.
    pub fn pause(&mut self, paused: bool) {
        if paused {
            self.pause_depth += 1;
        } else {
            self.pause_depth = self.pause_depth.saturating_sub(1);
        }
        tracing::debug!(
            target: "history.engine",
            pause_depth = self.pause_depth,
            "pause depth changed"
        );
    }

    /// Run `f` with pushes suppressed, then resume.
    ///
    /// Lets a compound operation that pushes internally be recorded as a
    /// single step by pushing once afterwards. The pause is lifted even if
    /// `f` panics; the panic is then re-raised.
    pub fn paused<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.pause(true);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(self)));
        self.pause(false);
        match result {
            Ok(value) => value,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }

    /// Register a listener called (deferred) after every mutation.
    ///
    /// The listener stays registered while the returned guard is alive.
    pub fn add_listener(
        &mut self,
        listener: impl Fn(&HistoryEvent<P>) + 'static,
    ) -> ListenerGuard {
        self.listeners.add(listener)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// True if an older entry is reachable.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    /// True if a newer entry is reachable.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    /// Retained entries up to and including the current one, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[Entry<P>] {
        &self.entries[..=self.index]
    }

    /// All retained entries, including the redo tail.
    #[must_use]
    pub fn retained(&self) -> &[Entry<P>] {
        &self.entries
    }

    /// The entry at the cursor.
    #[must_use]
    pub fn current(&self) -> &Entry<P> {
        &self.entries[self.index]
    }

    /// Composed payload for the current position.
    #[must_use]
    pub fn composed(&self) -> &Arc<P> {
        &self.composed
    }

    /// Mutation counter; compare against a stored value to detect changes.
    #[must_use]
    pub fn change_count(&self) -> u64 {
        self.change_count
    }

    /// Absolute logical position, stable across compaction.
    #[must_use]
    pub fn total_index(&self) -> u64 {
        self.index_offset + self.index as u64
    }

    /// Logical positions folded away by compaction.
    #[must_use]
    pub fn index_offset(&self) -> u64 {
        self.index_offset
    }

    /// Cursor into the retained entries.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of retained entries, including the redo tail.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false: the engine retains at least one entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True while pushes are suppressed.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.pause_depth > 0
    }

    /// Summed byte estimates of retained entries.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        total_bytes(&self.entries)
    }

    /// Current budgets.
    #[must_use]
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Registered listeners (dropped ones are pruned at the next mutation).
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Descriptions of the steps `undo` would revert, most recent first.
    /// Entries without a description are skipped.
    pub fn undo_descriptions(&self, limit: usize) -> Vec<&str> {
        self.entries[1..=self.index]
            .iter()
            .rev()
            .filter_map(Entry::description)
            .take(limit)
            .collect()
    }

    /// Descriptions of the steps `redo` would re-apply, next first.
    pub fn redo_descriptions(&self, limit: usize) -> Vec<&str> {
        self.entries[self.index + 1..]
            .iter()
            .filter_map(Entry::description)
            .take(limit)
            .collect()
    }

    /// Point-in-time metrics.
    #[must_use]
    pub fn stats(&self) -> HistoryStats {
        HistoryStats {
            retained: self.entries.len(),
            index: self.index,
            index_offset: self.index_offset,
            total_index: self.total_index(),
            memory_usage: self.memory_usage(),
            change_count: self.change_count,
            pause_depth: self.pause_depth,
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn compose_through(&self, index: usize) -> P {
        let payloads: Vec<&P> = self.entries[..=index].iter().map(Entry::data).collect();
        self.composer.compose(&payloads, None)
    }

    /// Recompose, bump the change counter, and schedule listeners.
    fn refresh(&mut self, kind: ChangeKind) {
        self.composed = Arc::new(self.compose_through(self.index));
        self.change_count = self.change_count.wrapping_add(1);

        let event = HistoryEvent {
            kind,
            change_count: self.change_count,
            total_index: self.total_index(),
            composed: Arc::clone(&self.composed),
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
        };
        self.listeners.broadcast(self.scheduler.as_ref(), event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::composer::FnComposer;
    use crate::notify::DeferredQueue;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::rc::Rc;
    use std::sync::Mutex;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::registry::LookupSpan;

    /// Payload: edits applied so far, as ids, with a fixed byte cost.
    #[derive(Debug, Clone, PartialEq)]
    struct Edit {
        ids: Vec<u32>,
        bytes: usize,
    }

    fn edit(id: u32, bytes: usize) -> Edit {
        Edit {
            ids: vec![id],
            bytes,
        }
    }

    type TestComposer = FnComposer<
        fn(&Edit) -> usize,
        fn(&[&Edit], Option<usize>) -> Edit,
        fn(&Edit, &Edit) -> bool,
    >;

    fn estimate(e: &Edit) -> usize {
        e.bytes
    }

    fn compose(parts: &[&Edit], _hint: Option<usize>) -> Edit {
        Edit {
            ids: parts.iter().flat_map(|p| p.ids.iter().copied()).collect(),
            bytes: parts.iter().map(|p| p.bytes).sum(),
        }
    }

    /// An edit with id 0 is a no-op.
    fn causes_change(candidate: &Edit, _reference: &Edit) -> bool {
        candidate.ids.iter().any(|&id| id != 0)
    }

    fn composer() -> TestComposer {
        FnComposer::new(
            estimate as fn(&Edit) -> usize,
            compose as fn(&[&Edit], Option<usize>) -> Edit,
            causes_change as fn(&Edit, &Edit) -> bool,
        )
    }

    fn engine(config: HistoryConfig) -> (HistoryEngine<Edit, TestComposer>, DeferredQueue) {
        let queue = DeferredQueue::new();
        let engine = HistoryEngine::new(edit(100, 10), composer(), queue.clone())
            .with_config(config)
            .with_clock(ManualClock::new(1_000));
        (engine, queue)
    }

    fn unlimited() -> (HistoryEngine<Edit, TestComposer>, DeferredQueue) {
        engine(HistoryConfig::unlimited())
    }

    #[test]
    fn seed_invariant() {
        let (h, _) = unlimited();
        assert_eq!(h.len(), 1);
        assert_eq!(h.index(), 0);
        assert!(!h.can_undo());
        assert!(!h.can_redo());
        assert_eq!(h.total_index(), 0);
        assert_eq!(h.change_count(), 0);
        assert_eq!(**h.composed(), edit(100, 10));
        assert_eq!(h.current().timestamp_ms(), 1_000);
        assert!(!h.is_empty());
    }

    #[test]
    fn push_appends_and_composes() {
        let (mut h, _) = unlimited();
        assert_eq!(h.push(edit(1, 10)), PushOutcome::Appended);
        assert_eq!(h.push(edit(2, 10)), PushOutcome::Appended);

        assert_eq!(h.len(), 3);
        assert_eq!(h.total_index(), 2);
        assert_eq!(h.composed().ids, vec![100, 1, 2]);
        assert_eq!(h.change_count(), 2);
        assert!(h.can_undo());
        assert!(!h.can_redo());
    }

    #[test]
    fn undo_redo_round_trip() {
        let (mut h, _) = unlimited();
        for id in 1..=5 {
            h.push(edit(id, 10));
        }
        let before = h.composed().clone();

        for k in 1..=3u64 {
            h.undo();
            assert_eq!(h.total_index(), 5 - k);
        }
        assert_eq!(h.composed().ids, vec![100, 1, 2]);
        assert_eq!(h.entries().len(), 3);
        assert_eq!(h.retained().len(), 6);

        for _ in 0..3 {
            h.redo();
        }
        assert_eq!(h.total_index(), 5);
        assert_eq!(*h.composed(), before);
    }

    #[test]
    fn undo_returns_new_current_entry() {
        let (mut h, _) = unlimited();
        h.push(edit(1, 10));
        h.push(edit(2, 10));
        assert_eq!(h.undo().data().ids, vec![1]);
        assert_eq!(h.redo().data().ids, vec![2]);
        assert_eq!(h.decrease_index().data().ids, vec![1]);
        assert_eq!(h.increase_index().data().ids, vec![2]);
    }

    #[test]
    fn boundaries_are_noops_but_count_as_mutations() {
        let (mut h, _) = unlimited();
        h.undo();
        assert_eq!(h.index(), 0);
        assert_eq!(h.change_count(), 1);

        h.push(edit(1, 10));
        h.redo();
        assert_eq!(h.index(), 1);
        assert_eq!(h.change_count(), 3);
    }

    #[test]
    fn push_after_undo_truncates_redo() {
        let (mut h, _) = unlimited();
        h.push(edit(1, 10));
        h.push(edit(2, 10));
        h.undo();
        assert!(h.can_redo());

        h.push(edit(3, 10));
        assert!(!h.can_redo());
        assert_eq!(h.composed().ids, vec![100, 1, 3]);
        assert_eq!(h.total_index(), 2);
    }

    #[test]
    fn replace_top_replaces_step() {
        let (mut h, _) = unlimited();
        h.push(edit(1, 10));
        h.push(edit(2, 10));
        assert_eq!(h.push_replacing_top(edit(3, 10)), PushOutcome::Replaced);

        assert_eq!(h.len(), 3);
        assert_eq!(h.total_index(), 2);
        assert_eq!(h.composed().ids, vec![100, 1, 3]);
    }

    #[test]
    fn replace_top_without_change_is_suppressed() {
        let (mut h, _) = unlimited();
        h.push(edit(1, 10));
        h.push(edit(2, 10));
        let len = h.len();

        assert_eq!(h.push_replacing_top(edit(0, 10)), PushOutcome::Suppressed);
        assert_eq!(h.push_replacing_top(edit(0, 10)), PushOutcome::Suppressed);
        assert!(h.len() <= len);
        assert_eq!(h.len(), 1, "each suppressed replace drops the top");
        assert_eq!(h.composed().ids, vec![100]);
    }

    #[test]
    fn replace_top_at_seed_appends() {
        let (mut h, _) = unlimited();
        assert_eq!(h.push_replacing_top(edit(0, 10)), PushOutcome::Appended);
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn pause_suppresses_push() {
        let (mut h, _) = unlimited();
        h.pause(true);
        assert_eq!(h.push(edit(1, 10)), PushOutcome::Paused);
        h.pause(false);

        assert_eq!(h.len(), 1);
        assert_eq!(h.index(), 0);
        assert_eq!(h.change_count(), 0);

        h.push(edit(2, 10));
        assert_eq!(h.total_index(), 1);
        assert_eq!(h.composed().ids, vec![100, 2]);
    }

    #[test]
    fn pause_nests_and_clamps() {
        let (mut h, _) = unlimited();
        h.pause(false);
        assert!(!h.is_paused());
        h.pause(true);
        h.pause(true);
        h.pause(false);
        assert!(h.is_paused());
        h.pause(false);
        assert!(!h.is_paused());
    }

    #[test]
    fn paused_scope_groups_internal_pushes() {
        let (mut h, _) = unlimited();
        let outcomes = h.paused(|h| [h.push(edit(1, 10)), h.push(edit(2, 10))]);
        assert_eq!(outcomes, [PushOutcome::Paused, PushOutcome::Paused]);
        assert!(!h.is_paused());
        h.push(edit(12, 10));
        assert_eq!(h.total_index(), 1);
    }

    #[test]
    fn paused_scope_resumes_after_panic() {
        let (mut h, _) = unlimited();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            h.paused(|h| {
                h.push(edit(1, 10));
                panic!("compound edit failed");
            })
        }));
        assert!(result.is_err());
        assert!(!h.is_paused());
        assert_eq!(h.push(edit(2, 10)), PushOutcome::Appended);
        assert_eq!(h.composed().ids, vec![100, 2]);
    }

    #[test]
    fn step_budget_keeps_s_plus_one_undos() {
        let (mut h, _) = engine(HistoryConfig::new(3, 1_000_000, 0));
        for id in 1..=10 {
            h.push(edit(id, 10));
        }
        assert_eq!(h.total_index(), 10);

        let mut undos = 0;
        while h.can_undo() {
            h.undo();
            undos += 1;
        }
        assert_eq!(undos, 4);
        assert_eq!(h.total_index(), 6);
        assert!(h.current().is_checkpoint());
        assert_eq!(h.composed().ids, vec![100, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn byte_ceiling_holds_after_push() {
        let (mut h, _) = engine(HistoryConfig::new(100, 100, 0));
        for id in 1..=20 {
            h.push(edit(id, 30));
            assert!(h.memory_usage() <= 100 || h.len() == 1);
        }
        assert_eq!(h.total_index(), 20);
    }

    #[test]
    fn free_entries_do_not_use_steps() {
        let (mut h, _) = engine(HistoryConfig::new(2, 1_000_000, 5));
        for id in 1..=6 {
            h.push(edit(id, 50));
            h.push(edit(1_000 + id, 1));
            h.push(edit(2_000 + id, 1));
        }
        let real = h
            .entries()
            .iter()
            .filter(|e| !e.is_checkpoint() && e.memory_estimate_bytes() >= 5)
            .count();
        assert_eq!(real, 2, "step budget only counts non-free entries");
    }

    #[test]
    fn checkpoint_timestamp_is_last_folded() {
        let clock = ManualClock::new(0);
        let queue = DeferredQueue::new();
        let mut h = HistoryEngine::new(edit(100, 10), composer(), queue)
            .with_config(HistoryConfig::new(1, 1_000, 0))
            .with_clock(clock.clone());
        for id in 1..=3 {
            clock.set(u64::from(id) * 10);
            h.push(edit(id, 10));
        }
        // [C(seed,1), 2, 3]
        assert_eq!(h.retained()[0].timestamp_ms(), 10);
        assert_eq!(h.retained()[2].timestamp_ms(), 30);
    }

    #[test]
    fn anchor_hint_only_passed_when_folding() {
        let hints: Rc<RefCell<Vec<Option<usize>>>> = Rc::default();
        let recorded = hints.clone();
        let recording = FnComposer::new(
            estimate,
            move |parts: &[&Edit], hint: Option<usize>| {
                recorded.borrow_mut().push(hint);
                compose(parts, hint)
            },
            causes_change,
        );
        let mut h = HistoryEngine::new(edit(100, 10), recording, DeferredQueue::new())
            .with_config(HistoryConfig::new(2, 1_000_000, 0))
            .with_clock(ManualClock::new(0));

        // [seed 1 2 3] fits two steps behind the newest; nothing folds.
        for id in 1..=3 {
            h.push(edit(id, 10));
        }
        h.undo();
        h.redo();
        assert!(!hints.borrow().is_empty());
        assert!(hints.borrow().iter().all(Option::is_none));
        hints.borrow_mut().clear();

        // [seed 1 2 3 4] folds seed and 1; the last folded payload is index 1.
        h.push(edit(4, 10));
        let folded: Vec<Option<usize>> =
            hints.borrow().iter().copied().filter(Option::is_some).collect();
        assert_eq!(folded, vec![Some(1)]);
        assert!(hints.borrow().contains(&None), "recomposition passes no hint");
        assert_eq!(h.retained()[0].data().ids, vec![100, 1]);
        assert_eq!(h.total_index(), 4);
    }

    #[test]
    fn listener_is_deferred() {
        let (mut h, queue) = unlimited();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _guard = h.add_listener(move |e: &HistoryEvent<Edit>| {
            s.borrow_mut().push((e.kind, e.change_count, e.total_index));
        });

        h.push(edit(1, 10));
        assert!(seen.borrow().is_empty());
        h.undo();
        assert!(seen.borrow().is_empty());

        assert_eq!(queue.run_pending(), 2);
        assert_eq!(
            *seen.borrow(),
            vec![
                (ChangeKind::Push(PushOutcome::Appended), 1, 1),
                (ChangeKind::Undo, 2, 0),
            ]
        );
    }

    #[test]
    fn listener_sees_composed_for_its_position() {
        let (mut h, queue) = unlimited();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _guard = h.add_listener(move |e: &HistoryEvent<Edit>| {
            s.borrow_mut().push(e.composed.ids.clone());
        });
        h.push(edit(1, 10));
        h.push(edit(2, 10));
        queue.run_pending();
        assert_eq!(*seen.borrow(), vec![vec![100, 1], vec![100, 1, 2]]);
    }

    #[test]
    fn dropped_listener_stops_receiving() {
        let (mut h, queue) = unlimited();
        let hits = Rc::new(Cell::new(0));
        let h2 = hits.clone();
        let guard = h.add_listener(move |_| h2.set(h2.get() + 1));
        assert_eq!(h.listener_count(), 1);

        h.push(edit(1, 10));
        queue.run_pending();
        drop(guard);
        h.push(edit(2, 10));
        queue.run_pending();

        assert_eq!(hits.get(), 1);
        assert_eq!(h.listener_count(), 0);
    }

    #[test]
    fn descriptions_follow_cursor() {
        let (mut h, _) = unlimited();
        h.push_with(edit(1, 10), PushOptions::new().description("Brush"));
        h.push(edit(2, 10));
        h.push_with(edit(3, 10), PushOptions::new().description("Fill"));
        h.undo();

        assert_eq!(h.undo_descriptions(5), vec!["Brush"]);
        assert_eq!(h.redo_descriptions(5), vec!["Fill"]);
        assert!(h.undo_descriptions(0).is_empty());
    }

    #[test]
    fn stats_and_debug() {
        let (mut h, _) = engine(HistoryConfig::new(1, 1_000, 0));
        for id in 1..=4 {
            h.push(edit(id, 10));
        }
        let stats = h.stats();
        assert_eq!(stats.retained, 3);
        assert_eq!(stats.index, 2);
        assert_eq!(stats.index_offset, 2);
        assert_eq!(stats.total_index, 4);
        assert_eq!(stats.memory_usage, h.memory_usage());
        assert_eq!(stats.change_count, 4);

        let debug = format!("{h:?}");
        assert!(debug.contains("HistoryEngine"));
        assert!(debug.contains("index_offset"));
    }

    #[test]
    fn change_count_is_monotonic() {
        let (mut h, _) = engine(HistoryConfig::new(2, 100, 0));
        let mut last = h.change_count();
        for id in 1..=10 {
            h.push(edit(id, 40));
            h.undo();
            h.redo();
            assert!(h.change_count() > last);
            last = h.change_count();
        }
    }

    // ========================================================================
    // Tracing
    // ========================================================================

    #[derive(Debug, Clone)]
    struct CapturedEvent {
        target: String,
        fields: HashMap<String, String>,
    }

    struct EventCapture {
        events: Arc<Mutex<Vec<CapturedEvent>>>,
    }

    struct FieldVisitor(Vec<(String, String)>);

    impl tracing::field::Visit for FieldVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.0.push((field.name().to_string(), format!("{value:?}")));
        }
        fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
            self.0.push((field.name().to_string(), value.to_string()));
        }
        fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
            self.0.push((field.name().to_string(), value.to_string()));
        }
    }

    impl<S> tracing_subscriber::Layer<S> for EventCapture
    where
        S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut visitor = FieldVisitor(Vec::new());
            event.record(&mut visitor);
            self.events.lock().unwrap().push(CapturedEvent {
                target: event.metadata().target().to_string(),
                fields: visitor.0.into_iter().collect(),
            });
        }
    }

    fn with_captured_events<F: FnOnce()>(f: F) -> Vec<CapturedEvent> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let layer = EventCapture {
            events: events.clone(),
        };
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
        let captured = events.lock().unwrap().clone();
        captured
    }

    #[test]
    fn push_logs_outcome_and_position() {
        let events = with_captured_events(|| {
            let (mut h, _) = unlimited();
            h.push(edit(1, 10));
        });
        let push = events
            .iter()
            .find(|e| {
                e.target == "history.engine"
                    && e.fields.get("message").map(String::as_str) == Some("push")
            })
            .expect("push event");
        assert_eq!(push.fields.get("outcome").map(String::as_str), Some("Appended"));
        assert_eq!(push.fields.get("total_index").map(String::as_str), Some("1"));
    }

    #[test]
    fn compaction_logs_folds() {
        let events = with_captured_events(|| {
            let (mut h, _) = engine(HistoryConfig::new(0, 1_000, 0));
            h.push(edit(1, 10));
            h.push(edit(2, 10));
        });
        assert!(
            events
                .iter()
                .any(|e| e.target == "history.compact" && e.fields.contains_key("folded")),
            "expected a fold event, got {events:?}"
        );
    }
}
