#![forbid(unsafe_code)]

//! Bounded-memory undo/redo history.
//!
//! This crate records a linear sequence of opaque edits, lets callers move
//! backward and forward through them, and keeps both the number of retained
//! steps and their estimated memory under fixed budgets by folding the
//! oldest entries into a single checkpoint.
//!
//! # Key Components
//!
//! - [`HistoryEngine`] - entry list, cursor, compaction and notifications
//! - [`Composer`] - the three payload collaborators (size, compose, diff)
//! - [`HistoryConfig`] - step and byte budgets
//! - [`Scheduler`] / [`DeferredQueue`] - deferred listener dispatch
//! - [`Patch`] / [`PatchComposer`] - a ready-made key/value payload
//!
//! # Quick Start
//!
//! ```ignore
//! use bounded_history::{DeferredQueue, HistoryConfig, HistoryEngine, Patch, PatchComposer};
//!
//! let queue = DeferredQueue::new();
//! let mut history = HistoryEngine::new(Patch::new(), PatchComposer::<String, i64>::new(), queue.clone())
//!     .with_config(HistoryConfig::new(20, 64 * 1024 * 1024, 256));
//!
//! let _guard = history.add_listener(|event| println!("now at {}", event.total_index));
//! history.push(Patch::new().with("brush.size".into(), 12));
//! history.undo();
//! queue.run_pending(); // listeners run here, never inside push/undo
//! ```
//!
//! # Logging
//!
//! Uses `tracing` with targets `history.engine`, `history.compact` and
//! `history.notify`.

pub mod clock;
pub mod compaction;
pub mod composer;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod notify;
pub mod patch;

pub use clock::{Clock, ManualClock, SystemClock};
pub use compaction::Compaction;
pub use composer::{Composer, FnComposer};
pub use config::HistoryConfig;
pub use engine::{HistoryEngine, HistoryStats, PushOptions};
pub use entry::{CHECKPOINT_DESCRIPTION, Entry};
pub use error::ConfigError;
pub use notify::{
    ChangeKind, DeferredQueue, FnScheduler, HistoryEvent, ListenerGuard, PushOutcome, Scheduler,
    Task,
};
pub use patch::{Patch, PatchComposer};
