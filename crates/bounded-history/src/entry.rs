#![forbid(unsafe_code)]

//! History entries.
//!
//! An [`Entry`] pairs an opaque payload with the bookkeeping the engine needs
//! for budgeting: a wall-clock timestamp and an approximate byte cost. Entries
//! are immutable once created; compaction replaces a prefix of them wholesale
//! with a single checkpoint entry (see [`crate::compaction`]).

/// Description given to checkpoint entries produced by compaction.
pub const CHECKPOINT_DESCRIPTION: &str = "oldest";

/// One retained record in the history list.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<P> {
    timestamp_ms: u64,
    memory_estimate_bytes: usize,
    data: P,
    description: Option<String>,
}

impl<P> Entry<P> {
    /// Create an entry.
    #[must_use]
    pub fn new(
        timestamp_ms: u64,
        memory_estimate_bytes: usize,
        data: P,
        description: Option<String>,
    ) -> Self {
        Self {
            timestamp_ms,
            memory_estimate_bytes,
            data,
            description,
        }
    }

    /// Create a checkpoint entry holding the composed effect of folded entries.
    #[must_use]
    pub(crate) fn checkpoint(timestamp_ms: u64, memory_estimate_bytes: usize, data: P) -> Self {
        Self::new(
            timestamp_ms,
            memory_estimate_bytes,
            data,
            Some(CHECKPOINT_DESCRIPTION.to_string()),
        )
    }

    /// Milliseconds since the Unix epoch at which the entry was recorded.
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Approximate byte cost reported by the composer.
    #[must_use]
    pub fn memory_estimate_bytes(&self) -> usize {
        self.memory_estimate_bytes
    }

    /// The opaque payload.
    #[must_use]
    pub fn data(&self) -> &P {
        &self.data
    }

    /// Optional human-readable description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// True when this entry was produced by folding older entries.
    #[must_use]
    pub fn is_checkpoint(&self) -> bool {
        self.description.as_deref() == Some(CHECKPOINT_DESCRIPTION)
    }

    /// Consume the entry, returning its payload.
    #[must_use]
    pub fn into_data(self) -> P {
        self.data
    }
}
