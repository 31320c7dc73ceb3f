#![forbid(unsafe_code)]

//! Payload collaborators.
//!
//! The engine never looks inside a payload. Everything it needs to know is
//! answered by a [`Composer`]:
//!
//! - **Size estimation** for budgeting (`estimate_bytes`)
//! - **Composition** of an ordered run of payloads into one (`compose`)
//! - **Change detection** for replacing pushes (`causes_change`)
//!
//! # Contract
//!
//! All three methods must be pure and deterministic. `compose` must be
//! associative over prefix concatenation: composing `[a, b, c]` yields the
//! same payload as composing `[compose([a, b]), c]`. Composed payloads are fed
//! back into later `compose` calls as ordinary payloads, so the composer must
//! accept its own output. These preconditions are not checked at runtime.

use std::fmt;

/// Collaborator that estimates, composes and diffs opaque payloads.
pub trait Composer<P> {
    /// Approximate byte cost of `payload`. Used only for budgeting.
    fn estimate_bytes(&self, payload: &P) -> usize;

    /// Compose `payloads` (oldest first) into one payload representing their
    /// cumulative effect.
    ///
    /// `anchor_hint` is forwarded verbatim by compaction (the index of the
    /// last folded payload) and is `None` during steady-state recomposition.
    fn compose(&self, payloads: &[&P], anchor_hint: Option<usize>) -> P;

    /// Whether applying `candidate` on top of `reference` would observably
    /// change state.
    fn causes_change(&self, candidate: &P, reference: &P) -> bool;
}

impl<P, C: Composer<P> + ?Sized> Composer<P> for Box<C> {
    fn estimate_bytes(&self, payload: &P) -> usize {
        (**self).estimate_bytes(payload)
    }

    fn compose(&self, payloads: &[&P], anchor_hint: Option<usize>) -> P {
        (**self).compose(payloads, anchor_hint)
    }

    fn causes_change(&self, candidate: &P, reference: &P) -> bool {
        (**self).causes_change(candidate, reference)
    }
}

/// A [`Composer`] assembled from three closures.
///
/// ```ignore
/// let composer = FnComposer::new(
///     |v: &Vec<u8>| v.len(),
///     |parts: &[&Vec<u8>], _| parts.iter().flat_map(|p| p.iter().copied()).collect(),
///     |candidate: &Vec<u8>, _reference: &Vec<u8>| !candidate.is_empty(),
/// );
/// ```
pub struct FnComposer<E, C, D> {
    estimate: E,
    compose: C,
    detect: D,
}

impl<E, C, D> fmt::Debug for FnComposer<E, C, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnComposer").finish_non_exhaustive()
    }
}

impl<E, C, D> FnComposer<E, C, D> {
    /// Bundle the three collaborator functions.
    #[must_use]
    pub fn new(estimate: E, compose: C, detect: D) -> Self {
        Self {
            estimate,
            compose,
            detect,
        }
    }
}

impl<P, E, C, D> Composer<P> for FnComposer<E, C, D>
where
    E: Fn(&P) -> usize,
    C: Fn(&[&P], Option<usize>) -> P,
    D: Fn(&P, &P) -> bool,
{
    fn estimate_bytes(&self, payload: &P) -> usize {
        (self.estimate)(payload)
    }

    fn compose(&self, payloads: &[&P], anchor_hint: Option<usize>) -> P {
        (self.compose)(payloads, anchor_hint)
    }

    fn causes_change(&self, candidate: &P, reference: &P) -> bool {
        (self.detect)(candidate, reference)
    }
}
