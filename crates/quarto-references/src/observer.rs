/*
 * observer.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Observers for references manager events.
 */

//! Observer abstraction for manager events.
//!
//! The manager reports engine replacement, publication and failures through
//! a [`StateObserver`]. Rendering layers use it to learn that new state is
//! available; the [`TracingObserver`] turns the same events into `tracing`
//! output.

use crate::error::Error;
use crate::manager::PublishedState;

/// Receives notifications from a references manager.
///
/// All methods have empty default implementations.
pub trait StateObserver {
    /// A new engine was constructed.
    fn on_engine_constructed(&self, _generation: u64) {}

    /// An engine was dropped (replaced, missing inputs, or teardown).
    fn on_engine_discarded(&self, _generation: u64) {}

    /// New derived state was published.
    fn on_published(&self, _state: &PublishedState, _revision: u64) {}

    /// A pass failed; the previously published state is still current.
    fn on_error(&self, _error: &Error) {}
}

/// Observer that ignores every event. Used when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl NoopObserver {
    pub fn new() -> Self {
        Self
    }
}

impl StateObserver for NoopObserver {}

/// Observer that emits `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl TracingObserver {
    pub fn new() -> Self {
        Self
    }
}

impl StateObserver for TracingObserver {
    fn on_engine_constructed(&self, generation: u64) {
        tracing::info!(generation, "Citation engine constructed");
    }

    fn on_engine_discarded(&self, generation: u64) {
        tracing::info!(generation, "Citation engine discarded");
    }

    fn on_published(&self, state: &PublishedState, revision: u64) {
        tracing::info!(
            revision,
            citations = state.citations.len(),
            bibliography_entries = state.bibliography.as_ref().map_or(0, |b| b.len()),
            "Published references state"
        );
    }

    fn on_error(&self, error: &Error) {
        tracing::error!(error = %error, "References pass failed");
    }
}

impl<O: StateObserver + ?Sized> StateObserver for std::rc::Rc<O> {
    fn on_engine_constructed(&self, generation: u64) {
        (**self).on_engine_constructed(generation)
    }

    fn on_engine_discarded(&self, generation: u64) {
        (**self).on_engine_discarded(generation)
    }

    fn on_published(&self, state: &PublishedState, revision: u64) {
        (**self).on_published(state, revision)
    }

    fn on_error(&self, error: &Error) {
        (**self).on_error(error)
    }
}
