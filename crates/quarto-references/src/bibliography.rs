/*
 * bibliography.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Bibliography generation.
 */

//! Bibliography generation.
//!
//! [`build_bibliography`] runs against the manager's live engine and is a
//! full rebuild every time: the engine's item handle is replaced with the
//! current map, every id is re-registered, and the whole bibliography is
//! regenerated. [`make_bibliography`] is the stateless variant for use
//! outside the interactive manager (e.g. at build time).

use serde::Serialize;

use crate::config::ManagerConfig;
use crate::engine::{
    BibliographyMetadata, BibliographyOptions, BibliographyOutput, CitationEngine, EngineFactory,
    SystemHandle,
};
use crate::error::{EngineOperation, Error, Result};
use crate::fragment::{self, Fragment};
use crate::lifecycle::LiveEngine;
use crate::types::ItemMap;

/// A rendered bibliography.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BibliographyResult {
    /// Entries joined with the configured separator.
    pub markup: String,
    pub fragment: Fragment,
    pub metadata: BibliographyMetadata,
}

impl BibliographyResult {
    /// Number of top-level rendered entries.
    pub fn len(&self) -> usize {
        self.fragment.nodes().len()
    }

    /// Whether the bibliography has no entries (e.g. no items are known).
    pub fn is_empty(&self) -> bool {
        self.fragment.is_empty()
    }
}

fn register_items<E: CitationEngine>(engine: &mut E, items: &ItemMap) -> Result<()> {
    let ids: Vec<String> = items.keys().cloned().collect();
    engine
        .update_items(&ids)
        .map_err(|e| Error::resolution(EngineOperation::UpdateItems, e))
}

fn generate<E: CitationEngine>(
    engine: &mut E,
    options: &BibliographyOptions,
) -> Result<BibliographyOutput> {
    engine
        .make_bibliography(options)
        .map_err(|e| Error::resolution(EngineOperation::MakeBibliography, e))
}

/// Register `items` with the live engine and render the bibliography.
///
/// Returns `Ok(None)` when there is no engine.
///
/// # Errors
///
/// Returns [`Error::Resolution`] when the engine fails and
/// [`Error::Markup`] when its output cannot be converted.
pub fn build_bibliography<E: CitationEngine>(
    engine: Option<&mut LiveEngine<E>>,
    items: &ItemMap,
    config: &ManagerConfig,
) -> Result<Option<BibliographyResult>> {
    let Some(live) = engine else {
        return Ok(None);
    };

    live.sys().set_items(items.clone());
    register_items(live.engine_mut(), items)?;
    let output = generate(live.engine_mut(), &config.bibliography)?;

    let markup = output.entries.join(&config.entry_separator);
    let fragment = fragment::parse(&markup).map_err(|e| Error::markup("bibliography", e))?;

    tracing::debug!(
        generation = live.generation(),
        items = items.len(),
        entries = output.entries.len(),
        "Built bibliography"
    );

    Ok(Some(BibliographyResult {
        markup,
        fragment,
        metadata: output.metadata,
    }))
}

/// One-shot bibliography generation with a throwaway engine.
///
/// Returns `Ok(None)` when `style` or `locale` is missing. The engine is
/// constructed, fed every item, asked for the bibliography, and dropped.
///
/// # Errors
///
/// Returns [`Error::EngineConstruction`] if the engine rejects the style or
/// locale, and [`Error::Resolution`] if a later engine call fails.
pub fn make_bibliography<F: EngineFactory>(
    factory: &F,
    items: &ItemMap,
    style: Option<&str>,
    locale: Option<&str>,
    options: &BibliographyOptions,
) -> Result<Option<BibliographyOutput>> {
    let (Some(style), Some(locale)) = (style, locale) else {
        return Ok(None);
    };

    let sys = SystemHandle::new(locale, items.clone());
    let mut engine = factory.construct(sys, style).map_err(Error::construction)?;
    register_items(&mut engine, items)?;
    generate(&mut engine, options).map(Some)
}
