/*
 * engine.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Contract with the external citation-processing engine.
 */

//! The citation-processing engine boundary.
//!
//! Style interpretation, locale terms, numbering and sorting all live in an
//! external engine (citeproc-js, a native CSL processor, ...). This module
//! defines what the references manager needs from it:
//!
//! - [`EngineFactory`] constructs an engine bound to one style, handing it a
//!   [`SystemHandle`] through which it looks up the locale and items.
//! - [`CitationEngine`] registers items, builds the bibliography and
//!   processes citation clusters.
//!
//! # The system handle
//!
//! Engines do not capture caller state. Instead each engine receives its own
//! [`SystemHandle`], created together with the engine and dropped with it.
//! The handle is bound to exactly one locale; the item map inside it is
//! replaced explicitly by the manager before items are (re)registered, so
//! the engine never reads a stale or half-updated map.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::{Citation, CitationPosition, Item, ItemMap};

/// Lookup state an engine reads back from the manager.
#[derive(Debug, Clone)]
pub struct EngineSys {
    locale: String,
    items: ItemMap,
}

/// Shared handle to the lookup state of one engine instance.
///
/// Cloning the handle shares the same state. Engines are single-threaded,
/// so the handle is `Rc`-based and not `Send`.
#[derive(Debug, Clone)]
pub struct SystemHandle {
    inner: Rc<RefCell<EngineSys>>,
}

impl SystemHandle {
    /// Create a handle bound to `locale` with an initial item map.
    pub fn new(locale: impl Into<String>, items: ItemMap) -> Self {
        Self {
            inner: Rc::new(RefCell::new(EngineSys {
                locale: locale.into(),
                items,
            })),
        }
    }

    /// Resolve a locale by language tag.
    ///
    /// The handle is bound to a single serialized locale, which is returned
    /// whatever language the engine asks for.
    pub fn retrieve_locale(&self, _lang: &str) -> String {
        self.inner.borrow().locale.clone()
    }

    /// Resolve an item by id.
    pub fn retrieve_item(&self, id: &str) -> Option<Item> {
        self.inner.borrow().items.get(id).cloned()
    }

    /// Replace the item map the engine reads from.
    pub fn set_items(&self, items: ItemMap) {
        self.inner.borrow_mut().items = items;
    }

    /// The serialized locale this handle is bound to.
    pub fn locale(&self) -> String {
        self.inner.borrow().locale.clone()
    }

    /// Ids of all items currently visible to the engine, in map order.
    pub fn item_ids(&self) -> Vec<String> {
        self.inner.borrow().items.keys().cloned().collect()
    }

    /// Whether two handles share the same state.
    pub fn ptr_eq(&self, other: &SystemHandle) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A `{ field, value }` selector for bibliography filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelector {
    pub field: String,
    pub value: String,
}

/// Options forwarded to [`CitationEngine::make_bibliography`].
///
/// These mirror citeproc's bibliography selection: `select` keeps items
/// matching all selectors, `include` keeps items matching any, `exclude`
/// drops items matching any, and `quash` drops items matching all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BibliographyOptions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub select: Vec<FieldSelector>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<FieldSelector>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<FieldSelector>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quash: Vec<FieldSelector>,
}

impl BibliographyOptions {
    /// Whether no filtering was requested.
    pub fn is_empty(&self) -> bool {
        self.select.is_empty()
            && self.include.is_empty()
            && self.exclude.is_empty()
            && self.quash.is_empty()
    }
}

/// Layout metadata returned alongside bibliography entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BibliographyMetadata {
    pub maxoffset: u32,
    pub entryspacing: u32,
    pub linespacing: u32,
    pub hangingindent: u32,
    #[serde(rename = "second-field-align")]
    pub second_field_align: Option<String>,
    pub bibstart: Option<String>,
    pub bibend: Option<String>,
    /// Item ids behind each entry, one list per entry.
    pub entry_ids: Vec<Vec<String>>,
}

/// Raw bibliography output: metadata plus one markup string per entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BibliographyOutput {
    pub metadata: BibliographyMetadata,
    pub entries: Vec<String>,
}

/// A citation-level error reported by the engine without failing the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CitationErrorReport {
    pub citation_id: String,
    pub item_id: Option<String>,
    pub message: String,
}

/// Metadata returned from processing a citation cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterMetadata {
    /// Whether the bibliography changed as a result of this cluster.
    pub bibchange: bool,
    pub citation_errors: Vec<CitationErrorReport>,
}

/// One rendered citation: `(order, markup, citationID)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterResult {
    /// Position of the citation in document order, as assigned by the engine.
    pub index: usize,
    pub markup: String,
    pub citation_id: String,
}

impl ClusterResult {
    pub fn new(index: usize, markup: impl Into<String>, citation_id: impl Into<String>) -> Self {
        Self {
            index,
            markup: markup.into(),
            citation_id: citation_id.into(),
        }
    }
}

/// Output of [`CitationEngine::process_citation_cluster`].
///
/// `results` holds the submitted citation and every previously submitted
/// citation whose rendering changed because of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterOutput {
    pub metadata: ClusterMetadata,
    pub results: Vec<ClusterResult>,
}

/// A citation-processing engine bound to one style and one locale.
///
/// Engines are stateful (registered items, citation registry) and not
/// thread-safe; the manager only ever drives one call at a time.
pub trait CitationEngine {
    /// Register or refresh the given items.
    ///
    /// Item content is read through the engine's [`SystemHandle`]. Calling
    /// this again with the same ids must be safe.
    fn update_items(&mut self, ids: &[String]) -> Result<(), EngineError>;

    /// Render the bibliography for the registered items.
    fn make_bibliography(
        &mut self,
        options: &BibliographyOptions,
    ) -> Result<BibliographyOutput, EngineError>;

    /// Process one citation in the context of its neighbours.
    ///
    /// May renumber previously processed citations; those are included in
    /// the returned results.
    fn process_citation_cluster(
        &mut self,
        citation: &Citation,
        preceding: &[CitationPosition],
        following: &[CitationPosition],
    ) -> Result<ClusterOutput, EngineError>;
}

/// Constructs engines bound to a style.
///
/// Construction fails when the engine rejects the style, or the locale it
/// retrieves through `sys`.
pub trait EngineFactory {
    type Engine: CitationEngine;

    fn construct(&self, sys: SystemHandle, style: &str) -> Result<Self::Engine, EngineError>;
}

impl<F: EngineFactory + ?Sized> EngineFactory for &F {
    type Engine = F::Engine;

    fn construct(&self, sys: SystemHandle, style: &str) -> Result<Self::Engine, EngineError> {
        (**self).construct(sys, style)
    }
}
