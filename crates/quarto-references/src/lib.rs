/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Citation and bibliography state management.
 */

//! Citation and bibliography state management over a pluggable engine.
//!
//! This crate keeps rendered citations and a bibliography in sync with four
//! changing inputs: a serialized citation style, a serialized locale, a map
//! of CSL-JSON items, and the document's citation clusters. Formatting
//! itself is delegated to a citation-processing engine behind the
//! [`CitationEngine`] and [`EngineFactory`] traits.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    ReferencesManager                          │
//! │        events → pass → PublishedState { bibliography,         │
//! │                                         citations }           │
//! └───────┬───────────────────────┬───────────────────────┬──────┘
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//! ┌───────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │ EngineLifecycle│   │ build_bibliography  │   │ resolve_citations   │
//! │ one live engine│   │ items → Fragment    │   │ clusters → records  │
//! └───────┬───────┘   └──────────┬──────────┘   └──────────┬──────────┘
//!         │                      └────────────┬────────────┘
//!         ▼                                   ▼
//! ┌────────────────────┐           ┌─────────────────────┐
//! │ EngineFactory /    │           │ fragment::parse     │
//! │ CitationEngine     │           │ markup → Fragment   │
//! └────────────────────┘           └─────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use quarto_references::{ManagerProps, ReferencesManager, items_from_json_str};
//!
//! let mut manager = ReferencesManager::new(factory);
//! manager.update(
//!     ManagerProps::new(style_csl, locale_xml)
//!         .with_items(items_from_json_str(items_json)?),
//! )?;
//! manager.mount()?;
//!
//! for (id, record) in manager.citations().in_order() {
//!     println!("{id}: {}", record.fragment);
//! }
//! ```

pub mod bibliography;
pub mod citations;
pub mod config;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod lifecycle;
pub mod manager;
pub mod observer;
pub mod types;

#[cfg(test)]
mod testing;

pub use bibliography::{BibliographyResult, build_bibliography, make_bibliography};
pub use citations::{CitationMap, CitationRecord, resolve_citations};
pub use config::ManagerConfig;
pub use engine::{
    BibliographyMetadata, BibliographyOptions, BibliographyOutput, CitationEngine, ClusterOutput,
    ClusterResult, EngineFactory, SystemHandle,
};
pub use error::{EngineError, EngineOperation, Error, Result};
pub use fragment::{Fragment, MarkupError, Node};
pub use lifecycle::{EngineLifecycle, EngineStatus, LiveEngine};
pub use manager::{
    ManagerEvent, ManagerProps, ManagerState, PublishedState, ReferencesContext,
    ReferencesManager, Transition,
};
pub use observer::{NoopObserver, StateObserver, TracingObserver};
pub use types::{
    Citation, CitationItem, CitationPosition, ClusterDescriptor, Item, ItemMap,
    clusters_from_json_str, items_from_json_str,
};
