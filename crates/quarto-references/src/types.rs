/*
 * types.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Input types: items, citations and cluster descriptors.
 */

//! Input types handed to the references manager.
//!
//! Items are CSL-JSON records and are never inspected here, only forwarded
//! to the engine. Citations follow the CSL-JSON citation object layout so
//! that cluster arrays produced by editors can be deserialized directly.

use hashlink::LinkedHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A CSL-JSON bibliographic record.
pub type Item = serde_json::Value;

/// Items keyed by their caller-assigned id.
///
/// Iteration follows insertion order, which is also the order the ids are
/// registered with the engine.
pub type ItemMap = LinkedHashMap<String, Item>;

/// Parse a JSON object of `{ id: item }` pairs into an [`ItemMap`].
pub fn items_from_json_str(json: &str) -> Result<ItemMap> {
    serde_json::from_str(json).map_err(|source| Error::InvalidInput {
        what: "item map",
        source,
    })
}

/// Parse a JSON array of `[citation, preceding, following]` triples.
pub fn clusters_from_json_str(json: &str) -> Result<Vec<ClusterDescriptor>> {
    serde_json::from_str(json).map_err(|source| Error::InvalidInput {
        what: "citation clusters",
        source,
    })
}

/// One citation occurrence, possibly citing several items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Unique id of this citation within the document.
    #[serde(rename = "citationID")]
    pub citation_id: String,

    /// The items being cited.
    #[serde(rename = "citationItems", default)]
    pub citation_items: Vec<CitationItem>,

    #[serde(default)]
    pub properties: CitationProperties,
}

impl Citation {
    /// Create a citation of the given item ids.
    pub fn new<I, S>(citation_id: impl Into<String>, item_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            citation_id: citation_id.into(),
            citation_items: item_ids.into_iter().map(CitationItem::new).collect(),
            properties: CitationProperties::default(),
        }
    }

    /// Set the note index (for note styles).
    pub fn with_note_index(mut self, note_index: u32) -> Self {
        self.properties.note_index = note_index;
        self
    }
}

/// Citation-level properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationProperties {
    /// Footnote number the citation lives in, 0 for in-text citations.
    #[serde(rename = "noteIndex", default)]
    pub note_index: u32,
}

/// A single cited item within a citation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CitationItem {
    /// Id of the cited item.
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_author: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_only: Option<bool>,
}

impl CitationItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// A reference to a neighbouring citation: `[citationID, noteIndex]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationPosition(pub String, pub u32);

impl CitationPosition {
    pub fn new(citation_id: impl Into<String>, note_index: u32) -> Self {
        Self(citation_id.into(), note_index)
    }

    pub fn citation_id(&self) -> &str {
        &self.0
    }

    pub fn note_index(&self) -> u32 {
        self.1
    }
}

/// A citation together with the citations before and after it.
///
/// Serialized as the `[citation, preceding, following]` triple the engine
/// consumes. The neighbours drive position-dependent rendering such as
/// "ibid." and numbering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDescriptor(
    pub Citation,
    pub Vec<CitationPosition>,
    pub Vec<CitationPosition>,
);

impl ClusterDescriptor {
    pub fn new(
        citation: Citation,
        preceding: Vec<CitationPosition>,
        following: Vec<CitationPosition>,
    ) -> Self {
        Self(citation, preceding, following)
    }

    pub fn citation(&self) -> &Citation {
        &self.0
    }

    pub fn preceding(&self) -> &[CitationPosition] {
        &self.1
    }

    pub fn following(&self) -> &[CitationPosition] {
        &self.2
    }
}
