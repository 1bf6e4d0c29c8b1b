/*
 * testing.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Scripted citation engine for unit tests.
 */

//! A small deterministic engine following citeproc's numbering contract.
//!
//! - Item numbers are assigned by first citation in document order.
//! - The document order is `preceding + [citation] + following` of the
//!   latest submission.
//! - Each submission returns the submitted citation plus every other
//!   citation whose index or rendering changed.
//! - Bibliography entries render each registered item's `title`, read back
//!   through the system handle.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::engine::{
    BibliographyMetadata, BibliographyOptions, BibliographyOutput, CitationEngine, ClusterOutput,
    ClusterResult, EngineFactory, SystemHandle,
};
use crate::error::EngineError;
use crate::types::{Citation, CitationPosition};

/// Call counters and failure switches shared by a factory and its engines.
#[derive(Debug, Default)]
pub(crate) struct ScriptState {
    pub constructions: Cell<usize>,
    pub update_calls: Cell<usize>,
    pub bibliography_calls: Cell<usize>,
    pub cluster_calls: Cell<usize>,
    pub fail_bibliography: Cell<bool>,
    pub emit_bad_markup: Cell<bool>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedFactory {
    pub state: Rc<ScriptState>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constructions(&self) -> usize {
        self.state.constructions.get()
    }

    pub fn bibliography_calls(&self) -> usize {
        self.state.bibliography_calls.get()
    }

    pub fn cluster_calls(&self) -> usize {
        self.state.cluster_calls.get()
    }
}

impl EngineFactory for ScriptedFactory {
    type Engine = ScriptedEngine;

    fn construct(&self, sys: SystemHandle, style: &str) -> Result<ScriptedEngine, EngineError> {
        if style.is_empty() || style == "invalid" {
            return Err(EngineError::new(format!("unparseable style '{}'", style)));
        }
        let locale = sys.retrieve_locale("en-US");
        if locale.is_empty() || locale == "invalid" {
            return Err(EngineError::new(format!("unparseable locale '{}'", locale)));
        }
        self.state.constructions.set(self.state.constructions.get() + 1);
        Ok(ScriptedEngine {
            state: Rc::clone(&self.state),
            sys,
            style: style.to_string(),
            locale,
            registered: Vec::new(),
            document: Vec::new(),
            rendered: HashMap::new(),
        })
    }
}

#[derive(Debug)]
pub(crate) struct ScriptedEngine {
    state: Rc<ScriptState>,
    sys: SystemHandle,
    style: String,
    locale: String,
    registered: Vec<String>,
    /// Citations in document order.
    document: Vec<Citation>,
    /// Last returned `(index, markup)` per citation id.
    rendered: HashMap<String, (usize, String)>,
}

impl ScriptedEngine {
    fn lookup(&self, id: &str) -> Option<&Citation> {
        self.document.iter().find(|c| c.citation_id == id)
    }

    fn neighbours(&self, positions: &[CitationPosition]) -> Result<Vec<Citation>, EngineError> {
        positions
            .iter()
            .map(|p| {
                self.lookup(p.citation_id()).cloned().ok_or_else(|| {
                    EngineError::new(format!("unknown citation '{}'", p.citation_id()))
                })
            })
            .collect()
    }
}

impl CitationEngine for ScriptedEngine {
    fn update_items(&mut self, ids: &[String]) -> Result<(), EngineError> {
        self.state.update_calls.set(self.state.update_calls.get() + 1);
        for id in ids {
            if self.sys.retrieve_item(id).is_none() {
                return Err(EngineError::new(format!("item '{}' not found", id)));
            }
        }
        self.registered = ids.to_vec();
        Ok(())
    }

    fn make_bibliography(
        &mut self,
        options: &BibliographyOptions,
    ) -> Result<BibliographyOutput, EngineError> {
        self.state
            .bibliography_calls
            .set(self.state.bibliography_calls.get() + 1);
        if self.state.fail_bibliography.get() {
            return Err(EngineError::new("bibliography failed"));
        }

        let mut output = BibliographyOutput {
            metadata: BibliographyMetadata {
                bibstart: Some(format!(
                    "<div class=\"csl-bib-body\" data-style=\"{}\" lang=\"{}\">",
                    self.style, self.locale
                )),
                bibend: Some("</div>".to_string()),
                ..Default::default()
            },
            entries: Vec::new(),
        };
        for id in &self.registered {
            if options.exclude.iter().any(|s| s.field == "id" && &s.value == id) {
                continue;
            }
            let item = self
                .sys
                .retrieve_item(id)
                .ok_or_else(|| EngineError::new(format!("item '{}' not found", id)))?;
            let title = item
                .get("title")
                .and_then(|t| t.as_str())
                .unwrap_or("Untitled");
            let entry = if self.state.emit_bad_markup.get() {
                format!("<div class=\"csl-entry\">{}", title)
            } else {
                format!("<div class=\"csl-entry\">{}</div>", title)
            };
            output.entries.push(entry);
            output.metadata.entry_ids.push(vec![id.clone()]);
        }
        Ok(output)
    }

    fn process_citation_cluster(
        &mut self,
        citation: &Citation,
        preceding: &[CitationPosition],
        following: &[CitationPosition],
    ) -> Result<ClusterOutput, EngineError> {
        self.state.cluster_calls.set(self.state.cluster_calls.get() + 1);
        for item in &citation.citation_items {
            if self.sys.retrieve_item(&item.id).is_none() {
                return Err(EngineError::new(format!("item '{}' not found", item.id)));
            }
        }

        let mut document = self.neighbours(preceding)?;
        document.push(citation.clone());
        document.extend(self.neighbours(following)?);
        self.document = document;

        let mut numbers: HashMap<&str, usize> = HashMap::new();
        for cited in &self.document {
            for item in &cited.citation_items {
                let next = numbers.len() + 1;
                numbers.entry(item.id.as_str()).or_insert(next);
            }
        }

        let mut results = Vec::new();
        let mut rendered = HashMap::new();
        for (index, cited) in self.document.iter().enumerate() {
            let labels: Vec<String> = cited
                .citation_items
                .iter()
                .map(|item| numbers[item.id.as_str()].to_string())
                .collect();
            let markup = format!("[{}]", labels.join(", "));
            let changed = self.rendered.get(&cited.citation_id) != Some(&(index, markup.clone()));
            if changed || cited.citation_id == citation.citation_id {
                results.push(ClusterResult::new(index, markup.clone(), &cited.citation_id));
            }
            rendered.insert(cited.citation_id.clone(), (index, markup));
        }
        self.rendered = rendered;

        Ok(ClusterOutput {
            results,
            ..Default::default()
        })
    }
}
