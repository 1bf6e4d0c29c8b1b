/*
 * citations.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Resolution of citation clusters into renderable records.
 */

//! Citation cluster resolution.
//!
//! Clusters are submitted to the engine one at a time, in document order.
//! A submission can renumber citations submitted before it, so every result
//! the engine returns is folded into the map, overwriting any earlier record
//! for the same citation id. The map after the last submission therefore
//! holds, for each id, whatever the last submission mentioning it produced.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::engine::{CitationEngine, ClusterResult};
use crate::error::{EngineOperation, Error, Result};
use crate::fragment::{self, Fragment};
use crate::lifecycle::LiveEngine;
use crate::types::ClusterDescriptor;

/// One rendered citation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitationRecord {
    /// Engine-assigned position of the citation in document order.
    pub order: usize,
    /// Raw markup as returned by the engine.
    pub markup: String,
    pub fragment: Fragment,
}

impl CitationRecord {
    fn from_result(result: &ClusterResult) -> Result<Self> {
        let fragment = fragment::parse(&result.markup)
            .map_err(|e| Error::markup(format!("citation '{}'", result.citation_id), e))?;
        Ok(Self {
            order: result.index,
            markup: result.markup.clone(),
            fragment,
        })
    }
}

/// Citation records keyed by citation id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CitationMap {
    records: BTreeMap<String, CitationRecord>,
}

impl CitationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&CitationRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in citation-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CitationRecord)> {
        self.records.iter().map(|(id, record)| (id.as_str(), record))
    }

    /// Records in document order (by `order`, ties broken by id).
    pub fn in_order(&self) -> Vec<(&str, &CitationRecord)> {
        let mut records: Vec<_> = self.iter().collect();
        records.sort_by(|(a_id, a), (b_id, b)| a.order.cmp(&b.order).then(a_id.cmp(b_id)));
        records
    }

    /// Insert or overwrite a record.
    pub fn insert(&mut self, id: impl Into<String>, record: CitationRecord) {
        self.records.insert(id.into(), record);
    }

    /// Fold `other` into this map; records in `other` win.
    pub fn merge(&mut self, other: CitationMap) {
        self.records.extend(other.records);
    }
}

/// Submit every cluster to the engine and collect the rendered citations.
///
/// Returns an empty map when there is no engine or no clusters.
///
/// # Errors
///
/// Fails on the first engine error or unconvertible markup; no partial map
/// is returned.
pub fn resolve_citations<E: CitationEngine>(
    engine: Option<&mut LiveEngine<E>>,
    clusters: &[ClusterDescriptor],
) -> Result<CitationMap> {
    let mut citations = CitationMap::new();
    let Some(live) = engine else {
        return Ok(citations);
    };

    for cluster in clusters {
        let citation = cluster.citation();
        let output = live
            .engine_mut()
            .process_citation_cluster(citation, cluster.preceding(), cluster.following())
            .map_err(|e| {
                Error::resolution(
                    EngineOperation::ProcessCitationCluster {
                        citation_id: citation.citation_id.clone(),
                    },
                    e,
                )
            })?;

        for report in &output.metadata.citation_errors {
            tracing::warn!(
                citation = %report.citation_id,
                item = ?report.item_id,
                "{}",
                report.message
            );
        }

        for result in &output.results {
            let record = CitationRecord::from_result(result)?;
            citations.insert(result.citation_id.clone(), record);
        }
    }

    tracing::debug!(
        generation = live.generation(),
        clusters = clusters.len(),
        citations = citations.len(),
        "Resolved citations"
    );

    Ok(citations)
}
