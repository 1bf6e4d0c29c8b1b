/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Error types for citation state management.
 */

//! Error types for citation state management.
//!
//! Engine implementations report failures as [`EngineError`]. The
//! coordinator wraps those into [`Error`], recording whether the engine
//! could not be constructed at all or failed while resolving a pass.

use std::fmt;

use thiserror::Error;

use crate::fragment::MarkupError;

/// Result type alias for quarto-references operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A failure reported by a citation-processing engine.
///
/// The engine is a black box, so all that crosses the boundary is a
/// human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    /// Create an engine error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message reported by the engine.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The engine call that was in flight when a resolution pass failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOperation {
    /// Registering item ids with the engine.
    UpdateItems,
    /// Generating the bibliography.
    MakeBibliography,
    /// Processing one citation cluster.
    ProcessCitationCluster { citation_id: String },
}

impl fmt::Display for EngineOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineOperation::UpdateItems => write!(f, "updating items"),
            EngineOperation::MakeBibliography => write!(f, "building the bibliography"),
            EngineOperation::ProcessCitationCluster { citation_id } => {
                write!(f, "processing citation '{}'", citation_id)
            }
        }
    }
}

/// Errors surfaced by the references manager.
///
/// None of these are fatal: the manager keeps its last published state
/// and the previous engine (when one exists) after any of them.
#[derive(Debug, Error)]
pub enum Error {
    /// The engine rejected the style or locale at construction time.
    #[error("Failed to construct citation engine: {source}")]
    EngineConstruction {
        #[source]
        source: EngineError,
    },

    /// The engine failed while items or citations were being resolved.
    #[error("Citation engine failed while {operation}: {source}")]
    Resolution {
        operation: EngineOperation,
        #[source]
        source: EngineError,
    },

    /// The engine produced markup that could not be converted to a fragment.
    #[error("Invalid markup from {context}: {source}")]
    Markup {
        context: String,
        #[source]
        source: MarkupError,
    },

    /// Caller-supplied JSON input could not be read.
    #[error("Invalid {what}: {source}")]
    InvalidInput {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Configuration could not be read.
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    /// Create an engine construction error.
    pub fn construction(source: EngineError) -> Self {
        Self::EngineConstruction { source }
    }

    /// Create a resolution error for the given engine operation.
    pub fn resolution(operation: EngineOperation, source: EngineError) -> Self {
        Self::Resolution { operation, source }
    }

    /// Create a markup conversion error.
    pub fn markup(context: impl Into<String>, source: MarkupError) -> Self {
        Self::Markup {
            context: context.into(),
            source,
        }
    }

    /// Whether the engine could not be constructed.
    pub fn is_construction(&self) -> bool {
        matches!(self, Error::EngineConstruction { .. })
    }

    /// Whether a resolution pass failed (engine call or markup conversion).
    pub fn is_resolution(&self) -> bool {
        matches!(self, Error::Resolution { .. } | Error::Markup { .. })
    }
}
