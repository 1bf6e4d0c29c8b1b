/*
 * config.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Configuration for the references manager.
 */

//! Manager configuration.

use serde::{Deserialize, Serialize};

use crate::engine::BibliographyOptions;
use crate::error::Result;

/// Separator placed between bibliography entries before conversion.
pub const DEFAULT_ENTRY_SEPARATOR: &str = "\n";

/// Settings that shape how engine output is turned into published state.
///
/// ```rust
/// use quarto_references::ManagerConfig;
///
/// let config = ManagerConfig::from_json_str(
///     r#"{"bibliography": {"exclude": [{"field": "type", "value": "webpage"}]}}"#,
/// ).unwrap();
/// assert_eq!(config.entry_separator, "\n");
/// assert_eq!(config.bibliography.exclude.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ManagerConfig {
    /// Joins the engine's bibliography entries into one markup string.
    pub entry_separator: String,

    /// Forwarded to the engine on every bibliography build.
    pub bibliography: BibliographyOptions,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            entry_separator: DEFAULT_ENTRY_SEPARATOR.to_string(),
            bibliography: BibliographyOptions::default(),
        }
    }
}

impl ManagerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_bibliography_options(mut self, options: BibliographyOptions) -> Self {
        self.bibliography = options;
        self
    }
}
