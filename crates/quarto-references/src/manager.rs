/*
 * manager.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * State coordinator for citations and bibliography.
 */

//! The references manager.
//!
//! [`ReferencesManager`] owns one citation engine and keeps the published
//! `{ bibliography, citations }` state consistent with four inputs: style,
//! locale, items and citation clusters.
//!
//! # State machine
//!
//! ```text
//!                 mount / inputs complete
//!  Uninitialized ────────────────────────────► Ready
//!        ▲                                      │ style / locale changed: new engine, full rebuild
//!        │ style or locale removed, unmount     │ items changed: bibliography
//!        └──────────────────────────────────────┤ citations changed: citations
//!                                               ▼
//!                                             Ready
//! ```
//!
//! A pass runs to completion before the triggering call returns. It is
//! all-or-nothing: results are computed into locals and published together
//! only when every engine call succeeded. After a failure the last good
//! state stays published and the engine that failed is never reused.
//!
//! Work is owed in two ways. Work a pass never got to run (the engine could
//! not be constructed, or an earlier step failed) is deferred and joins
//! every later pass. Work that itself failed is only run again when its own
//! input changes or on [`ReferencesManager::retry`], so one bad citation
//! does not hold back bibliography updates.

use serde::Serialize;

use crate::bibliography::{BibliographyResult, build_bibliography};
use crate::citations::{CitationMap, CitationRecord, resolve_citations};
use crate::config::ManagerConfig;
use crate::engine::EngineFactory;
use crate::error::{Error, Result};
use crate::fragment::Fragment;
use crate::lifecycle::{EngineLifecycle, EngineStatus};
use crate::observer::{NoopObserver, StateObserver};
use crate::types::{ClusterDescriptor, ItemMap};

/// Inputs supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagerProps {
    /// Serialized citation style.
    pub style: Option<String>,
    /// Serialized locale.
    pub locale: Option<String>,
    pub items: ItemMap,
    pub citations: Vec<ClusterDescriptor>,
}

impl ManagerProps {
    pub fn new(style: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            style: Some(style.into()),
            locale: Some(locale.into()),
            ..Default::default()
        }
    }

    pub fn with_items(mut self, items: ItemMap) -> Self {
        self.items = items;
        self
    }

    pub fn with_citations(mut self, citations: Vec<ClusterDescriptor>) -> Self {
        self.citations = citations;
        self
    }
}

/// An input change or lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    Mount,
    StyleChanged(Option<String>),
    LocaleChanged(Option<String>),
    ItemsChanged(ItemMap),
    CitationsChanged(Vec<ClusterDescriptor>),
}

/// Whether derived state is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Not mounted, or style/locale missing, or no engine could be built yet.
    Uninitialized,
    /// An engine is live.
    Ready,
}

/// Outcome of handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing observable changed; published state is as before.
    Unchanged,
    /// New state was published under this revision.
    Published { revision: u64 },
    /// No engine is live; published state is empty.
    Uninitialized,
}

/// Derived state handed to the rendering layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PublishedState {
    /// `None` until a bibliography has been computed. An empty item map
    /// yields `Some` with an empty fragment.
    pub bibliography: Option<BibliographyResult>,
    pub citations: CitationMap,
}

/// Snapshot of published state for downstream consumers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReferencesContext {
    pub bibliography: Option<Fragment>,
    pub citations: CitationMap,
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Changes {
    style: bool,
    locale: bool,
    items: bool,
    citations: bool,
}

impl Changes {
    fn all() -> Self {
        Self {
            style: true,
            locale: true,
            items: true,
            citations: true,
        }
    }

    fn any(&self) -> bool {
        self.style || self.locale || self.items || self.citations
    }
}

/// Which parts of the derived state a pass computes or still owes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Pending {
    bibliography: bool,
    citations: bool,
}

impl Pending {
    fn both() -> Self {
        Self {
            bibliography: true,
            citations: true,
        }
    }

    fn any(&self) -> bool {
        self.bibliography || self.citations
    }
}

/// Coordinates a citation engine with changing inputs.
///
/// # Example
///
/// ```rust,ignore
/// use quarto_references::{ManagerProps, ReferencesManager};
///
/// let mut manager = ReferencesManager::new(MyEngineFactory::default());
/// manager.update(ManagerProps::new(style_csl, locale_xml).with_items(items))?;
/// manager.mount()?;
///
/// let bibliography = manager.bibliography();
/// ```
pub struct ReferencesManager<F: EngineFactory> {
    factory: F,
    config: ManagerConfig,
    props: ManagerProps,
    lifecycle: EngineLifecycle<F::Engine>,
    published: PublishedState,
    revision: u64,
    mounted: bool,
    deferred: Pending,
    failed: Pending,
    observer: Box<dyn StateObserver>,
}

impl<F: EngineFactory> ReferencesManager<F> {
    pub fn new(factory: F) -> Self {
        Self::with_config(factory, ManagerConfig::default())
    }

    pub fn with_config(factory: F, config: ManagerConfig) -> Self {
        Self {
            factory,
            config,
            props: ManagerProps::default(),
            lifecycle: EngineLifecycle::new(),
            published: PublishedState::default(),
            revision: 0,
            mounted: false,
            deferred: Pending::default(),
            failed: Pending::default(),
            observer: Box::new(NoopObserver::new()),
        }
    }

    /// Replace the observer.
    pub fn with_observer(mut self, observer: impl StateObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    /// Handle one event.
    ///
    /// Input events received before [`ManagerEvent::Mount`] only record the
    /// new input. Events that do not change an input are no-ops.
    ///
    /// # Errors
    ///
    /// Engine construction and resolution failures are returned after the
    /// observer has seen them. Published state is left untouched.
    pub fn handle(&mut self, event: ManagerEvent) -> Result<Transition> {
        let mut changes = Changes::default();
        match event {
            ManagerEvent::Mount => {
                if self.mounted {
                    return Ok(Transition::Unchanged);
                }
                self.mounted = true;
                tracing::debug!("Mounting references manager");
                return self.run_pass(Changes::all(), false);
            }
            ManagerEvent::StyleChanged(style) => {
                changes.style = replace_if_changed(&mut self.props.style, style);
            }
            ManagerEvent::LocaleChanged(locale) => {
                changes.locale = replace_if_changed(&mut self.props.locale, locale);
            }
            ManagerEvent::ItemsChanged(items) => {
                changes.items = replace_if_changed(&mut self.props.items, items);
            }
            ManagerEvent::CitationsChanged(citations) => {
                changes.citations = replace_if_changed(&mut self.props.citations, citations);
            }
        }
        self.apply(changes)
    }

    pub fn mount(&mut self) -> Result<Transition> {
        self.handle(ManagerEvent::Mount)
    }

    pub fn set_style(&mut self, style: Option<String>) -> Result<Transition> {
        self.handle(ManagerEvent::StyleChanged(style))
    }

    pub fn set_locale(&mut self, locale: Option<String>) -> Result<Transition> {
        self.handle(ManagerEvent::LocaleChanged(locale))
    }

    pub fn set_items(&mut self, items: ItemMap) -> Result<Transition> {
        self.handle(ManagerEvent::ItemsChanged(items))
    }

    pub fn set_citations(&mut self, citations: Vec<ClusterDescriptor>) -> Result<Transition> {
        self.handle(ManagerEvent::CitationsChanged(citations))
    }

    /// Apply a complete new set of inputs as a single pass.
    pub fn update(&mut self, props: ManagerProps) -> Result<Transition> {
        let ManagerProps {
            style,
            locale,
            items,
            citations,
        } = props;
        let changes = Changes {
            style: replace_if_changed(&mut self.props.style, style),
            locale: replace_if_changed(&mut self.props.locale, locale),
            items: replace_if_changed(&mut self.props.items, items),
            citations: replace_if_changed(&mut self.props.citations, citations),
        };
        self.apply(changes)
    }

    /// Re-run work that failed in an earlier pass, without any input change.
    pub fn retry(&mut self) -> Result<Transition> {
        if !self.mounted {
            return Ok(Transition::Unchanged);
        }
        self.run_pass(Changes::default(), true)
    }

    /// Tear down: drop the engine and all derived state.
    pub fn unmount(&mut self) {
        if let Some(generation) = self.lifecycle.discard() {
            self.observer.on_engine_discarded(generation);
        }
        self.mounted = false;
        self.deferred = Pending::default();
        self.failed = Pending::default();
        self.published = PublishedState::default();
        tracing::debug!("Unmounted references manager");
    }

    pub fn state(&self) -> ManagerState {
        if self.mounted && self.lifecycle.current().is_some() {
            ManagerState::Ready
        } else {
            ManagerState::Uninitialized
        }
    }

    pub fn published(&self) -> &PublishedState {
        &self.published
    }

    pub fn bibliography(&self) -> Option<&BibliographyResult> {
        self.published.bibliography.as_ref()
    }

    pub fn citations(&self) -> &CitationMap {
        &self.published.citations
    }

    pub fn citation(&self, id: &str) -> Option<&CitationRecord> {
        self.published.citations.get(id)
    }

    /// Incremented every time new state is published.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn props(&self) -> &ManagerProps {
        &self.props
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Generation of the live engine, if any.
    pub fn engine_generation(&self) -> Option<u64> {
        self.lifecycle.generation()
    }

    /// Snapshot of the published state for downstream consumers.
    pub fn context(&self) -> ReferencesContext {
        ReferencesContext {
            bibliography: self
                .published
                .bibliography
                .as_ref()
                .map(|b| b.fragment.clone()),
            citations: self.published.citations.clone(),
            revision: self.revision,
        }
    }

    fn apply(&mut self, changes: Changes) -> Result<Transition> {
        if !changes.any() {
            return Ok(Transition::Unchanged);
        }
        if !self.mounted {
            tracing::trace!("Input recorded before mount");
            return Ok(Transition::Unchanged);
        }
        self.run_pass(changes, false)
    }

    fn run_pass(&mut self, changes: Changes, retry_failed: bool) -> Result<Transition> {
        let previous = self.lifecycle.generation();
        let status = self.lifecycle.ensure(
            &self.factory,
            self.props.style.as_deref(),
            self.props.locale.as_deref(),
            &self.props.items,
        );
        let status = match status {
            Ok(status) => status,
            Err(err) => {
                // Nothing ran; the inputs this pass saw are still owed.
                self.deferred.bibliography |= changes.items;
                self.deferred.citations |= changes.citations;
                tracing::warn!(error = %err, "Keeping previous citation engine");
                self.observer.on_error(&err);
                return Err(err);
            }
        };

        let work = match status {
            EngineStatus::Absent => {
                if let Some(generation) = previous {
                    self.observer.on_engine_discarded(generation);
                }
                return Ok(self.clear());
            }
            EngineStatus::Constructed => {
                self.notify_replaced(previous);
                Pending::both()
            }
            EngineStatus::Rebuilt => {
                self.notify_replaced(previous);
                self.requested_work(changes, retry_failed)
            }
            EngineStatus::Reused => self.requested_work(changes, retry_failed),
        };

        if !work.any() {
            return Ok(Transition::Unchanged);
        }

        if let Some(live) = self.lifecycle.current() {
            // Citations resolve against the same item map the bibliography sees.
            live.sys().set_items(self.props.items.clone());
        }

        let bibliography = match self.compute_bibliography(work.bibliography) {
            Ok(bibliography) => bibliography,
            Err(err) => {
                let failed = Pending {
                    bibliography: true,
                    citations: false,
                };
                let unattempted = Pending {
                    bibliography: false,
                    citations: work.citations,
                };
                return Err(self.fail(err, failed, unattempted));
            }
        };
        let citations = match self.compute_citations(work.citations) {
            Ok(citations) => citations,
            Err(err) => {
                let failed = Pending {
                    bibliography: false,
                    citations: true,
                };
                // The bibliography succeeded but is discarded with the pass.
                let discarded = Pending {
                    bibliography: work.bibliography,
                    citations: false,
                };
                return Err(self.fail(err, failed, discarded));
            }
        };

        self.deferred = Pending::default();
        self.failed.bibliography &= !work.bibliography;
        self.failed.citations &= !work.citations;
        Ok(self.commit(bibliography, citations))
    }

    /// Work for a pass on an engine bound to unchanged style and locale.
    fn requested_work(&self, changes: Changes, retry_failed: bool) -> Pending {
        let retried = if retry_failed {
            self.failed
        } else {
            Pending::default()
        };
        let never_built = self.published.bibliography.is_none() && !self.failed.bibliography;
        Pending {
            bibliography: changes.items
                || self.deferred.bibliography
                || retried.bibliography
                || never_built,
            citations: changes.citations || self.deferred.citations || retried.citations,
        }
    }

    fn notify_replaced(&self, previous: Option<u64>) {
        if let Some(generation) = previous {
            self.observer.on_engine_discarded(generation);
        }
        if let Some(generation) = self.lifecycle.generation() {
            self.observer.on_engine_constructed(generation);
        }
    }

    fn compute_bibliography(&mut self, run: bool) -> Result<Option<BibliographyResult>> {
        if !run {
            return Ok(None);
        }
        build_bibliography(self.lifecycle.current_mut(), &self.props.items, &self.config)
    }

    fn compute_citations(&mut self, run: bool) -> Result<Option<CitationMap>> {
        if !run {
            return Ok(None);
        }
        resolve_citations(self.lifecycle.current_mut(), &self.props.citations).map(Some)
    }

    /// Record a failed pass: the engine is poisoned and published state is
    /// left alone.
    fn fail(&mut self, err: Error, failed: Pending, deferred: Pending) -> Error {
        self.lifecycle.poison();
        self.failed.bibliography |= failed.bibliography;
        self.failed.citations |= failed.citations;
        self.deferred = deferred;
        tracing::warn!(error = %err, "References pass failed, keeping published state");
        self.observer.on_error(&err);
        err
    }

    fn commit(
        &mut self,
        bibliography: Option<BibliographyResult>,
        citations: Option<CitationMap>,
    ) -> Transition {
        let mut next = self.published.clone();
        if let Some(bibliography) = bibliography {
            next.bibliography = Some(bibliography);
        }
        if let Some(citations) = citations {
            next.citations = citations;
        }
        if next == self.published {
            tracing::debug!("Derived state unchanged, not republishing");
            return Transition::Unchanged;
        }
        self.publish(next)
    }

    fn clear(&mut self) -> Transition {
        self.deferred = Pending::default();
        self.failed = Pending::default();
        if self.published == PublishedState::default() {
            return Transition::Uninitialized;
        }
        self.publish(PublishedState::default());
        Transition::Uninitialized
    }

    fn publish(&mut self, state: PublishedState) -> Transition {
        self.published = state;
        self.revision += 1;
        tracing::debug!(revision = self.revision, "Publishing references state");
        self.observer.on_published(&self.published, self.revision);
        Transition::Published {
            revision: self.revision,
        }
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFactory;
    use crate::types::{Citation, CitationPosition};
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct RecordingObserver {
        events: RefCell<Vec<String>>,
    }

    impl StateObserver for RecordingObserver {
        fn on_engine_constructed(&self, generation: u64) {
            self.events.borrow_mut().push(format!("constructed {}", generation));
        }

        fn on_engine_discarded(&self, generation: u64) {
            self.events.borrow_mut().push(format!("discarded {}", generation));
        }

        fn on_published(&self, _state: &PublishedState, revision: u64) {
            self.events.borrow_mut().push(format!("published {}", revision));
        }

        fn on_error(&self, _error: &Error) {
            self.events.borrow_mut().push("error".to_string());
        }
    }

    fn items() -> ItemMap {
        let mut items = ItemMap::new();
        items.insert(
            "a1".to_string(),
            json!({"title": "Foo", "author": [{"family": "Doe", "given": "Jane"}]}),
        );
        items.insert(
            "a2".to_string(),
            json!({"title": "Bar", "author": [{"family": "Roe", "given": "Rick"}]}),
        );
        items
    }

    fn clusters() -> Vec<ClusterDescriptor> {
        vec![ClusterDescriptor::new(Citation::new("c1", ["a1"]), vec![], vec![])]
    }

    fn ready(factory: &ScriptedFactory) -> ReferencesManager<ScriptedFactory> {
        let mut manager = ReferencesManager::new(factory.clone());
        manager
            .update(
                ManagerProps::new("apa", "en-US")
                    .with_items(items())
                    .with_citations(clusters()),
            )
            .unwrap();
        manager.mount().unwrap();
        manager
    }

    #[test]
    fn test_mount_builds_everything() {
        let factory = ScriptedFactory::new();
        let mut manager = ReferencesManager::new(factory.clone());
        manager
            .update(
                ManagerProps::new("apa", "en-US")
                    .with_items(items())
                    .with_citations(clusters()),
            )
            .unwrap();
        assert_eq!(manager.state(), ManagerState::Uninitialized);
        assert_eq!(factory.constructions(), 0);

        let transition = manager.mount().unwrap();

        assert_eq!(transition, Transition::Published { revision: 1 });
        assert_eq!(manager.state(), ManagerState::Ready);
        assert_eq!(manager.citation("c1").unwrap().order, 0);
        let bibliography = manager.bibliography().unwrap();
        assert_eq!(bibliography.fragment.text_content(), "FooBar");
        assert_eq!(factory.constructions(), 1);
    }

    #[test]
    fn test_missing_locale_publishes_nothing() {
        let factory = ScriptedFactory::new();
        let mut manager = ReferencesManager::new(factory.clone());
        manager
            .update(ManagerProps {
                style: Some("apa".to_string()),
                locale: None,
                items: items(),
                citations: clusters(),
            })
            .unwrap();

        let transition = manager.mount().unwrap();

        assert_eq!(transition, Transition::Uninitialized);
        assert_eq!(manager.state(), ManagerState::Uninitialized);
        assert!(manager.bibliography().is_none());
        assert!(manager.citations().is_empty());
        assert_eq!(manager.revision(), 0);
        assert_eq!(factory.constructions(), 0);
    }

    #[test]
    fn test_locale_arriving_after_mount_initializes() {
        let factory = ScriptedFactory::new();
        let mut manager = ReferencesManager::new(factory.clone());
        manager.set_style(Some("apa".to_string())).unwrap();
        manager.set_items(items()).unwrap();
        manager.mount().unwrap();
        assert_eq!(manager.state(), ManagerState::Uninitialized);

        let transition = manager.set_locale(Some("en-US".to_string())).unwrap();
        assert_eq!(transition, Transition::Published { revision: 1 });
        assert_eq!(manager.state(), ManagerState::Ready);
        assert_eq!(manager.bibliography().unwrap().len(), 2);
    }

    #[test]
    fn test_identical_inputs_are_noops() {
        let factory = ScriptedFactory::new();
        let mut manager = ready(&factory);
        let bibliography_calls = factory.bibliography_calls();
        let cluster_calls = factory.cluster_calls();

        assert_eq!(manager.set_style(Some("apa".to_string())).unwrap(), Transition::Unchanged);
        assert_eq!(manager.set_locale(Some("en-US".to_string())).unwrap(), Transition::Unchanged);
        assert_eq!(manager.set_items(items()).unwrap(), Transition::Unchanged);
        assert_eq!(manager.set_citations(clusters()).unwrap(), Transition::Unchanged);
        let same = manager.props().clone();
        assert_eq!(manager.update(same).unwrap(), Transition::Unchanged);
        assert_eq!(manager.mount().unwrap(), Transition::Unchanged);

        assert_eq!(factory.constructions(), 1);
        assert_eq!(factory.bibliography_calls(), bibliography_calls);
        assert_eq!(factory.cluster_calls(), cluster_calls);
        assert_eq!(manager.revision(), 1);
    }

    #[test]
    fn test_items_change_reuses_engine_and_rebuilds_bibliography_only() {
        let factory = ScriptedFactory::new();
        let mut manager = ready(&factory);
        let generation = manager.engine_generation();
        let cluster_calls = factory.cluster_calls();

        let mut more = items();
        more.insert("a3".to_string(), json!({"title": "Baz"}));
        let transition = manager.set_items(more).unwrap();

        assert_eq!(transition, Transition::Published { revision: 2 });
        assert_eq!(manager.engine_generation(), generation);
        assert_eq!(factory.constructions(), 1);
        assert_eq!(factory.cluster_calls(), cluster_calls);
        assert_eq!(manager.bibliography().unwrap().fragment.text_content(), "FooBarBaz");
    }

    #[test]
    fn test_citations_change_resolves_citations_only() {
        let factory = ScriptedFactory::new();
        let mut manager = ready(&factory);
        let bibliography_calls = factory.bibliography_calls();

        let mut more = clusters();
        more.push(ClusterDescriptor::new(
            Citation::new("c2", ["a2", "a1"]),
            vec![CitationPosition::new("c1", 0)],
            vec![],
        ));
        manager.set_citations(more).unwrap();

        assert_eq!(factory.bibliography_calls(), bibliography_calls);
        assert_eq!(factory.constructions(), 1);
        assert_eq!(manager.citation("c2").unwrap().markup, "[2, 1]");
        assert_eq!(manager.citation("c2").unwrap().order, 1);
    }

    #[test]
    fn test_style_change_replaces_engine_and_rebuilds_everything() {
        let factory = ScriptedFactory::new();
        let observer = Rc::new(RecordingObserver::default());
        let mut manager = ReferencesManager::new(factory.clone()).with_observer(Rc::clone(&observer));
        manager
            .update(
                ManagerProps::new("apa", "en-US")
                    .with_items(items())
                    .with_citations(clusters()),
            )
            .unwrap();
        manager.mount().unwrap();
        let bibliography_calls = factory.bibliography_calls();
        let cluster_calls = factory.cluster_calls();

        manager.set_style(Some("chicago".to_string())).unwrap();

        assert_eq!(factory.constructions(), 2);
        assert_eq!(manager.engine_generation(), Some(2));
        assert_eq!(factory.bibliography_calls(), bibliography_calls + 1);
        assert_eq!(factory.cluster_calls(), cluster_calls + 1);
        let bibstart = manager.bibliography().unwrap().metadata.bibstart.clone().unwrap();
        assert!(bibstart.contains("data-style=\"chicago\""), "Got: {}", bibstart);
        assert_eq!(
            observer.events.borrow().as_slice(),
            &[
                "constructed 1".to_string(),
                "published 1".to_string(),
                "discarded 1".to_string(),
                "constructed 2".to_string(),
                "published 2".to_string(),
            ]
        );
    }

    #[test]
    fn test_locale_change_replaces_engine() {
        let factory = ScriptedFactory::new();
        let mut manager = ready(&factory);

        manager.set_locale(Some("fr-FR".to_string())).unwrap();

        assert_eq!(factory.constructions(), 2);
        let bibstart = manager.bibliography().unwrap().metadata.bibstart.clone().unwrap();
        assert!(bibstart.contains("lang=\"fr-FR\""), "Got: {}", bibstart);
    }

    #[test]
    fn test_construction_failure_keeps_previous_state() {
        let factory = ScriptedFactory::new();
        let mut manager = ready(&factory);
        let before = manager.published().clone();

        let err = manager.set_style(Some("invalid".to_string())).unwrap_err();

        assert!(err.is_construction());
        assert_eq!(manager.published(), &before);
        assert_eq!(manager.revision(), 1);
        assert_eq!(manager.engine_generation(), Some(1));
        assert_eq!(manager.state(), ManagerState::Ready);

        // A valid style recovers.
        manager.set_style(Some("chicago".to_string())).unwrap();
        assert_eq!(manager.engine_generation(), Some(2));
    }

    #[test]
    fn test_resolution_failure_is_all_or_nothing() {
        let factory = ScriptedFactory::new();
        let mut manager = ready(&factory);
        let before = manager.published().clone();

        let mut bad = clusters();
        bad.push(ClusterDescriptor::new(
            Citation::new("c2", ["missing"]),
            vec![CitationPosition::new("c1", 0)],
            vec![],
        ));
        let err = manager.set_citations(bad).unwrap_err();

        assert!(err.is_resolution());
        assert_eq!(manager.published(), &before);
        assert_eq!(manager.revision(), 1);

        // The failed engine is not reused; fixing the input rebuilds cleanly.
        manager.set_citations(clusters()).unwrap();
        assert_eq!(manager.engine_generation(), Some(2));
        assert_eq!(manager.published(), &before);
    }

    #[test]
    fn test_failed_bibliography_is_retried() {
        let factory = ScriptedFactory::new();
        let mut manager = ready(&factory);

        factory.state.fail_bibliography.set(true);
        let mut more = items();
        more.insert("a3".to_string(), json!({"title": "Baz"}));
        assert!(manager.set_items(more).is_err());
        assert_eq!(manager.bibliography().unwrap().fragment.text_content(), "FooBar");

        factory.state.fail_bibliography.set(false);
        let transition = manager.retry().unwrap();
        assert_eq!(transition, Transition::Published { revision: 2 });
        assert_eq!(manager.bibliography().unwrap().fragment.text_content(), "FooBarBaz");
    }

    #[test]
    fn test_invalid_locale_keeps_previous_state() {
        let factory = ScriptedFactory::new();
        let mut manager = ready(&factory);
        let before = manager.published().clone();

        let err = manager.set_locale(Some("invalid".to_string())).unwrap_err();

        assert!(err.is_construction());
        assert_eq!(manager.published(), &before);
        assert_eq!(manager.engine_generation(), Some(1));
        assert_eq!(manager.state(), ManagerState::Ready);

        manager.set_locale(Some("fr-FR".to_string())).unwrap();
        assert_eq!(manager.engine_generation(), Some(2));
        let bibstart = manager.bibliography().unwrap().metadata.bibstart.clone().unwrap();
        assert!(bibstart.contains("lang=\"fr-FR\""), "Got: {}", bibstart);
    }

    #[test]
    fn test_items_changed_during_construction_failure_are_not_lost() {
        let factory = ScriptedFactory::new();
        let mut manager = ready(&factory);

        assert!(manager.set_style(Some("invalid".to_string())).is_err());
        let mut more = items();
        more.insert("a3".to_string(), json!({"title": "Baz"}));
        let err = manager.set_items(more).unwrap_err();
        assert!(err.is_construction());
        assert_eq!(manager.bibliography().unwrap().fragment.text_content(), "FooBar");

        // Back to the style the live engine is bound to: no new engine, but
        // the bibliography catches up with the items.
        let transition = manager.set_style(Some("apa".to_string())).unwrap();

        assert_eq!(transition, Transition::Published { revision: 2 });
        assert_eq!(manager.engine_generation(), Some(1));
        assert_eq!(manager.bibliography().unwrap().fragment.text_content(), "FooBarBaz");
    }

    #[test]
    fn test_failed_citations_do_not_block_bibliography_updates() {
        let factory = ScriptedFactory::new();
        let mut manager = ready(&factory);
        let mut bad = clusters();
        bad.push(ClusterDescriptor::new(
            Citation::new("c2", ["missing"]),
            vec![CitationPosition::new("c1", 0)],
            vec![],
        ));
        assert!(manager.set_citations(bad).is_err());
        let cluster_calls = factory.cluster_calls();

        let mut more = items();
        more.insert("a3".to_string(), json!({"title": "Baz"}));
        let transition = manager.set_items(more).unwrap();

        assert_eq!(transition, Transition::Published { revision: 2 });
        assert_eq!(manager.bibliography().unwrap().fragment.text_content(), "FooBarBaz");
        assert_eq!(factory.cluster_calls(), cluster_calls);
        assert_eq!(manager.citations().len(), 1);

        // The failed citations are only re-run on request.
        assert!(manager.retry().unwrap_err().is_resolution());
        assert_eq!(manager.revision(), 2);
    }

    #[test]
    fn test_bibliography_discarded_by_failed_citations_is_rebuilt() {
        let factory = ScriptedFactory::new();
        let mut manager = ready(&factory);
        let mut more = items();
        more.insert("a3".to_string(), json!({"title": "Baz"}));
        let mut bad = clusters();
        bad.push(ClusterDescriptor::new(Citation::new("c2", ["missing"]), vec![], vec![]));
        let mut props = manager.props().clone();
        props.items = more;
        props.citations = bad;

        assert!(manager.update(props).is_err());
        assert_eq!(manager.bibliography().unwrap().fragment.text_content(), "FooBar");

        let transition = manager.set_citations(clusters()).unwrap();

        assert_eq!(transition, Transition::Published { revision: 2 });
        assert_eq!(manager.bibliography().unwrap().fragment.text_content(), "FooBarBaz");
    }

    #[test]
    fn test_empty_items_is_computed_not_missing() {
        let factory = ScriptedFactory::new();
        let mut manager = ReferencesManager::new(factory.clone());
        manager.update(ManagerProps::new("apa", "en-US")).unwrap();
        manager.mount().unwrap();

        let bibliography = manager.bibliography().unwrap();
        assert!(bibliography.is_empty());
        let calls = factory.bibliography_calls();

        // A citations change does not rebuild an already computed empty bibliography.
        let uncited = Citation::new("c1", Vec::<String>::new());
        manager
            .set_citations(vec![ClusterDescriptor::new(uncited, vec![], vec![])])
            .unwrap();
        assert_eq!(factory.bibliography_calls(), calls);

        manager.set_items(items()).unwrap();
        assert_eq!(manager.bibliography().unwrap().len(), 2);
    }

    #[test]
    fn test_removing_style_clears_published_state() {
        let factory = ScriptedFactory::new();
        let mut manager = ready(&factory);

        let transition = manager.set_style(None).unwrap();

        assert_eq!(transition, Transition::Uninitialized);
        assert_eq!(manager.state(), ManagerState::Uninitialized);
        assert!(manager.bibliography().is_none());
        assert!(manager.citations().is_empty());
        assert_eq!(manager.revision(), 2);
        assert_eq!(manager.engine_generation(), None);
    }

    #[test]
    fn test_unmount_releases_engine() {
        let factory = ScriptedFactory::new();
        let mut manager = ready(&factory);

        manager.unmount();

        assert!(!manager.is_mounted());
        assert_eq!(manager.state(), ManagerState::Uninitialized);
        assert_eq!(manager.engine_generation(), None);
        assert!(manager.bibliography().is_none());

        manager.mount().unwrap();
        assert_eq!(factory.constructions(), 2);
        assert!(manager.citation("c1").is_some());
    }

    #[test]
    fn test_context_snapshot() {
        let factory = ScriptedFactory::new();
        let manager = ready(&factory);

        let context = manager.context();
        assert_eq!(context.revision, 1);
        assert_eq!(context.citations.len(), 1);
        assert_eq!(context.bibliography.unwrap().text_content(), "FooBar");
    }
}
