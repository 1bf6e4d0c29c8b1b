/*
 * lifecycle.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Engine construction, reuse and replacement.
 */

//! Engine lifecycle management.
//!
//! At most one engine is live at a time. It is bound to the style and
//! locale it was constructed with; when either changes, the engine and its
//! [`SystemHandle`] are dropped together and a replacement is constructed.
//! Engines are never rebound in place.

use crate::engine::{EngineFactory, SystemHandle};
use crate::error::{Error, Result};
use crate::types::ItemMap;

/// An engine together with its lookup handle and the inputs it is bound to.
#[derive(Debug)]
pub struct LiveEngine<E> {
    engine: E,
    sys: SystemHandle,
    style: String,
    locale: String,
    generation: u64,
}

impl<E> LiveEngine<E> {
    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn sys(&self) -> &SystemHandle {
        &self.sys
    }

    /// The style this engine was constructed with.
    pub fn style(&self) -> &str {
        &self.style
    }

    /// The locale this engine was constructed with.
    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Identity of this engine instance within its lifecycle.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn is_bound_to(&self, style: &str, locale: &str) -> bool {
        self.style == style && self.locale == locale
    }
}

/// What [`EngineLifecycle::ensure`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Style or locale is missing; no engine is live.
    Absent,
    /// The live engine was already bound to the current inputs.
    Reused,
    /// A new engine was constructed for new inputs (first use or a style or
    /// locale change).
    Constructed,
    /// A poisoned engine was replaced by a fresh one bound to the same inputs.
    Rebuilt,
}

/// Owner of the single live engine.
#[derive(Debug)]
pub struct EngineLifecycle<E> {
    current: Option<LiveEngine<E>>,
    poisoned: bool,
    next_generation: u64,
}

impl<E> Default for EngineLifecycle<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EngineLifecycle<E> {
    pub fn new() -> Self {
        Self {
            current: None,
            poisoned: false,
            next_generation: 1,
        }
    }

    /// Make sure the live engine is bound to `style` and `locale`.
    ///
    /// - Either input missing: any live engine is discarded, `Absent`.
    /// - Live engine bound to the same inputs and not poisoned: `Reused`.
    /// - Live engine bound to the same inputs but poisoned: a fresh engine
    ///   replaces it, `Rebuilt`.
    /// - Otherwise a new engine is constructed with a fresh [`SystemHandle`]
    ///   seeded with `items`, replacing the old one: `Constructed`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineConstruction`] if the factory rejects the
    /// inputs. The previously live engine, if any, stays installed.
    pub fn ensure<F>(
        &mut self,
        factory: &F,
        style: Option<&str>,
        locale: Option<&str>,
        items: &ItemMap,
    ) -> Result<EngineStatus>
    where
        F: EngineFactory<Engine = E>,
    {
        let (Some(style), Some(locale)) = (style, locale) else {
            self.discard();
            return Ok(EngineStatus::Absent);
        };

        let bound = self
            .current
            .as_ref()
            .is_some_and(|live| live.is_bound_to(style, locale));
        if bound && !self.poisoned {
            return Ok(EngineStatus::Reused);
        }

        let sys = SystemHandle::new(locale, items.clone());
        let engine = factory
            .construct(sys.clone(), style)
            .map_err(Error::construction)?;

        let generation = self.next_generation;
        self.next_generation += 1;
        if let Some(old) = self.current.take() {
            tracing::debug!(
                old = old.generation,
                new = generation,
                "Replacing citation engine"
            );
        } else {
            tracing::debug!(generation, "Constructed citation engine");
        }

        self.current = Some(LiveEngine {
            engine,
            sys,
            style: style.to_string(),
            locale: locale.to_string(),
            generation,
        });
        self.poisoned = false;
        if bound {
            Ok(EngineStatus::Rebuilt)
        } else {
            Ok(EngineStatus::Constructed)
        }
    }

    pub fn current(&self) -> Option<&LiveEngine<E>> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut LiveEngine<E>> {
        self.current.as_mut()
    }

    /// Generation of the live engine, if any.
    pub fn generation(&self) -> Option<u64> {
        self.current.as_ref().map(|live| live.generation)
    }

    /// Mark the live engine as unusable after a failed pass.
    ///
    /// It stays installed (and keeps answering [`current`](Self::current))
    /// until the next [`ensure`](Self::ensure) replaces it.
    pub fn poison(&mut self) {
        if self.current.is_some() {
            self.poisoned = true;
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Drop the live engine, returning its generation.
    pub fn discard(&mut self) -> Option<u64> {
        self.poisoned = false;
        let old = self.current.take()?;
        tracing::debug!(generation = old.generation, "Discarded citation engine");
        Some(old.generation)
    }
}
