//! Mount lifecycle of one map
//!
//! ```text
//! Uninitialized ──► Loading ──► Ready ──► Destroyed
//!       │              │  └──────┼──────────▲
//!       │              ▼         ▼          │
//!       │            Error ◄─────┘          │
//!       └───────────────────────────────────┘
//! ```
//!
//! The manager owns the [`ProviderHandle`] exclusively. It performs no vendor
//! calls itself: transitions that release a handle return it so the caller
//! can hand it to `ProviderAdapter::destroy`.

use crate::{provider::ProviderHandle, MapError, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    Loading,
    Ready,
    Error,
    Destroyed,
}

impl LifecycleState {
    pub fn can_transition(self, to: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, to),
            (Uninitialized, Loading)
                | (Uninitialized, Destroyed)
                | (Loading, Ready)
                | (Loading, Error)
                | (Loading, Destroyed)
                | (Ready, Error)
                | (Ready, Destroyed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == LifecycleState::Destroyed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Loading => "loading",
            LifecycleState::Ready => "ready",
            LifecycleState::Error => "error",
            LifecycleState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one load attempt. A completion carrying a stale ticket is
/// discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
}

impl LoadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// What `complete_load` did with the initialize result
#[derive(Debug)]
pub enum LoadCompletion {
    /// The handle is installed and the manager is `Ready`
    Ready,
    /// The manager moved to `Error`
    Failed(MapError),
    /// The load was cancelled or superseded. A handle that arrived anyway is
    /// returned for immediate destruction.
    Discarded(Option<ProviderHandle>),
}

pub struct LifecycleManager {
    state: LifecycleState,
    generation: u64,
    handle: Option<ProviderHandle>,
    error: Option<MapError>,
    history: Vec<LifecycleState>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            generation: 0,
            handle: None,
            error: None,
            history: vec![LifecycleState::Uninitialized],
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == LifecycleState::Ready
    }

    pub fn is_loading(&self) -> bool {
        self.state == LifecycleState::Loading
    }

    pub fn handle(&self) -> Option<&ProviderHandle> {
        self.handle.as_ref()
    }

    /// The error that moved the manager to `Error`
    pub fn error(&self) -> Option<&MapError> {
        self.error.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Every state entered so far, starting with `Uninitialized`
    pub fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    fn transition(&mut self, to: LifecycleState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(MapError::InvalidState(format!(
                "lifecycle cannot go from {} to {}",
                self.state, to
            )));
        }
        log::debug!("lifecycle {} -> {}", self.state, to);
        self.state = to;
        self.history.push(to);
        Ok(())
    }

    /// Starts the single load attempt this manager allows
    pub fn begin_load(&mut self) -> Result<LoadTicket> {
        self.transition(LifecycleState::Loading)?;
        self.generation += 1;
        Ok(LoadTicket {
            generation: self.generation,
        })
    }

    /// Records the outcome of the initialize call started with `ticket`
    pub fn complete_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<ProviderHandle>,
    ) -> LoadCompletion {
        if ticket.generation != self.generation || self.state != LifecycleState::Loading {
            log::debug!(
                "discarding load {} completing in state {}",
                ticket.generation,
                self.state
            );
            return LoadCompletion::Discarded(result.ok());
        }

        match result {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state = LifecycleState::Ready;
                self.history.push(LifecycleState::Ready);
                log::debug!("lifecycle loading -> ready");
                LoadCompletion::Ready
            }
            Err(error) => {
                self.error = Some(error.clone());
                self.state = LifecycleState::Error;
                self.history.push(LifecycleState::Error);
                log::debug!("lifecycle loading -> error: {}", error);
                LoadCompletion::Failed(error)
            }
        }
    }

    /// `Ready -> Error` on a fatal vendor failure. Returns the handle to be
    /// destroyed.
    pub fn fail(&mut self, error: MapError) -> Result<Option<ProviderHandle>> {
        self.transition(LifecycleState::Error)?;
        self.error = Some(error);
        Ok(self.handle.take())
    }

    /// Moves to `Destroyed` from any live state, returning the handle to be
    /// destroyed. From `Error` the state is left alone; repeated calls are
    /// no-ops.
    pub fn destroy(&mut self) -> Option<ProviderHandle> {
        match self.state {
            LifecycleState::Destroyed | LifecycleState::Error => self.handle.take(),
            _ => {
                // Every non-terminal state other than Error may be destroyed
                let _ = self.transition(LifecycleState::Destroyed);
                self.handle.take()
            }
        }
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}
