//! One-shot hook session: `Uninitialized -> LayoutProbed -> Hooked`.
//!
//! The session owns the frozen layout and the installed hook records. There
//! is no way back; hooks last until the process exits.

use log::{error, info, warn};

use crate::engine::HostEngine;
use crate::error::{InstallError, SessionError};
use crate::layout::{self, LayoutConfig, ProbeMethod};
use crate::patcher::{self, HookRecord, InstallTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    LayoutProbed,
    Hooked,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::LayoutProbed => "layout-probed",
            SessionState::Hooked => "hooked",
        };
        f.write_str(name)
    }
}

/// Everything a full initialization needs.
pub struct HookPlan<'a, R> {
    pub owner: R,
    pub probe_method: ProbeMethod<'a>,
    pub scan_window: usize,
    pub targets: Vec<InstallTarget<'a, R>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    AlreadyHooked,
    Hooked { installed: usize, failed: usize },
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    layout: Option<LayoutConfig>,
    hooks: Vec<HookRecord>,
    probe_runs: u32,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub const fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            layout: None,
            hooks: Vec::new(),
            probe_runs: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_hooked(&self) -> bool {
        self.state == SessionState::Hooked
    }

    pub fn layout(&self) -> Option<&LayoutConfig> {
        self.layout.as_ref()
    }

    pub fn hooks(&self) -> &[HookRecord] {
        &self.hooks
    }

    /// Number of times the prober actually ran.
    pub fn probe_runs(&self) -> u32 {
        self.probe_runs
    }

    /// Probe the layout once. Later calls return the frozen result.
    pub fn probe<E: HostEngine>(
        &mut self,
        engine: &E,
        owner: E::Ref,
        method: &ProbeMethod<'_>,
        window: usize,
    ) -> Result<LayoutConfig, SessionError> {
        if let Some(layout) = self.layout {
            return Ok(layout);
        }
        if self.state != SessionState::Uninitialized {
            return Err(SessionError::InvalidTransition {
                action: "probe",
                state: self.state,
            });
        }

        self.probe_runs += 1;
        let layout = layout::probe(engine, owner, method, window)?;
        self.layout = Some(layout);
        self.state = SessionState::LayoutProbed;
        Ok(layout)
    }

    /// Install one hook. Only valid between probing and `mark_hooked`.
    pub fn install<E: HostEngine>(
        &mut self,
        engine: &E,
        target: &InstallTarget<'_, E::Ref>,
    ) -> Result<HookRecord, InstallError> {
        if self.state == SessionState::Hooked {
            warn!("Session already hooked, refusing to patch {}", target.label);
            return Err(InstallError::AlreadyHooked(target.handle));
        }
        if self.hooks.iter().any(|h| h.handle == target.handle) {
            return Err(InstallError::AlreadyHooked(target.handle));
        }

        let record = patcher::install(engine, self.layout.as_ref(), target)?;
        self.hooks.push(record);
        Ok(record)
    }

    /// Final transition. Requires at least one installed hook.
    pub fn mark_hooked(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::LayoutProbed if !self.hooks.is_empty() => {
                self.state = SessionState::Hooked;
                Ok(())
            }
            SessionState::LayoutProbed => Err(SessionError::NothingHooked),
            state => Err(SessionError::InvalidTransition {
                action: "mark hooked",
                state,
            }),
        }
    }

    /// Probe, run `between` (managed callback setup), install every target and
    /// mark the session hooked. A second call after success is a no-op.
    pub fn initialize<E, F>(
        &mut self,
        engine: &E,
        plan: &HookPlan<'_, E::Ref>,
        between: F,
    ) -> Result<InitOutcome, SessionError>
    where
        E: HostEngine,
        F: FnOnce(&E),
    {
        if self.is_hooked() {
            warn!("Hook already active");
            return Ok(InitOutcome::AlreadyHooked);
        }

        self.probe(engine, plan.owner, &plan.probe_method, plan.scan_window)?;
        between(engine);

        let mut installed = 0;
        let mut failed = 0;
        for target in &plan.targets {
            match self.install(engine, target) {
                Ok(_) => {
                    info!("Successfully hooked {}", target.label);
                    installed += 1;
                }
                Err(e) => {
                    error!("Failed to hook {}: {}", target.label, e);
                    failed += 1;
                }
            }
        }

        self.mark_hooked()?;
        Ok(InitOutcome::Hooked { installed, failed })
    }
}
