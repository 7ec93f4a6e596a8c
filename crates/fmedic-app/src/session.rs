//! Per-invocation test session state

use std::time::Duration;

use chrono::{DateTime, Local};

use fmedic_core::prelude::*;
use fmedic_core::{Action, Outcome, Platform, SessionPhase, Target};

use crate::config::MedicConfig;

/// One acquire → deploy → wait → collect → teardown lifecycle.
///
/// Owned and mutated only by the orchestrator. Phases move forward only and
/// the first settled outcome sticks.
#[derive(Debug, Clone)]
pub struct Session {
    pub platform: Platform,
    pub action: Action,
    /// Absolute limit on the process + wait steps
    pub timeout: Duration,
    /// How long the device gets to connect at all
    pub liveness_timeout: Duration,
    phase: SessionPhase,
    target: Option<Target>,
    outcome: Outcome,
    pub started_at: DateTime<Local>,
}

impl Session {
    pub fn new(
        platform: Platform,
        action: Action,
        timeout: Duration,
        liveness_timeout: Duration,
    ) -> Self {
        Self {
            platform,
            action,
            timeout,
            liveness_timeout,
            phase: SessionPhase::default(),
            target: None,
            outcome: Outcome::Pending,
            started_at: Local::now(),
        }
    }

    /// Session for a validated configuration
    pub fn from_config(config: &MedicConfig) -> Result<Self> {
        Ok(Self::new(
            config.platform()?,
            config.action,
            config.timeout(),
            config.channel.initial_connection_timeout(),
        ))
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Move to `next`. Backward moves are refused and return `false`.
    pub fn advance(&mut self, next: SessionPhase) -> bool {
        if next < self.phase {
            warn!("Refusing phase change {} -> {}", self.phase, next);
            return false;
        }
        if next != self.phase {
            debug!("Session phase {} -> {}", self.phase, next);
            self.phase = next;
        }
        true
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    /// Record the acquired target. A session holds at most one.
    pub fn set_target(&mut self, target: Target) {
        if let Some(existing) = &self.target {
            warn!("Replacing target {} with {}", existing, target);
        }
        self.target = Some(target);
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Settle the outcome. Later calls are ignored; returns whether this one took.
    pub fn settle(&mut self, outcome: Outcome) -> bool {
        if self.outcome.is_settled() || !outcome.is_settled() {
            return false;
        }
        self.outcome = outcome;
        true
    }

    pub fn is_build_only(&self) -> bool {
        self.action.is_build_only()
    }

    /// Elapsed time since the session began
    pub fn elapsed(&self) -> chrono::Duration {
        Local::now() - self.started_at
    }
}
