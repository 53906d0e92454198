//! Business-hours gate.
//!
//! Two states: Active inside the configured opening window (inclusive at both
//! ends, whole hours) and Idle outside it. The station evaluates the gate on
//! every poll and reacts to the transition it reports.

use chrono::{NaiveTime, Timelike};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Active,
    Idle,
}

/// What changed on the latest evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateTransition {
    Unchanged,
    /// Trading started; ingestion resumes.
    Opened,
    /// Trading ended; the open hour must be flushed and the output closed.
    Closed,
}

#[derive(Debug, Clone)]
pub struct BusinessHoursGate {
    opening_hour: u32,
    closing_hour: u32,
    state: GateState,
}

impl BusinessHoursGate {
    /// Starts Idle so the first evaluation inside the window reports `Opened`
    /// and the first evaluation outside it reports nothing.
    pub fn new(opening_hour: u32, closing_hour: u32) -> Self {
        Self {
            opening_hour,
            closing_hour,
            state: GateState::Idle,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == GateState::Active
    }

    /// Whether `time` falls inside the trading window.
    pub fn within_hours(&self, time: NaiveTime) -> bool {
        (self.opening_hour..=self.closing_hour).contains(&time.hour())
    }

    /// Re-evaluate against the wall clock.
    pub fn evaluate(&mut self, time: NaiveTime) -> GateTransition {
        let next = if self.within_hours(time) {
            GateState::Active
        } else {
            GateState::Idle
        };
        let transition = match (self.state, next) {
            (GateState::Idle, GateState::Active) => GateTransition::Opened,
            (GateState::Active, GateState::Idle) => GateTransition::Closed,
            _ => GateTransition::Unchanged,
        };
        if transition != GateTransition::Unchanged {
            info!(
                state = ?next,
                opening = self.opening_hour,
                closing = self.closing_hour,
                "Business hours gate changed"
            );
        }
        self.state = next;
        transition
    }
}
