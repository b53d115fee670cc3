// src/reconciler.rs
//
// Probe scheduling for the reconciliation loop. Probes spawn a subprocess,
// so back-to-back probes are suppressed by a minimum inter-probe spacing,
// and states still in transition are not pushed back into the controller.
use std::time::{Duration, Instant};

use crate::controller::ConnectionStatus;

#[derive(Debug)]
pub struct Reconciler {
    interval: Duration,
    debounce: Duration,
    last_probe: Option<Instant>,
}

impl Reconciler {
    pub fn new(interval: Duration, debounce: Duration) -> Self {
        Self {
            interval,
            debounce,
            last_probe: None,
        }
    }

    /// True when the fixed-interval schedule calls for a probe.
    pub fn probe_due(&self, now: Instant) -> bool {
        match self.last_probe {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        }
    }

    /// True when an explicit refresh request may probe; requests landing
    /// inside the debounce window are dropped.
    pub fn refresh_allowed(&self, now: Instant) -> bool {
        match self.last_probe {
            None => true,
            Some(last) => now.duration_since(last) >= self.debounce,
        }
    }

    /// Records that a probe ran, whatever triggered it.
    pub fn note_probe(&mut self, now: Instant) {
        self.last_probe = Some(now);
    }

    /// Transitional results are skipped rather than reconciled; pushing them
    /// would fight an in-flight optimistic transition.
    pub fn should_reconcile(status: &ConnectionStatus) -> bool {
        !matches!(
            status,
            ConnectionStatus::Connecting | ConnectionStatus::Disconnecting
        )
    }
}
