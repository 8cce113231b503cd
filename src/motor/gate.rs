// src/motor/gate.rs - One motion-affecting operation per motor at a time
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Per-motor exclusion for operator-issued commands.
///
/// A begin is refused while the motor has a move outstanding or while
/// another gated operation is in flight. Refusal never blocks or queues.
/// The gate publishes whether the motor's controls should be enabled.
#[derive(Debug)]
pub struct CommandGate {
    motor: String,
    in_flight: AtomicBool,
    outstanding: watch::Receiver<bool>,
    controls: watch::Sender<bool>,
}

impl CommandGate {
    pub fn new(motor: &str, outstanding: watch::Receiver<bool>) -> Self {
        let (controls, _) = watch::channel(true);
        Self {
            motor: motor.to_string(),
            in_flight: AtomicBool::new(false),
            outstanding,
            controls,
        }
    }

    pub fn try_begin_operation(&self) -> bool {
        if *self.outstanding.borrow() {
            tracing::debug!("Gate '{}': refused, move still outstanding", self.motor);
            return false;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Gate '{}': refused, operation in flight", self.motor);
            return false;
        }
        self.controls.send_replace(false);
        true
    }

    pub fn end_operation(&self) {
        self.in_flight.store(false, Ordering::Release);
        self.controls.send_replace(true);
    }

    /// Begin an operation scoped to the returned guard.
    pub fn begin(&self) -> Option<OperationGuard<'_>> {
        if self.try_begin_operation() {
            Some(OperationGuard { gate: self })
        } else {
            None
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn controls_enabled(&self) -> bool {
        *self.controls.borrow()
    }

    /// Receives `true` when controls become enabled, `false` when disabled.
    pub fn watch_controls(&self) -> watch::Receiver<bool> {
        self.controls.subscribe()
    }
}

/// Releases the gate when dropped, whichever way the operation ends.
#[must_use = "the operation ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct OperationGuard<'a> {
    gate: &'a CommandGate,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.gate.end_operation();
    }
}
