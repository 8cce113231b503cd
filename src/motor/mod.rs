// src/motor/mod.rs - Per-motor controller: polling, motion dispatch, move wait
pub mod gate;

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

use crate::device::{DeviceError, DeviceProxy, DeviceState, LimitDirection};

pub use gate::{CommandGate, OperationGuard};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MotorError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
    #[error("A move is already outstanding on '{0}'")]
    MoveOutstanding(String),
    #[error("Step target overflows: {current} + {delta}")]
    StepOverflow { current: i64, delta: i64 },
}

/// Immutable identity of a motor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotorIdentity {
    pub display_name: String,
    pub device_address: String,
}

/// Notifications broadcast from the poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum MotorEvent {
    PositionChanged(f64),
    SpeedChanged(f64),
    MoveFinished,
    PollFailed(String),
}

/// Operator-level command against one motor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotorCommand {
    MoveTo(f64),
    MoveSteps(i64),
    GoToLimit(LimitDirection),
    SetSpeed(f64),
    Stop,
}

impl MotorCommand {
    /// Whether this command causes physical movement and waits for completion.
    pub fn is_motion(&self) -> bool {
        matches!(self, MotorCommand::MoveTo(_) | MotorCommand::MoveSteps(_) | MotorCommand::GoToLimit(_))
    }
}

/// The three commands that go through the move wait.
#[derive(Debug, Clone, Copy)]
enum Motion {
    To(f64),
    Steps(i64),
    Limit(LimitDirection),
}

#[derive(Debug, Clone, Copy, Default)]
struct Observed {
    position: f64,
    speed: f64,
}

/// Values read from the device in one poll cycle, before any are applied.
struct Reading {
    position: f64,
    speed: f64,
    state: Option<DeviceState>,
}

/// Controller for one motor.
///
/// Owns the device proxy exclusively; every device call goes through
/// `device`, which serializes poll cycles against command dispatch.
/// `outstanding` is the move flag itself: a motion command sets it and only
/// a poll cycle that observes `DeviceState::On` clears it.
pub struct MotorController {
    identity: MotorIdentity,
    device: Mutex<Box<dyn DeviceProxy>>,
    observed: Mutex<Observed>,
    outstanding: watch::Sender<bool>,
    events: broadcast::Sender<MotorEvent>,
    poll_interval: Duration,
    move_timeout: Duration,
}

impl MotorController {
    pub fn new(
        identity: MotorIdentity,
        device: Box<dyn DeviceProxy>,
        poll_interval: Duration,
        move_timeout: Duration,
    ) -> Self {
        tracing::info!(
            "Motor '{}' at {} (poll every {:?}, move timeout {:?})",
            identity.display_name,
            identity.device_address,
            poll_interval,
            move_timeout
        );
        let (outstanding, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            identity,
            device: Mutex::new(device),
            observed: Mutex::new(Observed::default()),
            outstanding,
            events,
            poll_interval,
            move_timeout,
        }
    }

    pub fn identity(&self) -> &MotorIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.display_name
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MotorEvent> {
        self.events.subscribe()
    }

    /// Watch on the outstanding-move flag.
    pub fn watch_outstanding(&self) -> watch::Receiver<bool> {
        self.outstanding.subscribe()
    }

    pub fn is_move_outstanding(&self) -> bool {
        *self.outstanding.borrow()
    }

    pub async fn last_known_position(&self) -> f64 {
        self.observed.lock().await.position
    }

    pub async fn last_known_speed(&self) -> f64 {
        self.observed.lock().await.speed
    }

    /// Spawn the recurring poll. Runs until `shutdown_rx` fires.
    pub fn start_polling(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(controller.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Polling for '{}' shutting down", controller.name());
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = controller.poll().await {
                            tracing::warn!("Poll of '{}' failed: {}", controller.name(), e);
                            let _ = controller.events.send(MotorEvent::PollFailed(e.to_string()));
                        }
                    }
                }
            }
        })
    }

    /// One poll cycle. Either every read succeeds and the changes are
    /// applied, or nothing is touched.
    pub async fn poll(&self) -> Result<(), MotorError> {
        // Held for the whole cycle so cycles never overlap.
        let mut observed = self.observed.lock().await;
        let reading = {
            let mut device = self.device.lock().await;
            let position = device.read_position().await?;
            let speed = device.read_speed().await?;
            let state = if self.is_move_outstanding() {
                Some(device.read_state().await?)
            } else {
                None
            };
            Reading { position, speed, state }
        };

        if reading.position != observed.position {
            observed.position = reading.position;
            let _ = self.events.send(MotorEvent::PositionChanged(reading.position));
        }
        if reading.speed != observed.speed {
            observed.speed = reading.speed;
            let _ = self.events.send(MotorEvent::SpeedChanged(reading.speed));
        }
        if reading.state == Some(DeviceState::On) {
            let cleared = self.outstanding.send_if_modified(|outstanding| std::mem::replace(outstanding, false));
            if cleared {
                tracing::debug!("'{}' reached {}; move finished", self.name(), DeviceState::On);
                let _ = self.events.send(MotorEvent::MoveFinished);
            }
        }
        Ok(())
    }

    pub async fn move_to(&self, position: f64) -> Result<(), MotorError> {
        tracing::info!("'{}' move to {}", self.name(), position);
        self.run_motion(Motion::To(position)).await
    }

    pub async fn move_steps(&self, delta: i64) -> Result<(), MotorError> {
        tracing::info!("'{}' move {} steps", self.name(), delta);
        self.run_motion(Motion::Steps(delta)).await
    }

    pub async fn go_to_limit(&self, direction: LimitDirection) -> Result<(), MotorError> {
        tracing::info!("'{}' go to {} limit", self.name(), direction);
        self.run_motion(Motion::Limit(direction)).await
    }

    /// Write the speed field. Does not wait and does not mark a move.
    pub async fn set_speed(&self, speed: f64) -> Result<(), MotorError> {
        tracing::info!("'{}' set speed {}", self.name(), speed);
        self.device.lock().await.write_speed(speed).await?;
        Ok(())
    }

    /// Stop immediately. The outstanding flag is left for the next poll.
    pub async fn stop(&self) -> Result<(), MotorError> {
        tracing::warn!("'{}' stop", self.name());
        self.device.lock().await.stop().await?;
        Ok(())
    }

    pub async fn execute(&self, command: MotorCommand) -> Result<(), MotorError> {
        match command {
            MotorCommand::MoveTo(position) => self.move_to(position).await,
            MotorCommand::MoveSteps(delta) => self.move_steps(delta).await,
            MotorCommand::GoToLimit(direction) => self.go_to_limit(direction).await,
            MotorCommand::SetSpeed(speed) => self.set_speed(speed).await,
            MotorCommand::Stop => self.stop().await,
        }
    }

    async fn run_motion(&self, motion: Motion) -> Result<(), MotorError> {
        self.dispatch_motion(motion).await?;
        self.wait_for_move().await;
        Ok(())
    }

    /// Issue the device command and raise the outstanding flag under one
    /// device lock, so no poll cycle can run in between. A failed command
    /// returns before the flag is raised.
    async fn dispatch_motion(&self, motion: Motion) -> Result<(), MotorError> {
        let mut device = self.device.lock().await;
        if self.is_move_outstanding() {
            return Err(MotorError::MoveOutstanding(self.name().to_string()));
        }
        match motion {
            Motion::To(position) => device.write_position(position).await?,
            Motion::Steps(delta) => {
                let current = device.read_step_position().await?;
                let target = current
                    .checked_add(delta)
                    .ok_or(MotorError::StepOverflow { current, delta })?;
                tracing::debug!("'{}' step target {} -> {}", self.name(), current, target);
                device.setup_step_move(target).await?;
                device.start_move().await?;
            }
            Motion::Limit(direction) => device.move_to_limit(direction).await?,
        }
        self.outstanding.send_replace(true);
        Ok(())
    }

    /// Suspend until a poll clears the outstanding flag or the move timeout
    /// elapses. Timing out is a normal outcome and leaves the flag set.
    async fn wait_for_move(&self) {
        let mut outstanding = self.outstanding.subscribe();
        let finished = tokio::time::timeout(self.move_timeout, outstanding.wait_for(|o| !*o))
            .await
            .is_ok();
        if finished {
            tracing::info!("'{}' move finished", self.name());
        } else {
            tracing::info!(
                "'{}' did not report idle within {:?}; device may still be moving",
                self.name(),
                self.move_timeout
            );
        }
    }
}
