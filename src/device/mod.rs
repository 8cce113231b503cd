// src/device/mod.rs - Contract for the remote motor device proxy
pub mod simulated;

use async_trait::async_trait;
use thiserror::Error;

pub use simulated::SimulatedStage;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Communication with {address} failed: {reason}")]
    Communication { address: String, reason: String },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Device {0} is not reachable")]
    Unreachable(String),
}

/// Discrete device state as reported by the control layer.
///
/// `On` is the idle/ready state and is what the controller treats as
/// "motion complete".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    On,
    Off,
    Moving,
    Alarm,
    Fault,
    Unknown,
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceState::On => "ON",
            DeviceState::Off => "OFF",
            DeviceState::Moving => "MOVING",
            DeviceState::Alarm => "ALARM",
            DeviceState::Fault => "FAULT",
            DeviceState::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDirection {
    Clockwise,
    CounterClockwise,
}

impl std::fmt::Display for LimitDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitDirection::Clockwise => f.write_str("CW"),
            LimitDirection::CounterClockwise => f.write_str("CCW"),
        }
    }
}

/// Stateful handle to one physical motor.
///
/// Every call may block on I/O and may fail. Implementations need not be
/// reentrant: the owning controller serializes all access behind a mutex.
#[async_trait]
pub trait DeviceProxy: Send {
    async fn read_position(&mut self) -> Result<f64, DeviceError>;
    async fn write_position(&mut self, position: f64) -> Result<(), DeviceError>;
    async fn read_speed(&mut self) -> Result<f64, DeviceError>;
    async fn write_speed(&mut self, speed: f64) -> Result<(), DeviceError>;
    async fn read_state(&mut self) -> Result<DeviceState, DeviceError>;
    /// Raw step counter maintained by the motor driver.
    async fn read_step_position(&mut self) -> Result<i64, DeviceError>;
    /// Arm a move to an absolute step target; motion begins on `start_move`.
    async fn setup_step_move(&mut self, target: i64) -> Result<(), DeviceError>;
    async fn start_move(&mut self) -> Result<(), DeviceError>;
    async fn move_to_limit(&mut self, direction: LimitDirection) -> Result<(), DeviceError>;
    async fn stop(&mut self) -> Result<(), DeviceError>;
}
