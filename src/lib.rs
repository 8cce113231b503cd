// src/lib.rs - Library root for the CRL changer motor host
pub mod changer;
pub mod config;
pub mod console;
pub mod device;
pub mod motor;

pub use changer::{Changer, ChangerError, Dispatch, Stage};
pub use config::{load_config, ChangerConfig, ConfigError, MotorConfig, SimulationConfig};
pub use device::{DeviceError, DeviceProxy, DeviceState, LimitDirection, SimulatedStage};
pub use motor::{CommandGate, MotorCommand, MotorController, MotorError, MotorEvent, MotorIdentity, OperationGuard};
