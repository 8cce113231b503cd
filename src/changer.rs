// src/changer.rs - Application root owning one stage per configured motor
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::config::{ChangerConfig, ConfigError};
use crate::device::{DeviceError, DeviceProxy};
use crate::motor::{CommandGate, MotorCommand, MotorController, MotorError, MotorIdentity};

#[derive(Debug, Error)]
pub enum ChangerError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

/// Result of handing a command to a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The command ran (for motion commands: until finished or timed out).
    Completed,
    /// The gate refused the command; nothing was sent to the device.
    Rejected,
}

/// A controller paired with the gate that fronts it.
pub struct Stage {
    controller: Arc<MotorController>,
    gate: CommandGate,
}

impl Stage {
    pub fn new(controller: Arc<MotorController>) -> Self {
        let gate = CommandGate::new(controller.name(), controller.watch_outstanding());
        Self { controller, gate }
    }

    pub fn controller(&self) -> &Arc<MotorController> {
        &self.controller
    }

    pub fn gate(&self) -> &CommandGate {
        &self.gate
    }

    pub fn name(&self) -> &str {
        self.controller.name()
    }

    /// Run a command the way an operator control would.
    ///
    /// Only motion commands take the gate, holding it for the whole call.
    /// `Stop` and `SetSpeed` stay available while a move waits.
    pub async fn dispatch(&self, command: MotorCommand) -> Result<Dispatch, MotorError> {
        if !command.is_motion() {
            self.controller.execute(command).await?;
            return Ok(Dispatch::Completed);
        }
        let Some(_guard) = self.gate.begin() else {
            tracing::info!("'{}' busy; ignoring {:?}", self.name(), command);
            return Ok(Dispatch::Rejected);
        };
        self.controller.execute(command).await?;
        Ok(Dispatch::Completed)
    }
}

pub struct Changer {
    config: ChangerConfig,
    stages: Vec<Arc<Stage>>,
    shutdown_tx: broadcast::Sender<()>,
    pollers: Mutex<Vec<JoinHandle<()>>>,
}

impl Changer {
    /// Build one stage per configured motor. `connect` opens the device proxy
    /// for a motor given its full address.
    pub fn new<F>(config: ChangerConfig, mut connect: F) -> Result<Self, ChangerError>
    where
        F: FnMut(&MotorIdentity) -> Result<Box<dyn DeviceProxy>, DeviceError>,
    {
        config.validate()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut stages = Vec::with_capacity(config.motors.len());
        for motor in &config.motors {
            let identity = MotorIdentity {
                display_name: motor.name.clone(),
                device_address: config.device_address(motor),
            };
            let device = connect(&identity)?;
            let controller = MotorController::new(identity, device, config.poll_interval(), config.move_timeout());
            stages.push(Arc::new(Stage::new(Arc::new(controller))));
        }
        Ok(Self {
            config,
            stages,
            shutdown_tx,
            pollers: Mutex::new(Vec::new()),
        })
    }

    /// Start polling every motor.
    pub async fn start(&self) {
        let mut pollers = self.pollers.lock().await;
        for stage in &self.stages {
            pollers.push(stage.controller().start_polling(self.shutdown_tx.subscribe()));
        }
        tracing::info!("Polling {} motor(s) at {} Hz", self.stages.len(), self.config.polling_rate_hz);
    }

    pub async fn shutdown(&self) {
        tracing::info!("Shutting down changer");
        let _ = self.shutdown_tx.send(());
        let pollers: Vec<_> = self.pollers.lock().await.drain(..).collect();
        for poller in pollers {
            if let Err(e) = poller.await {
                tracing::error!("Polling task ended abnormally: {}", e);
            }
        }
    }

    pub fn config(&self) -> &ChangerConfig {
        &self.config
    }

    pub fn stages(&self) -> &[Arc<Stage>] {
        &self.stages
    }

    /// Look a stage up by zero-based index or by display name.
    pub fn stage(&self, key: &str) -> Option<&Arc<Stage>> {
        if let Ok(index) = key.parse::<usize>() {
            if let Some(stage) = self.stages.get(index) {
                return Some(stage);
            }
        }
        self.stages.iter().find(|stage| stage.name() == key)
    }
}
