// Scripted device proxy shared by the integration tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::{Duration, Instant};

use crl_changer::{DeviceError, DeviceProxy, DeviceState, LimitDirection, MotorController, MotorIdentity};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    WritePosition(f64),
    WriteSpeed(f64),
    SetupStepMove(i64),
    StartMove,
    MoveToLimit(LimitDirection),
    Stop,
}

/// How the scripted device answers state reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Motion {
    Idle,
    Until(Instant),
    Forever,
}

#[derive(Debug)]
pub struct Script {
    pub position: f64,
    pub speed: f64,
    pub step_position: i64,
    pub target: Option<f64>,
    pub motion: Motion,
    /// Applied to every motion command; `None` keeps the device moving forever.
    pub settle_after: Option<Duration>,
    pub fail_all: bool,
    pub fail_speed_read: bool,
    pub reads: usize,
    /// Every call, including ones that failed.
    pub attempts: usize,
    pub calls: Vec<Call>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            position: 0.0,
            speed: 0.0,
            step_position: 0,
            target: None,
            motion: Motion::Idle,
            settle_after: None,
            fail_all: false,
            fail_speed_read: false,
            reads: 0,
            attempts: 0,
            calls: Vec::new(),
        }
    }
}

impl Script {
    fn settled(&self) -> bool {
        match self.motion {
            Motion::Idle => true,
            Motion::Until(at) => Instant::now() >= at,
            Motion::Forever => false,
        }
    }

    fn begin_motion(&mut self) {
        self.motion = match self.settle_after {
            Some(after) => Motion::Until(Instant::now() + after),
            None => Motion::Forever,
        };
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedDevice {
    script: Arc<Mutex<Script>>,
}

impl ScriptedDevice {
    pub fn new(script: Script) -> Self {
        Self { script: Arc::new(Mutex::new(script)) }
    }

    pub fn failing() -> Self {
        Self::new(Script { fail_all: true, ..Script::default() })
    }

    pub fn update(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.script.lock().unwrap());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn reads(&self) -> usize {
        self.script.lock().unwrap().reads
    }

    pub fn attempts(&self) -> usize {
        self.script.lock().unwrap().attempts
    }

    fn check(&self) -> Result<std::sync::MutexGuard<'_, Script>, DeviceError> {
        let mut script = self.script.lock().unwrap();
        script.attempts += 1;
        if script.fail_all {
            return Err(DeviceError::Communication {
                address: "test/motor/1".to_string(),
                reason: "injected fault".to_string(),
            });
        }
        Ok(script)
    }
}

#[async_trait]
impl DeviceProxy for ScriptedDevice {
    async fn read_position(&mut self) -> Result<f64, DeviceError> {
        let mut script = self.check()?;
        script.reads += 1;
        Ok(match script.target {
            Some(target) if script.settled() => target,
            _ => script.position,
        })
    }

    async fn write_position(&mut self, position: f64) -> Result<(), DeviceError> {
        let mut script = self.check()?;
        script.calls.push(Call::WritePosition(position));
        script.target = Some(position);
        script.begin_motion();
        Ok(())
    }

    async fn read_speed(&mut self) -> Result<f64, DeviceError> {
        let mut script = self.check()?;
        script.reads += 1;
        if script.fail_speed_read {
            return Err(DeviceError::Communication {
                address: "test/motor/1".to_string(),
                reason: "speed read failed".to_string(),
            });
        }
        Ok(script.speed)
    }

    async fn write_speed(&mut self, speed: f64) -> Result<(), DeviceError> {
        let mut script = self.check()?;
        script.calls.push(Call::WriteSpeed(speed));
        script.speed = speed;
        Ok(())
    }

    async fn read_state(&mut self) -> Result<DeviceState, DeviceError> {
        let mut script = self.check()?;
        script.reads += 1;
        Ok(if script.settled() { DeviceState::On } else { DeviceState::Moving })
    }

    async fn read_step_position(&mut self) -> Result<i64, DeviceError> {
        let mut script = self.check()?;
        script.reads += 1;
        Ok(script.step_position)
    }

    async fn setup_step_move(&mut self, target: i64) -> Result<(), DeviceError> {
        let mut script = self.check()?;
        script.calls.push(Call::SetupStepMove(target));
        Ok(())
    }

    async fn start_move(&mut self) -> Result<(), DeviceError> {
        let mut script = self.check()?;
        script.calls.push(Call::StartMove);
        script.begin_motion();
        Ok(())
    }

    async fn move_to_limit(&mut self, direction: LimitDirection) -> Result<(), DeviceError> {
        let mut script = self.check()?;
        script.calls.push(Call::MoveToLimit(direction));
        script.begin_motion();
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        let mut script = self.check()?;
        script.calls.push(Call::Stop);
        Ok(())
    }
}

pub const POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const MOVE_TIMEOUT: Duration = Duration::from_millis(2000);

pub fn controller(device: &ScriptedDevice) -> Arc<MotorController> {
    let identity = MotorIdentity {
        display_name: "test motor".to_string(),
        device_address: "test:10000/test/motor/1".to_string(),
    };
    Arc::new(MotorController::new(identity, Box::new(device.clone()), POLL_INTERVAL, MOVE_TIMEOUT))
}
