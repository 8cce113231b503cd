// src/device/simulated.rs - In-process stage used when no control server is attached
use async_trait::async_trait;
use tokio::time::Instant;

use super::{DeviceError, DeviceProxy, DeviceState, LimitDirection};
use crate::config::SimulationConfig;

/// A move in progress, expressed in raw steps.
#[derive(Debug, Clone, Copy)]
struct Travel {
    from: i64,
    to: i64,
    started: Instant,
    rate: f64, // steps per second
}

impl Travel {
    fn steps_at(&self, now: Instant) -> i64 {
        let distance = (self.to - self.from).abs();
        let covered = (now.duration_since(self.started).as_secs_f64() * self.rate).floor() as i64;
        if covered >= distance {
            self.to
        } else {
            self.from + (self.to - self.from).signum() * covered
        }
    }
}

/// Simulated stepper stage.
///
/// Position is derived from an integer step counter divided by
/// `steps_per_unit`. Moves progress at the slew rate against the tokio clock,
/// so tests running on a paused clock see deterministic motion.
#[derive(Debug)]
pub struct SimulatedStage {
    address: String,
    steps_per_unit: f64,
    slew_rate: f64,
    cw_limit: i64,
    ccw_limit: i64,
    steps: i64,
    armed_target: Option<i64>,
    travel: Option<Travel>,
}

impl SimulatedStage {
    pub fn new(address: &str, sim: &SimulationConfig) -> Self {
        tracing::debug!("Creating simulated stage for {}", address);
        Self {
            address: address.to_string(),
            steps_per_unit: sim.steps_per_unit,
            slew_rate: sim.initial_speed,
            cw_limit: sim.cw_limit,
            ccw_limit: sim.ccw_limit,
            steps: 0,
            armed_target: None,
            travel: None,
        }
    }

    /// Fold any finished travel into the step counter and return current steps.
    fn settle(&mut self) -> i64 {
        if let Some(travel) = self.travel {
            let now = Instant::now();
            self.steps = travel.steps_at(now);
            if self.steps == travel.to {
                tracing::debug!("{} settled at {} steps", self.address, self.steps);
                self.travel = None;
            }
        }
        self.steps
    }

    fn begin_travel(&mut self, target: i64) {
        let from = self.settle();
        let to = target.clamp(self.ccw_limit, self.cw_limit);
        if to != target {
            tracing::warn!("{} target {} clamped to soft limit {}", self.address, target, to);
        }
        self.travel = if to == from {
            None
        } else {
            Some(Travel { from, to, started: Instant::now(), rate: self.slew_rate })
        };
    }
}

#[async_trait]
impl DeviceProxy for SimulatedStage {
    async fn read_position(&mut self) -> Result<f64, DeviceError> {
        Ok(self.settle() as f64 / self.steps_per_unit)
    }

    async fn write_position(&mut self, position: f64) -> Result<(), DeviceError> {
        if !position.is_finite() {
            return Err(DeviceError::InvalidRequest(format!("position {} is not finite", position)));
        }
        let target = (position * self.steps_per_unit).round() as i64;
        self.begin_travel(target);
        Ok(())
    }

    async fn read_speed(&mut self) -> Result<f64, DeviceError> {
        Ok(self.slew_rate)
    }

    async fn write_speed(&mut self, speed: f64) -> Result<(), DeviceError> {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(DeviceError::InvalidRequest(format!("slew rate {} must be positive", speed)));
        }
        self.slew_rate = speed;
        // Re-anchor a running move so the new rate applies from here on.
        if let Some(travel) = self.travel {
            self.begin_travel(travel.to);
        }
        Ok(())
    }

    async fn read_state(&mut self) -> Result<DeviceState, DeviceError> {
        self.settle();
        Ok(if self.travel.is_some() { DeviceState::Moving } else { DeviceState::On })
    }

    async fn read_step_position(&mut self) -> Result<i64, DeviceError> {
        Ok(self.settle())
    }

    async fn setup_step_move(&mut self, target: i64) -> Result<(), DeviceError> {
        self.armed_target = Some(target);
        Ok(())
    }

    async fn start_move(&mut self) -> Result<(), DeviceError> {
        let target = self
            .armed_target
            .take()
            .ok_or_else(|| DeviceError::InvalidRequest("start_move without setup_step_move".to_string()))?;
        self.begin_travel(target);
        Ok(())
    }

    async fn move_to_limit(&mut self, direction: LimitDirection) -> Result<(), DeviceError> {
        let target = match direction {
            LimitDirection::Clockwise => self.cw_limit,
            LimitDirection::CounterClockwise => self.ccw_limit,
        };
        self.begin_travel(target);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        self.settle();
        self.travel = None;
        self.armed_target = None;
        Ok(())
    }
}
