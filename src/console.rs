// src/console.rs - Line-oriented operator console over the changer
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast;

use crate::changer::{Changer, Dispatch, Stage};
use crate::device::LimitDirection;
use crate::motor::{MotorCommand, MotorError, MotorEvent};

const HELP: &str = "\
commands:
  list                      list motors
  status [motor]            show last known position/speed
  move <motor> <pos>        move to absolute position
  step <motor> +|-|<n>      step by the step size (or by n steps)
  stepsize <motor> up|down|<n>
  cw <motor> | ccw <motor>  drive to a limit
  speed <motor> <value>     set slew rate
  stop <motor>              stop immediately
  save <motor> | recall <motor>
  help | quit
motors are addressed by index or by name";

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("'{0}' needs a motor")]
    MissingMotor(String),
    #[error("'{0}' needs an argument")]
    MissingArgument(String),
    #[error("Invalid number: {0}")]
    InvalidNumber(String),
    #[error("Unexpected trailing input: {0}")]
    TrailingInput(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepArg {
    Up,
    Down,
    Count(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizeArg {
    Up,
    Down,
    Set(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Move(f64),
    Step(StepArg),
    StepSize(SizeArg),
    Limit(LimitDirection),
    Speed(f64),
    Stop,
    Save,
    Recall,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Help,
    List,
    Status(Option<String>),
    Quit,
    Motor { motor: String, action: Action },
}

fn number<T: std::str::FromStr>(token: &str) -> Result<T, ParseError> {
    token.parse().map_err(|_| ParseError::InvalidNumber(token.to_string()))
}

fn finite(token: &str) -> Result<f64, ParseError> {
    let value: f64 = number(token)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ParseError::InvalidNumber(token.to_string()))
    }
}

/// Parse one console line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, ParseError> {
    let mut tokens = line.split_whitespace();
    let Some(word) = tokens.next() else {
        return Ok(None);
    };
    let word = word.to_ascii_lowercase();
    let command = match word.as_str() {
        "help" | "?" => ConsoleCommand::Help,
        "list" | "ls" => ConsoleCommand::List,
        "quit" | "exit" => ConsoleCommand::Quit,
        "status" => ConsoleCommand::Status(tokens.next().map(str::to_string)),
        "move" | "step" | "stepsize" | "cw" | "ccw" | "speed" | "stop" | "save" | "recall" => {
            let motor = tokens
                .next()
                .ok_or_else(|| ParseError::MissingMotor(word.clone()))?
                .to_string();
            let mut argument = || tokens.next().ok_or_else(|| ParseError::MissingArgument(word.clone()));
            let action = match word.as_str() {
                "move" => Action::Move(number(argument()?)?),
                "step" => Action::Step(match argument()? {
                    "+" | "up" => StepArg::Up,
                    "-" | "down" => StepArg::Down,
                    n => StepArg::Count(number(n)?),
                }),
                "stepsize" => Action::StepSize(match argument()? {
                    "up" | "x2" => SizeArg::Up,
                    "down" | "/2" => SizeArg::Down,
                    n => SizeArg::Set(finite(n)?),
                }),
                "cw" => Action::Limit(LimitDirection::Clockwise),
                "ccw" => Action::Limit(LimitDirection::CounterClockwise),
                "speed" => Action::Speed(number(argument()?)?),
                "stop" => Action::Stop,
                "save" => Action::Save,
                _ => Action::Recall,
            };
            ConsoleCommand::Motor { motor, action }
        }
        _ => return Err(ParseError::UnknownCommand(word.clone())),
    };
    let rest: Vec<&str> = tokens.collect();
    if !rest.is_empty() {
        return Err(ParseError::TrailingInput(rest.join(" ")));
    }
    Ok(Some(command))
}

/// Step size that doubles and halves on a logarithmic scale, rounded to one
/// significant digit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSize(f64);

impl StepSize {
    pub const MIN: f64 = 1.0;
    pub const MAX: f64 = 99_999_999.0;

    /// NaN falls back to the minimum.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self(Self::MIN);
        }
        Self(value.clamp(Self::MIN, Self::MAX).round())
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn steps(&self) -> i64 {
        self.0 as i64
    }

    pub fn doubled(self) -> Self {
        Self::stepped(self.0 * 2.0)
    }

    pub fn halved(self) -> Self {
        Self::stepped(self.0 / 2.0)
    }

    fn stepped(value: f64) -> Self {
        if value == 0.0 {
            return Self::new(1.0);
        }
        let magnitude = 10f64.powi(value.abs().log10().floor() as i32);
        Self::new((value / magnitude).round_ties_even() * magnitude)
    }
}

impl Default for StepSize {
    fn default() -> Self {
        Self(100.0)
    }
}

/// Operator-side memory for one motor.
#[derive(Debug, Clone, Default)]
pub struct MotorMemory {
    pub step_size: StepSize,
    pub saved_position: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Console {
    changer: Arc<Changer>,
    memory: Vec<MotorMemory>,
}

impl Console {
    pub fn new(changer: Arc<Changer>) -> Self {
        let memory = vec![MotorMemory::default(); changer.stages().len()];
        Self { changer, memory }
    }

    pub fn memory(&self, index: usize) -> Option<&MotorMemory> {
        self.memory.get(index)
    }

    /// Log every motor's notifications and control transitions until shutdown.
    pub fn spawn_event_log(&self, shutdown: broadcast::Sender<()>) {
        for stage in self.changer.stages() {
            let stage = Arc::clone(stage);
            let mut shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                let mut events = stage.controller().subscribe();
                let mut controls = stage.gate().watch_controls();
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        event = events.recv() => match event {
                            Ok(MotorEvent::PositionChanged(p)) => tracing::info!("[{}] position {:.4}", stage.name(), p),
                            Ok(MotorEvent::SpeedChanged(s)) => tracing::info!("[{}] speed {} steps/s", stage.name(), s),
                            Ok(MotorEvent::MoveFinished) => tracing::info!("[{}] move finished", stage.name()),
                            Ok(MotorEvent::PollFailed(reason)) => tracing::warn!("[{}] poll failed: {}", stage.name(), reason),
                            Err(broadcast::error::RecvError::Lagged(n)) => tracing::debug!("[{}] skipped {} events", stage.name(), n),
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                        changed = controls.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let enabled = *controls.borrow_and_update();
                            tracing::info!("[{}] controls {}", stage.name(), if enabled { "enabled" } else { "disabled" });
                        }
                    }
                }
            });
        }
    }

    /// Read commands until `quit` or end of input.
    pub async fn run<R>(&mut self, reader: R) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        println!("{}", HELP);
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            match parse_line(&line) {
                Ok(Some(command)) => {
                    if self.handle(command).await == Flow::Quit {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => println!("{}", e),
            }
        }
        Ok(())
    }

    pub async fn handle(&mut self, command: ConsoleCommand) -> Flow {
        match command {
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => return Flow::Quit,
            ConsoleCommand::List => {
                for (index, stage) in self.changer.stages().iter().enumerate() {
                    println!("{}: {} ({})", index, stage.name(), stage.controller().identity().device_address);
                }
            }
            ConsoleCommand::Status(Some(key)) => match self.lookup(&key) {
                Some((_, stage)) => Self::print_status(&stage).await,
                None => println!("No motor '{}'", key),
            },
            ConsoleCommand::Status(None) => {
                for stage in self.changer.stages() {
                    Self::print_status(stage).await;
                }
            }
            ConsoleCommand::Motor { motor, action } => match self.lookup(&motor) {
                Some((index, stage)) => self.apply(index, stage, action).await,
                None => println!("No motor '{}'", motor),
            },
        }
        Flow::Continue
    }

    fn lookup(&self, key: &str) -> Option<(usize, Arc<Stage>)> {
        let stage = self.changer.stage(key)?;
        let index = self.changer.stages().iter().position(|s| Arc::ptr_eq(s, stage))?;
        Some((index, Arc::clone(stage)))
    }

    async fn print_status(stage: &Stage) {
        let controller = stage.controller();
        println!(
            "{}: position {:.4}, speed {} steps/s, {}, controls {}",
            stage.name(),
            controller.last_known_position().await,
            controller.last_known_speed().await,
            if controller.is_move_outstanding() { "moving" } else { "idle" },
            if stage.gate().controls_enabled() { "enabled" } else { "disabled" },
        );
    }

    async fn apply(&mut self, index: usize, stage: Arc<Stage>, action: Action) {
        let memory = &mut self.memory[index];
        let command = match action {
            Action::Move(position) => MotorCommand::MoveTo(position),
            Action::Step(StepArg::Up) => MotorCommand::MoveSteps(memory.step_size.steps()),
            Action::Step(StepArg::Down) => MotorCommand::MoveSteps(-memory.step_size.steps()),
            Action::Step(StepArg::Count(n)) => MotorCommand::MoveSteps(n),
            Action::Limit(direction) => MotorCommand::GoToLimit(direction),
            Action::Speed(speed) => MotorCommand::SetSpeed(speed),
            Action::Stop => MotorCommand::Stop,
            Action::Recall => MotorCommand::MoveTo(memory.saved_position),
            Action::StepSize(arg) => {
                memory.step_size = match arg {
                    SizeArg::Up => memory.step_size.doubled(),
                    SizeArg::Down => memory.step_size.halved(),
                    SizeArg::Set(value) => StepSize::new(value),
                };
                println!("{}: step size {} steps", stage.name(), memory.step_size.value());
                return;
            }
            Action::Save => {
                memory.saved_position = stage.controller().last_known_position().await;
                println!("{}: saved position {:.2}", stage.name(), memory.saved_position);
                return;
            }
        };
        if command.is_motion() {
            // Own task, so the console keeps reading while the move waits.
            tokio::spawn(async move {
                let result = stage.dispatch(command).await;
                Self::report(&stage, command, result);
            });
        } else {
            let result = stage.dispatch(command).await;
            Self::report(&stage, command, result);
        }
    }

    fn report(stage: &Stage, command: MotorCommand, result: Result<Dispatch, MotorError>) {
        match result {
            Ok(Dispatch::Completed) => tracing::debug!("'{}' {:?} done", stage.name(), command),
            Ok(Dispatch::Rejected) => println!("{} is busy; {:?} ignored", stage.name(), command),
            Err(e) => tracing::error!("'{}' {:?} failed: {}", stage.name(), command, e),
        }
    }
}
