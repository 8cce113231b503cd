// Integration tests for building and running the changer
mod common;

use std::sync::Arc;

use common::{Script, ScriptedDevice};
use crl_changer::{
    Changer, ChangerConfig, ChangerError, DeviceError, DeviceProxy, Dispatch, MotorCommand, MotorConfig,
    SimulatedStage,
};
use tokio::time::{Duration, Instant};

fn two_motor_config() -> ChangerConfig {
    ChangerConfig {
        motors: vec![
            MotorConfig { name: "ich_bin_ein_motor".to_string(), address: "p02/motor/elab.10".to_string() },
            MotorConfig { name: "ich auch".to_string(), address: "p02/motor/elab.11".to_string() },
        ],
        ..ChangerConfig::default()
    }
}

fn simulated(config: ChangerConfig) -> Result<Changer, ChangerError> {
    let sim = config.simulation.clone();
    Changer::new(config, |identity| {
        Ok(Box::new(SimulatedStage::new(&identity.device_address, &sim)) as Box<dyn DeviceProxy>)
    })
}

#[test]
fn test_invalid_config_is_rejected_before_connecting() {
    let mut connects = 0;
    let result = Changer::new(ChangerConfig::default(), |_| {
        connects += 1;
        Ok(Box::new(ScriptedDevice::new(Script::default())) as Box<dyn DeviceProxy>)
    });
    assert!(matches!(result, Err(ChangerError::Config(_))));
    assert_eq!(connects, 0);
}

#[test]
fn test_connect_failure_propagates() {
    let result = Changer::new(two_motor_config(), |identity| {
        Err(DeviceError::Unreachable(identity.device_address.clone()))
    });
    match result {
        Err(ChangerError::Device(DeviceError::Unreachable(address))) => {
            assert_eq!(address, "haspp02oh1:10000/p02/motor/elab.10");
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("connect failure was swallowed"),
    }
}

#[test]
fn test_stages_follow_config_order_and_addresses() {
    let mut addresses = Vec::new();
    let changer = Changer::new(two_motor_config(), |identity| {
        addresses.push(identity.device_address.clone());
        Ok(Box::new(ScriptedDevice::new(Script::default())) as Box<dyn DeviceProxy>)
    })
    .unwrap();

    assert_eq!(
        addresses,
        vec!["haspp02oh1:10000/p02/motor/elab.10", "haspp02oh1:10000/p02/motor/elab.11"]
    );
    assert_eq!(changer.stages().len(), 2);
    assert_eq!(changer.stages()[1].name(), "ich auch");
    assert_eq!(
        changer.stages()[0].controller().identity().device_address,
        "haspp02oh1:10000/p02/motor/elab.10"
    );
}

#[test]
fn test_stage_lookup_by_index_or_name() {
    let changer = simulated(two_motor_config()).unwrap();
    assert_eq!(changer.stage("0").unwrap().name(), "ich_bin_ein_motor");
    assert_eq!(changer.stage("ich auch").unwrap().name(), "ich auch");
    assert!(changer.stage("2").is_none());
    assert!(changer.stage("nobody").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_simulated_move_completes_through_stage() {
    let changer = Arc::new(simulated(two_motor_config()).unwrap());
    changer.start().await;

    let stage = changer.stage("ich auch").unwrap().clone();
    let start = Instant::now();
    // 500 steps at 2000 steps/s, observed by the 200 ms poll
    assert_eq!(stage.dispatch(MotorCommand::MoveTo(0.5)).await.unwrap(), Dispatch::Completed);
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!stage.controller().is_move_outstanding());
    assert_eq!(stage.controller().last_known_position().await, 0.5);

    let other = changer.stage("0").unwrap();
    assert_eq!(other.controller().last_known_position().await, 0.0);

    changer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_polling() {
    let device = ScriptedDevice::new(Script::default());
    let handle = device.clone();
    let mut config = two_motor_config();
    config.motors.truncate(1);
    let changer = Changer::new(config, move |_| Ok(Box::new(handle.clone()) as Box<dyn DeviceProxy>)).unwrap();

    changer.start().await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    changer.shutdown().await;
    let reads = device.reads();
    assert!(reads > 0);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(device.reads(), reads);
}
