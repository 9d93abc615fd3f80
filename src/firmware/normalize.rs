//! Completion of partial build requests with board-specific defaults.
//!
//! Only fields the caller left unset are filled; explicit values always win.
//! Normalizing an already complete configuration returns it unchanged.

use super::boards::{board_defaults, effective_board};
use super::models::*;
use super::release::ReleaseCatalog;
use crate::errors::BuildError;

const DEFAULT_IMU: &str = "IMU_BMI160";
const DEFAULT_IMU_ROTATION: i32 = 270;
const UNUSED_PIN: &str = "255";
const DEFAULT_LED_PIN: &str = "2";
const DEFAULT_BATTERY_PIN: &str = "A0";
const DEFAULT_BATTERY_RESISTANCE: f64 = 180.0;
const DEFAULT_BATTERY_R1: f64 = 100.0;
const DEFAULT_BATTERY_R2: f64 = 220.0;

pub const MAX_IMUS: usize = 2;

/// Normalize a request into the configuration that is actually built.
/// Virtual boards are remapped to the board they compile for.
pub fn normalize(
    request: BuildRequest,
    catalog: &ReleaseCatalog,
) -> Result<BuildConfiguration, BuildError> {
    let mut config = preview(request, catalog)?;
    config.board.board_type = effective_board(config.board.board_type);
    Ok(config)
}

/// Bare request for `board` against the first catalog branch of the
/// official owner.
pub fn default_request(board: BoardType, catalog: &ReleaseCatalog) -> BuildRequest {
    let version = catalog
        .repos
        .iter()
        .filter(|r| r.owner == catalog.official_owner)
        .flat_map(|r| r.branches.iter())
        .map(|b| b.branch.clone())
        .next()
        .unwrap_or_else(|| "main".to_string());
    BuildRequest::for_board(
        board,
        ReleaseRequest {
            owner: catalog.official_owner.clone(),
            version,
            ..Default::default()
        },
    )
}

/// Like [`normalize`] but keeps the requested board type, so the defaults
/// shown for a virtual board still name it.
pub fn preview(
    request: BuildRequest,
    catalog: &ReleaseCatalog,
) -> Result<BuildConfiguration, BuildError> {
    let BuildRequest {
        release,
        board,
        imus,
        battery,
        swap_addresses,
        debug,
    } = request;
    let defaults = board_defaults(board.board_type);

    let imus = imus.unwrap_or_else(|| {
        let imu = ImuConfig {
            imu_type: defaults.default_imu.unwrap_or(DEFAULT_IMU).to_string(),
            rotation: defaults.default_imu_rotation.unwrap_or(DEFAULT_IMU_ROTATION),
            int_pin: None,
        };
        vec![imu.clone(), imu]
    });
    if imus.is_empty() || imus.len() > MAX_IMUS {
        return Err(BuildError::InvalidConfiguration(format!(
            "expected 1 to {} IMUs, got {}",
            MAX_IMUS,
            imus.len()
        )));
    }
    let slot_ints = [defaults.imu_int, defaults.imu_int_2];
    let imus = imus
        .into_iter()
        .enumerate()
        .map(|(index, imu)| ImuConfig {
            int_pin: Some(
                imu.int_pin
                    .filter(|pin| !pin.is_empty())
                    .or_else(|| slot_ints[index].map(str::to_string))
                    .unwrap_or_else(|| UNUSED_PIN.to_string()),
            ),
            ..imu
        })
        .collect();

    let pins = board.pins.unwrap_or_default();
    let board_led = defaults.led_pin;
    let board = BoardConfig {
        board_type: board.board_type,
        pins: BoardPins {
            sda: pins
                .sda
                .unwrap_or_else(|| defaults.imu_sda.unwrap_or(UNUSED_PIN).to_string()),
            scl: pins
                .scl
                .unwrap_or_else(|| defaults.imu_scl.unwrap_or(UNUSED_PIN).to_string()),
            led: pins
                .led
                .unwrap_or_else(|| board_led.unwrap_or(DEFAULT_LED_PIN).to_string()),
        },
        led_inverted: board
            .led_inverted
            .unwrap_or(defaults.led_inverted.unwrap_or(true)),
        enable_led: board
            .enable_led
            .unwrap_or_else(|| !matches!(board_led, Some("LED_OFF") | Some("255"))),
    };

    let battery = battery.unwrap_or_default();
    let battery = BatteryConfig {
        battery_type: battery.battery_type.unwrap_or_default(),
        pin: battery
            .pin
            .filter(|pin| !pin.is_empty())
            .unwrap_or_else(|| defaults.battery_pin.unwrap_or(DEFAULT_BATTERY_PIN).to_string()),
        resistance: battery.resistance.unwrap_or(
            defaults
                .battery_resistance
                .unwrap_or(DEFAULT_BATTERY_RESISTANCE),
        ),
        r1: battery
            .r1
            .unwrap_or(defaults.battery_r1.unwrap_or(DEFAULT_BATTERY_R1)),
        r2: battery
            .r2
            .unwrap_or(defaults.battery_r2.unwrap_or(DEFAULT_BATTERY_R2)),
    };

    Ok(BuildConfiguration {
        release: catalog.complete(release),
        board,
        imus,
        battery,
        swap_addresses: swap_addresses.unwrap_or(false),
        debug: complete_debug(debug.unwrap_or_default()),
    })
}

fn complete_debug(debug: DebugRequest) -> DebugFlags {
    let base = DebugFlags::default();
    DebugFlags {
        use6_axis: debug.use6_axis.unwrap_or(base.use6_axis),
        optimize_updates: debug.optimize_updates.unwrap_or(base.optimize_updates),
        compliance_mode: debug.compliance_mode.unwrap_or(base.compliance_mode),
        bmi160_use_tempcal: debug.bmi160_use_tempcal.unwrap_or(base.bmi160_use_tempcal),
        bmi160_tempcal_debug: debug
            .bmi160_tempcal_debug
            .unwrap_or(base.bmi160_tempcal_debug),
        bmi160_debug: debug.bmi160_debug.unwrap_or(base.bmi160_debug),
        bmi160_use_senscal: debug.bmi160_use_senscal.unwrap_or(base.bmi160_use_senscal),
    }
}
