//! Static board and IMU tables.
//!
//! Board defaults mirror the pin assignments of the upstream tracker
//! firmware's `defines.h` presets. A field left `None` falls back to the
//! generic value applied by the normalizer.

use serde::Serialize;

use super::models::{BatteryType, BoardType};

/// Per-board default values. Every field is optional; absent values fall
/// back to generic defaults in `normalize`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoardDefaults {
    pub imu_sda: Option<&'static str>,
    pub imu_scl: Option<&'static str>,
    pub imu_int: Option<&'static str>,
    pub imu_int_2: Option<&'static str>,
    pub led_pin: Option<&'static str>,
    pub led_inverted: Option<bool>,
    pub battery_pin: Option<&'static str>,
    pub battery_resistance: Option<f64>,
    pub battery_r1: Option<f64>,
    pub battery_r2: Option<f64>,
    pub default_imu: Option<&'static str>,
    pub default_imu_rotation: Option<i32>,
}

const EMPTY: BoardDefaults = BoardDefaults {
    imu_sda: None,
    imu_scl: None,
    imu_int: None,
    imu_int_2: None,
    led_pin: None,
    led_inverted: None,
    battery_pin: None,
    battery_resistance: None,
    battery_r1: None,
    battery_r2: None,
    default_imu: None,
    default_imu_rotation: None,
};

const ESP8266_DEVKIT: BoardDefaults = BoardDefaults {
    imu_sda: Some("D2"),
    imu_scl: Some("D1"),
    imu_int: Some("D5"),
    imu_int_2: Some("D6"),
    led_pin: Some("2"),
    battery_pin: Some("A0"),
    battery_resistance: Some(180.0),
    ..EMPTY
};

const ESP32C3_DEVKIT: BoardDefaults = BoardDefaults {
    imu_sda: Some("5"),
    imu_scl: Some("4"),
    imu_int: Some("6"),
    imu_int_2: Some("7"),
    led_pin: Some("LED_OFF"),
    led_inverted: Some(false),
    battery_pin: Some("3"),
    ..EMPTY
};

/// Board row whose defaults apply to `board`. Development boards share the
/// row of the production board they derive from.
pub fn defaults_alias(board: BoardType) -> BoardType {
    match board {
        BoardType::BoardSlimevrDev => BoardType::BoardSlimevr,
        other => other,
    }
}

/// Board the firmware is actually compiled for. Virtual boards only exist
/// to select a set of defaults.
pub fn effective_board(board: BoardType) -> BoardType {
    match board {
        BoardType::BoardCheesecake => BoardType::BoardWemosd1mini,
        BoardType::BoardTinyslime => BoardType::BoardLolinC3Mini,
        other => other,
    }
}

pub fn board_defaults(board: BoardType) -> BoardDefaults {
    match defaults_alias(board) {
        BoardType::BoardSlimevr | BoardType::BoardSlimevrDev => BoardDefaults {
            imu_sda: Some("14"),
            imu_scl: Some("12"),
            imu_int: Some("16"),
            imu_int_2: Some("13"),
            led_pin: Some("2"),
            battery_pin: Some("17"),
            battery_resistance: Some(0.0),
            battery_r1: Some(10.0),
            battery_r2: Some(40.2),
            default_imu: Some("IMU_BNO085"),
            default_imu_rotation: Some(270),
            ..EMPTY
        },
        BoardType::BoardNodemcu | BoardType::BoardWemosd1mini => ESP8266_DEVKIT,
        BoardType::BoardCheesecake => BoardDefaults {
            default_imu: Some("IMU_BMI270"),
            default_imu_rotation: Some(90),
            ..ESP8266_DEVKIT
        },
        BoardType::BoardTtgoTbase => BoardDefaults {
            imu_sda: Some("5"),
            imu_scl: Some("4"),
            imu_int: Some("14"),
            imu_int_2: Some("13"),
            led_pin: Some("LED_OFF"),
            battery_pin: Some("A0"),
            ..EMPTY
        },
        BoardType::BoardWemoswroom02 => BoardDefaults {
            imu_sda: Some("2"),
            imu_scl: Some("14"),
            imu_int: Some("0"),
            imu_int_2: Some("4"),
            led_pin: Some("16"),
            battery_pin: Some("A0"),
            ..EMPTY
        },
        BoardType::BoardWroom32 => BoardDefaults {
            imu_sda: Some("21"),
            imu_scl: Some("22"),
            imu_int: Some("23"),
            imu_int_2: Some("25"),
            led_pin: Some("2"),
            battery_pin: Some("36"),
            ..EMPTY
        },
        BoardType::BoardEsp01 => BoardDefaults {
            imu_sda: Some("2"),
            imu_scl: Some("0"),
            imu_int: Some("255"),
            imu_int_2: Some("255"),
            led_pin: Some("LED_OFF"),
            battery_pin: Some("A0"),
            ..EMPTY
        },
        BoardType::BoardLolinC3Mini => BoardDefaults {
            imu_sda: Some("5"),
            imu_scl: Some("4"),
            imu_int: Some("6"),
            imu_int_2: Some("8"),
            led_pin: Some("7"),
            led_inverted: Some(false),
            battery_pin: Some("3"),
            ..EMPTY
        },
        BoardType::BoardTinyslime => BoardDefaults {
            imu_sda: Some("5"),
            imu_scl: Some("4"),
            imu_int: Some("6"),
            imu_int_2: Some("8"),
            led_pin: Some("7"),
            led_inverted: Some(false),
            battery_pin: Some("3"),
            default_imu: Some("IMU_ICM42688"),
            default_imu_rotation: Some(0),
            ..EMPTY
        },
        BoardType::BoardBeetle32c3 => BoardDefaults {
            imu_sda: Some("8"),
            imu_scl: Some("9"),
            imu_int: Some("6"),
            imu_int_2: Some("7"),
            led_pin: Some("10"),
            led_inverted: Some(false),
            battery_pin: Some("3"),
            ..EMPTY
        },
        BoardType::BoardEs32c3devkitm1 => ESP32C3_DEVKIT,
    }
}

// ── IMU table ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImuInfo {
    #[serde(rename = "type")]
    pub imu_type: &'static str,
    pub has_int_pin: bool,
}

const fn imu(imu_type: &'static str, has_int_pin: bool) -> ImuInfo {
    ImuInfo {
        imu_type,
        has_int_pin,
    }
}

/// IMU drivers the firmware ships. Descriptor entries are only rendered for
/// types listed here.
pub const KNOWN_IMUS: &[ImuInfo] = &[
    imu("IMU_MPU9250", false),
    imu("IMU_MPU6500", false),
    imu("IMU_BNO080", true),
    imu("IMU_BNO085", true),
    imu("IMU_BNO055", false),
    imu("IMU_MPU6050", false),
    imu("IMU_BNO086", true),
    imu("IMU_BMI160", false),
    imu("IMU_ICM20948", false),
    imu("IMU_BMI270", false),
    imu("IMU_LSM6DS3TRC", false),
    imu("IMU_LSM6DSV", false),
    imu("IMU_LSM6DSO", false),
    imu("IMU_LSM6DSR", false),
    imu("IMU_ICM42688", false),
    imu("IMU_MPU6050_SF", false),
];

pub fn is_known_imu(imu_type: &str) -> bool {
    KNOWN_IMUS.iter().any(|imu| imu.imu_type == imu_type)
}

/// Entry of `GET /api/firmwares/boards`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardEntry {
    pub board_type: BoardType,
}

pub fn board_entries() -> Vec<BoardEntry> {
    BoardType::ALL
        .iter()
        .map(|board| BoardEntry { board_type: *board })
        .collect()
}

pub fn battery_types() -> Vec<&'static str> {
    BatteryType::ALL.iter().map(|b| b.as_str()).collect()
}
