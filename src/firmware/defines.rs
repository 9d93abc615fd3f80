//! Rendering of a build configuration into the firmware's `defines.h`, and
//! patching of debug macros in auxiliary headers.

use std::f64::consts::PI;
use std::sync::LazyLock;

use regex::{NoExpand, Regex};

use super::boards::is_known_imu;
use super::models::{BuildConfiguration, DebugFlags, ImuConfig};

const ENTRY_SEPARATOR: &str = " \\\n\t\t";

/// Firmware rotation in radians: reduced modulo 360 (keeping the sign) and
/// negated to match the firmware's rotation direction.
pub fn rotation_to_firmware(degrees: i32) -> f64 {
    let radians = -f64::from(degrees % 360) / 180.0 * PI;
    // -0.0 would print as "-0"
    if radians == 0.0 { 0.0 } else { radians }
}

fn int_pin(imu: &ImuConfig) -> &str {
    imu.int_pin
        .as_deref()
        .filter(|pin| !pin.is_empty())
        .unwrap_or("255")
}

struct Addresses {
    primary: &'static str,
    secondary: &'static str,
}

impl Addresses {
    fn new(swap: bool) -> Self {
        if swap {
            Self {
                primary: "PRIMARY_IMU_ADDRESS_TWO",
                secondary: "SECONDARY_IMU_ADDRESS_ONE",
            }
        } else {
            Self {
                primary: "PRIMARY_IMU_ADDRESS_ONE",
                secondary: "SECONDARY_IMU_ADDRESS_TWO",
            }
        }
    }

    fn for_slot(&self, index: usize) -> (&'static str, bool) {
        if index == 0 {
            (self.primary, false)
        } else {
            (self.secondary, true)
        }
    }
}

/// Legacy descriptor, understood by firmware before 0.6.0.
fn imu_desc_entry(imu: &ImuConfig, index: usize, addresses: &Addresses) -> String {
    let (address, optional) = addresses.for_slot(index);
    format!(
        "IMU_DESC_ENTRY({}, {}, {}, PIN_IMU_SCL, PIN_IMU_SDA, {}, {})",
        imu.imu_type,
        address,
        rotation_to_firmware(imu.rotation),
        optional,
        int_pin(imu)
    )
}

fn sensor_desc_entry(imu: &ImuConfig, index: usize, addresses: &Addresses) -> String {
    let (address, optional) = addresses.for_slot(index);
    format!(
        "SENSOR_DESC_ENTRY({}, {}, {}, DIRECT_WIRE(PIN_IMU_SCL, PIN_IMU_SDA), {}, DIRECT_PIN({}), 0)",
        imu.imu_type,
        address,
        rotation_to_firmware(imu.rotation),
        optional,
        int_pin(imu)
    )
}

fn desc_list(
    imus: &[ImuConfig],
    addresses: &Addresses,
    entry: fn(&ImuConfig, usize, &Addresses) -> String,
) -> String {
    imus.iter()
        .enumerate()
        .filter(|(_, imu)| is_known_imu(&imu.imu_type))
        .map(|(index, imu)| entry(imu, index, addresses))
        .collect::<Vec<_>>()
        .join(ENTRY_SEPARATOR)
}

/// Render the `defines.h` content for a normalized configuration.
///
/// Firmware before 0.6.0 always declares two IMUs; with a single IMU the
/// second slot repeats the first.
pub fn render(config: &BuildConfiguration) -> String {
    let Some(first) = config.imus.first() else {
        return String::new();
    };
    let second = config.imus.get(1).unwrap_or(first);
    let addresses = Addresses::new(config.swap_addresses);
    let board = &config.board;
    let battery = &config.battery;
    let led_pin = if board.enable_led {
        board.pins.led.as_str()
    } else {
        "255"
    };

    format!(
        "#define IMU {imu}
#define SECOND_IMU {second_imu}
#define BOARD {board_type}
#define IMU_ROTATION {rotation}
#define SECOND_IMU_ROTATION {second_rotation}

#define MAX_IMU_COUNT {count}
#define MAX_SENSORS_COUNT {count}
#define TRACKER_TYPE 0

#ifndef IMU_DESC_LIST
#define IMU_DESC_LIST \\
\t\t{imu_desc}
#endif

#define BATTERY_MONITOR {battery_type}
#define PIN_BATTERY_LEVEL {battery_pin}
#define BATTERY_SHIELD_RESISTANCE {resistance}
#define BATTERY_SHIELD_R1 {r1}
#define BATTERY_SHIELD_R2 {r2}

#define PIN_IMU_SDA {sda}
#define PIN_IMU_SCL {scl}
#define PIN_IMU_INT {int}
#define PIN_IMU_INT_2 {int_2}
#define LED_BUILTIN {led}
#define LED_INVERTED {led_inverted}
#define LED_PIN {led_pin}

#define PRIMARY_IMU_OPTIONAL false
#define SECONDARY_IMU_OPTIONAL true

#ifndef SENSOR_DESC_LIST
#define SENSOR_DESC_LIST \\
\t\t{sensor_desc}
#endif
",
        imu = first.imu_type,
        second_imu = second.imu_type,
        board_type = board.board_type,
        rotation = rotation_to_firmware(first.rotation),
        second_rotation = rotation_to_firmware(second.rotation),
        count = config.imus.len(),
        imu_desc = desc_list(&config.imus, &addresses, imu_desc_entry),
        battery_type = battery.battery_type.as_str(),
        battery_pin = battery.pin,
        resistance = battery.resistance,
        r1 = battery.r1,
        r2 = battery.r2,
        sda = board.pins.sda,
        scl = board.pins.scl,
        int = int_pin(first),
        int_2 = int_pin(second),
        led = board.pins.led,
        led_inverted = board.led_inverted,
        led_pin = led_pin,
        sensor_desc = desc_list(&config.imus, &addresses, sensor_desc_entry),
    )
}

// ── Debug header patching ─────────────────────────────────────────────

static DEBUG_MACROS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        "USE_6_AXIS",
        "OPTIMIZE_UPDATES",
        "COMPLIANCE_MODE",
        "BMI160_USE_TEMPCAL",
        "BMI160_TEMPCAL_DEBUG",
        "BMI160_DEBUG",
        "BMI160_USE_SENSCAL",
    ]
    .into_iter()
    .map(|name| {
        let pattern = format!(r"(?mi)^\W*#define\W+{}\W+[^/\n]+", name);
        (name, Regex::new(&pattern).unwrap())
    })
    .collect()
});

fn debug_value(debug: &DebugFlags, name: &str) -> bool {
    match name {
        "USE_6_AXIS" => debug.use6_axis,
        "OPTIMIZE_UPDATES" => debug.optimize_updates,
        "COMPLIANCE_MODE" => debug.compliance_mode,
        "BMI160_USE_TEMPCAL" => debug.bmi160_use_tempcal,
        "BMI160_TEMPCAL_DEBUG" => debug.bmi160_tempcal_debug,
        "BMI160_DEBUG" => debug.bmi160_debug,
        "BMI160_USE_SENSCAL" => debug.bmi160_use_senscal,
        _ => false,
    }
}

/// Rewrite every `#define` of a debug macro to the configured value.
/// Trailing `//` comments on the line are preserved.
pub fn apply_debug(contents: &str, debug: &DebugFlags) -> String {
    DEBUG_MACROS
        .iter()
        .fold(contents.to_string(), |text, (name, regex)| {
            let replacement = format!("#define {} {} ", name, debug_value(debug, name));
            regex.replace_all(&text, NoExpand(&replacement)).into_owned()
        })
}
