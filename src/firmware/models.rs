use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Enumerations ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoardType {
    BoardSlimevr,
    BoardSlimevrDev,
    BoardNodemcu,
    BoardWemosd1mini,
    BoardTtgoTbase,
    BoardWemoswroom02,
    BoardWroom32,
    BoardEsp01,
    BoardLolinC3Mini,
    BoardBeetle32c3,
    BoardEs32c3devkitm1,
    /// Generic "cheesecake" board; only selects defaults.
    BoardCheesecake,
    /// Generic "Tiny Slime" board; only selects defaults.
    BoardTinyslime,
}

impl BoardType {
    pub const ALL: [BoardType; 13] = [
        Self::BoardSlimevr,
        Self::BoardSlimevrDev,
        Self::BoardNodemcu,
        Self::BoardWemosd1mini,
        Self::BoardTtgoTbase,
        Self::BoardWemoswroom02,
        Self::BoardWroom32,
        Self::BoardEsp01,
        Self::BoardLolinC3Mini,
        Self::BoardBeetle32c3,
        Self::BoardEs32c3devkitm1,
        Self::BoardCheesecake,
        Self::BoardTinyslime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BoardSlimevr => "BOARD_SLIMEVR",
            Self::BoardSlimevrDev => "BOARD_SLIMEVR_DEV",
            Self::BoardNodemcu => "BOARD_NODEMCU",
            Self::BoardWemosd1mini => "BOARD_WEMOSD1MINI",
            Self::BoardTtgoTbase => "BOARD_TTGO_TBASE",
            Self::BoardWemoswroom02 => "BOARD_WEMOSWROOM02",
            Self::BoardWroom32 => "BOARD_WROOM32",
            Self::BoardEsp01 => "BOARD_ESP01",
            Self::BoardLolinC3Mini => "BOARD_LOLIN_C3_MINI",
            Self::BoardBeetle32c3 => "BOARD_BEETLE32C3",
            Self::BoardEs32c3devkitm1 => "BOARD_ES32C3DEVKITM1",
            Self::BoardCheesecake => "BOARD_CHEESECAKE",
            Self::BoardTinyslime => "BOARD_TINYSLIME",
        }
    }
}

impl std::fmt::Display for BoardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BoardType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|board| board.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Invalid board type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatteryType {
    #[default]
    BatExternal,
    BatInternal,
    BatMcp3021,
    BatInternalMcp3021,
}

impl BatteryType {
    pub const ALL: [BatteryType; 4] = [
        Self::BatExternal,
        Self::BatInternal,
        Self::BatMcp3021,
        Self::BatInternalMcp3021,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BatExternal => "BAT_EXTERNAL",
            Self::BatInternal => "BAT_INTERNAL",
            Self::BatMcp3021 => "BAT_MCP3021",
            Self::BatInternalMcp3021 => "BAT_INTERNAL_MCP3021",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    Building,
    Done,
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Building => "BUILDING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUILDING" => Ok(Self::Building),
            "DONE" => Ok(Self::Done),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Invalid build status: {}", s)),
        }
    }
}

// ── Releases ──────────────────────────────────────────────────────────

/// Release coordinates as submitted by a client. Everything but the owner
/// and version can be inferred from the release catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    pub owner: String,
    #[serde(default)]
    pub repo: Option<String>,
    pub version: String,
    #[serde(default)]
    pub is_branch: Option<bool>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Fully-specified release coordinates (not yet pinned to a commit).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareRelease {
    pub owner: String,
    pub repo: String,
    pub version: String,
    pub is_branch: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub url: String,
}

impl FirmwareRelease {
    /// The part of the release that identifies a build, independent of
    /// which commit it resolved to.
    pub fn key(&self) -> ReleaseKey {
        ReleaseKey {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            version: self.version.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ReleaseKey {
    pub owner: String,
    pub repo: String,
    pub version: String,
}

/// A release pinned to an immutable commit SHA or tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRelease {
    #[serde(flatten)]
    pub release: FirmwareRelease,
    /// Commit SHA for branches, tag name for releases.
    pub id: String,
    pub archive_url: String,
}

// ── Build configuration ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardPins {
    #[serde(rename = "imuSDA")]
    pub sda: String,
    #[serde(rename = "imuSCL")]
    pub scl: String,
    pub led: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoardConfig {
    #[serde(rename = "type")]
    pub board_type: BoardType,
    pub pins: BoardPins,
    pub led_inverted: bool,
    pub enable_led: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImuConfig {
    /// IMU driver name (e.g. `IMU_BMI160`). Kept as free text so that types
    /// this server does not know about are still accepted.
    #[serde(rename = "type")]
    pub imu_type: String,
    pub rotation: i32,
    #[serde(rename = "imuINT", default, skip_serializing_if = "Option::is_none")]
    pub int_pin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatteryConfig {
    #[serde(rename = "type")]
    pub battery_type: BatteryType,
    pub pin: String,
    pub resistance: f64,
    pub r1: f64,
    pub r2: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DebugFlags {
    pub use6_axis: bool,
    pub optimize_updates: bool,
    pub compliance_mode: bool,
    pub bmi160_use_tempcal: bool,
    pub bmi160_tempcal_debug: bool,
    pub bmi160_debug: bool,
    pub bmi160_use_senscal: bool,
}

impl Default for DebugFlags {
    fn default() -> Self {
        Self {
            use6_axis: true,
            optimize_updates: true,
            compliance_mode: true,
            bmi160_use_tempcal: true,
            bmi160_tempcal_debug: false,
            bmi160_debug: false,
            bmi160_use_senscal: true,
        }
    }
}

/// A fully normalized, buildable configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfiguration {
    pub release: FirmwareRelease,
    pub board: BoardConfig,
    pub imus: Vec<ImuConfig>,
    pub battery: BatteryConfig,
    pub swap_addresses: bool,
    pub debug: DebugFlags,
}

// ── Build requests (partial configurations) ───────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BoardPinsRequest {
    #[serde(rename = "imuSDA", default)]
    pub sda: Option<String>,
    #[serde(rename = "imuSCL", default)]
    pub scl: Option<String>,
    #[serde(default)]
    pub led: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoardRequest {
    #[serde(rename = "type")]
    pub board_type: BoardType,
    #[serde(default)]
    pub pins: Option<BoardPinsRequest>,
    #[serde(default)]
    pub led_inverted: Option<bool>,
    #[serde(default)]
    pub enable_led: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BatteryRequest {
    #[serde(rename = "type", default)]
    pub battery_type: Option<BatteryType>,
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default)]
    pub resistance: Option<f64>,
    #[serde(default)]
    pub r1: Option<f64>,
    #[serde(default)]
    pub r2: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DebugRequest {
    #[serde(default)]
    pub use6_axis: Option<bool>,
    #[serde(default)]
    pub optimize_updates: Option<bool>,
    #[serde(default)]
    pub compliance_mode: Option<bool>,
    #[serde(default)]
    pub bmi160_use_tempcal: Option<bool>,
    #[serde(default)]
    pub bmi160_tempcal_debug: Option<bool>,
    #[serde(default)]
    pub bmi160_debug: Option<bool>,
    #[serde(default)]
    pub bmi160_use_senscal: Option<bool>,
}

/// Body of `POST /api/firmwares/build`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub release: ReleaseRequest,
    pub board: BoardRequest,
    #[serde(default)]
    pub imus: Option<Vec<ImuConfig>>,
    #[serde(default)]
    pub battery: Option<BatteryRequest>,
    #[serde(default)]
    pub swap_addresses: Option<bool>,
    #[serde(default)]
    pub debug: Option<DebugRequest>,
}

impl BuildRequest {
    /// A request that only names a board and a release.
    pub fn for_board(board_type: BoardType, release: ReleaseRequest) -> Self {
        Self {
            release,
            board: BoardRequest {
                board_type,
                pins: None,
                led_inverted: None,
                enable_led: None,
            },
            imus: None,
            battery: None,
            swap_addresses: None,
            debug: None,
        }
    }
}

impl From<BuildConfiguration> for BuildRequest {
    fn from(config: BuildConfiguration) -> Self {
        let BuildConfiguration {
            release,
            board,
            imus,
            battery,
            swap_addresses,
            debug,
        } = config;
        Self {
            release: ReleaseRequest {
                owner: release.owner,
                repo: Some(release.repo),
                version: release.version,
                is_branch: Some(release.is_branch),
                description: release.description,
                url: Some(release.url),
            },
            board: BoardRequest {
                board_type: board.board_type,
                pins: Some(BoardPinsRequest {
                    sda: Some(board.pins.sda),
                    scl: Some(board.pins.scl),
                    led: Some(board.pins.led),
                }),
                led_inverted: Some(board.led_inverted),
                enable_led: Some(board.enable_led),
            },
            imus: Some(imus),
            battery: Some(BatteryRequest {
                battery_type: Some(battery.battery_type),
                pin: Some(battery.pin),
                resistance: Some(battery.resistance),
                r1: Some(battery.r1),
                r2: Some(battery.r2),
            }),
            swap_addresses: Some(swap_addresses),
            debug: Some(DebugRequest {
                use6_axis: Some(debug.use6_axis),
                optimize_updates: Some(debug.optimize_updates),
                compliance_mode: Some(debug.compliance_mode),
                bmi160_use_tempcal: Some(debug.bmi160_use_tempcal),
                bmi160_tempcal_debug: Some(debug.bmi160_tempcal_debug),
                bmi160_debug: Some(debug.bmi160_debug),
                bmi160_use_senscal: Some(debug.bmi160_use_senscal),
            }),
        }
    }
}

// ── Build records and events ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FirmwareFile {
    pub offset: u64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRecord {
    pub id: String,
    pub fingerprint: String,
    pub release_id: String,
    pub status: BuildStatus,
    pub build_config: BuildConfiguration,
    pub firmware_files: Vec<FirmwareFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildResponse {
    pub id: String,
    pub status: BuildStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_files: Option<Vec<FirmwareFile>>,
}

impl From<&BuildRecord> for BuildResponse {
    fn from(record: &BuildRecord) -> Self {
        Self {
            id: record.id.clone(),
            status: record.status,
            firmware_files: (record.status == BuildStatus::Done)
                .then(|| record.firmware_files.clone()),
        }
    }
}

/// Ephemeral build-lifecycle event pushed to status subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    #[serde(rename = "id")]
    pub build_id: String,
    #[serde(rename = "buildStatus")]
    pub status: BuildStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_files: Option<Vec<FirmwareFile>>,
}

impl StatusEvent {
    pub fn building(build_id: &str, message: impl Into<String>) -> Self {
        Self {
            build_id: build_id.to_string(),
            status: BuildStatus::Building,
            message: message.into(),
            firmware_files: None,
        }
    }

    pub fn done(build_id: &str, files: Vec<FirmwareFile>) -> Self {
        Self {
            build_id: build_id.to_string(),
            status: BuildStatus::Done,
            message: "Build complete".to_string(),
            firmware_files: Some(files),
        }
    }

    pub fn failed(build_id: &str, message: impl Into<String>) -> Self {
        Self {
            build_id: build_id.to_string(),
            status: BuildStatus::Failed,
            message: message.into(),
            firmware_files: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_type_roundtrip() {
        for board in BoardType::ALL {
            assert_eq!(board.as_str().parse::<BoardType>().unwrap(), board);
            let json = serde_json::to_string(&board).unwrap();
            assert_eq!(json, format!("\"{}\"", board.as_str()));
        }
        assert!("BOARD_UNKNOWN".parse::<BoardType>().is_err());
    }

    #[test]
    fn test_battery_type_serializes_as_firmware_macro() {
        for battery in BatteryType::ALL {
            let json = serde_json::to_string(&battery).unwrap();
            assert_eq!(json, format!("\"{}\"", battery.as_str()));
        }
    }

    #[test]
    fn test_build_status_terminal() {
        assert!(!BuildStatus::Building.is_terminal());
        assert!(BuildStatus::Done.is_terminal());
        assert!(BuildStatus::Failed.is_terminal());
        assert_eq!("FAILED".parse::<BuildStatus>().unwrap(), BuildStatus::Failed);
        assert!("failed".parse::<BuildStatus>().is_err());
    }

    #[test]
    fn test_build_request_deserializes_minimal_body() {
        let body = serde_json::json!({
            "release": {"owner": "SlimeVR", "version": "main"},
            "board": {"type": "BOARD_WROOM32"}
        });
        let req: BuildRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.board.board_type, BoardType::BoardWroom32);
        assert!(req.imus.is_none());
        assert!(req.release.repo.is_none());
    }

    #[test]
    fn test_build_request_accepts_unknown_imu_type() {
        let body = serde_json::json!({
            "release": {"owner": "SlimeVR", "version": "v0.4.0"},
            "board": {"type": "BOARD_SLIMEVR", "pins": {"imuSDA": "14"}},
            "imus": [{"type": "IMU_FROM_THE_FUTURE", "rotation": 90, "imuINT": "16"}]
        });
        let req: BuildRequest = serde_json::from_value(body).unwrap();
        let imus = req.imus.unwrap();
        assert_eq!(imus[0].imu_type, "IMU_FROM_THE_FUTURE");
        assert_eq!(imus[0].int_pin.as_deref(), Some("16"));
        assert_eq!(req.board.pins.unwrap().sda.as_deref(), Some("14"));
    }

    #[test]
    fn test_status_event_wire_format() {
        let event = StatusEvent::done(
            "abc",
            vec![FirmwareFile {
                offset: 4096,
                url: "builds/abc/firmware-part-0.bin".into(),
            }],
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["buildStatus"], "DONE");
        assert_eq!(json["firmwareFiles"][0]["offset"], 4096);

        let building = serde_json::to_value(StatusEvent::building("abc", "Extracting")).unwrap();
        assert!(building.get("firmwareFiles").is_none());
    }

    #[test]
    fn test_build_response_only_exposes_files_when_done() {
        let release = FirmwareRelease {
            owner: "o".into(),
            repo: "r".into(),
            version: "v".into(),
            is_branch: false,
            description: None,
            url: "u".into(),
        };
        let mut record = BuildRecord {
            id: "id".into(),
            fingerprint: "fp".into(),
            release_id: "v".into(),
            status: BuildStatus::Building,
            build_config: BuildConfiguration {
                release,
                board: BoardConfig {
                    board_type: BoardType::BoardEsp01,
                    pins: BoardPins {
                        sda: "2".into(),
                        scl: "0".into(),
                        led: "LED_OFF".into(),
                    },
                    led_inverted: true,
                    enable_led: false,
                },
                imus: vec![],
                battery: BatteryConfig {
                    battery_type: BatteryType::BatExternal,
                    pin: "A0".into(),
                    resistance: 180.0,
                    r1: 100.0,
                    r2: 220.0,
                },
                swap_addresses: false,
                debug: DebugFlags::default(),
            },
            firmware_files: vec![],
            message: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert!(BuildResponse::from(&record).firmware_files.is_none());
        record.status = BuildStatus::Done;
        assert_eq!(BuildResponse::from(&record).firmware_files, Some(vec![]));
    }
}
