use serde::Serialize;
use sha2::{Digest, Sha256};

use super::models::{BatteryConfig, BoardConfig, BuildConfiguration, DebugFlags, ImuConfig, ReleaseKey};

/// The configuration as seen by dedup: release narrowed to its coordinates.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FingerprintInput<'a> {
    release: ReleaseKey,
    board: &'a BoardConfig,
    imus: &'a [ImuConfig],
    battery: &'a BatteryConfig,
    swap_addresses: bool,
    debug: &'a DebugFlags,
}

/// SHA-256 (lowercase hex) of the canonical JSON of a normalized
/// configuration. Release description, URL and resolved commit do not
/// participate.
pub fn fingerprint(config: &BuildConfiguration) -> String {
    let input = FingerprintInput {
        release: config.release.key(),
        board: &config.board,
        imus: &config.imus,
        battery: &config.battery,
        swap_addresses: config.swap_addresses,
        debug: &config.debug,
    };
    // Round-trip through `Value` so object keys come out sorted.
    let canonical = serde_json::to_value(&input)
        .map(|value| value.to_string())
        .unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
