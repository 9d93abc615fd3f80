//! Offline configuration commands (`firmware-forge defaults` and
//! `firmware-forge render`).

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};

use firmware_forge::config::AppConfig;
use firmware_forge::firmware::defines;
use firmware_forge::firmware::models::{BoardType, BuildRequest};
use firmware_forge::firmware::normalize::{default_request, normalize, preview};

pub fn cmd_defaults(config: &AppConfig, board: &str) -> Result<()> {
    let board = BoardType::from_str(board).map_err(anyhow::Error::msg)?;
    let catalog = config.releases.resolver_settings().catalog;
    let defaults = preview(default_request(board, &catalog), &catalog)?;
    println!("{}", serde_json::to_string_pretty(&defaults)?);
    Ok(())
}

pub fn cmd_render(config: &AppConfig, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let request: BuildRequest = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse build configuration in {}", file.display()))?;
    let catalog = config.releases.resolver_settings().catalog;
    let normalized = normalize(request, &catalog)?;
    print!("{}", defines::render(&normalized));
    Ok(())
}
