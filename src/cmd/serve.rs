//! HTTP build server command (`firmware-forge serve`).

use anyhow::Result;

use firmware_forge::config::AppConfig;

pub async fn cmd_serve(
    mut config: AppConfig,
    port: Option<u16>,
    host: Option<String>,
    dev: bool,
) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }
    config.server.dev_mode |= dev;

    firmware_forge::firmware::server::start_server(config).await
}
