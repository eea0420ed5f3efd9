pub mod config;
pub mod gc;
pub mod init;
pub mod sessions;
pub mod upload;
pub mod whoami;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use panup_core::config::PanupConfig;
use panup_core::credentials::CredentialPool;
use panup_remote::HttpDrive;

pub fn load_config(base_dir: &Path) -> Result<PanupConfig> {
    let config_path = PanupConfig::default_path(base_dir);
    Ok(PanupConfig::load(&config_path)?)
}

/// Whether the config asks for debug logging. A missing or broken config
/// counts as no.
pub fn debug_enabled(base_dir: &Path) -> bool {
    load_config(base_dir).is_ok_and(|c| c.panup.debug)
}

/// HTTP drive client for the configured tokens and endpoints.
pub fn open_drive(config: &PanupConfig) -> Result<Arc<HttpDrive>> {
    let tokens = config.access_tokens();
    let pool = CredentialPool::new(&tokens).context(
        "no access tokens; add them to [credentials] or set PANUP_ACCESS_TOKENS",
    )?;
    tracing::debug!(tokens = pool.len(), drive = %config.endpoints.drive_url, "drive client ready");
    let drive = HttpDrive::new(
        &config.endpoints,
        &config.timeouts,
        Arc::new(pool),
        config.credentials.auth_check_ttl(),
    )?
    .with_debug(config.panup.debug);
    Ok(Arc::new(drive))
}
