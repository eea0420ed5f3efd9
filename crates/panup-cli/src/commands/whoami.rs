use anyhow::Result;
use std::path::Path;

use panup_remote::DriveApi;

pub async fn run(base_dir: &Path) -> Result<()> {
    let config = super::load_config(base_dir)?;
    let drive = super::open_drive(&config)?;

    drive.ensure_auth().await?;
    let account = drive.check_identity().await?;
    let current = drive.pool().current();
    println!("Token {} of {} is valid.", current.index, drive.pool().len());

    for key in ["nickname", "mobilekey", "member_type"] {
        if let Some(value) = account.get(key).and_then(|v| v.as_str()) {
            println!("  {key:<12} {value}");
        }
    }
    Ok(())
}
