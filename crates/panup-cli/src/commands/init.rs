use anyhow::Result;
use std::path::Path;

use panup_core::config::PanupConfig;
use panup_core::session::ResumeStore;

pub fn run(base_dir: &Path) -> Result<()> {
    println!("Initializing panup in {}", base_dir.display());

    std::fs::create_dir_all(base_dir)?;

    let config_path = PanupConfig::default_path(base_dir);
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
    } else {
        let config = PanupConfig::default_config();
        config.save(&config_path)?;
        println!("Created config: {}", config_path.display());
    }

    let config = PanupConfig::load(&config_path)?;
    let store = ResumeStore::open(&config.state_dir())?;
    println!("Session state:  {}", store.dir().display());

    println!("\npanup initialized. Next steps:");
    println!("  1. Add your access token(s) to [credentials] in {}", config_path.display());
    println!("  2. Run `panup whoami` to check them");
    println!("  3. Run `panup upload <file> --to /some/folder/`");

    Ok(())
}
