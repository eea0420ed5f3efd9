use anyhow::Result;
use std::path::Path;

use panup_core::config::PanupConfig;

pub fn run(base_dir: &Path) -> Result<()> {
    let config_path = PanupConfig::default_path(base_dir);
    let config = PanupConfig::load(&config_path)?;

    println!("Config: {}", config_path.display());
    println!();
    println!("  State dir:        {}", config.panup.state_dir);
    match config.session_max_age() {
        Some(_) => println!("  Session retention: {} days", config.panup.session_max_age_days),
        None => println!("  Session retention: forever"),
    }
    println!("  Debug:            {}", config.panup.debug);
    println!("  Drive URL:        {}", config.endpoints.drive_url);
    println!("  Account URL:      {}", config.endpoints.account_url);
    println!("  Path-style OSS:   {}", config.endpoints.path_style);
    println!(
        "  Timeouts:         api {}s, part {}s, commit {}s",
        config.timeouts.api_secs, config.timeouts.part_secs, config.timeouts.commit_secs
    );
    println!("  Auth check TTL:   {}s", config.credentials.auth_check_ttl_secs);
    println!();

    let tokens = config.access_tokens();
    if tokens.is_empty() {
        println!("  No access tokens configured.");
        println!();
        println!("  Add them to {}:", config_path.display());
        println!("  [credentials]");
        println!("  access_tokens = [\"__puus=...; __pus=...\"]");
    } else {
        println!("  Access tokens ({}):", tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            println!("    {i}: {}", mask(token));
        }
    }

    Ok(())
}

/// First and last four characters only.
fn mask(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail} ({} chars)", chars.len())
}
