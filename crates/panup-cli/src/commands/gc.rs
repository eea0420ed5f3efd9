use anyhow::Result;
use std::path::Path;

use panup_core::config::retention_period;
use panup_core::session::ResumeStore;

pub fn run(base_dir: &Path, max_age_days: Option<u64>) -> Result<()> {
    let config = super::load_config(base_dir)?;
    let store = ResumeStore::open(&config.state_dir())?;

    let max_age = match max_age_days {
        Some(days) => Some(retention_period(days)),
        None => config.session_max_age(),
    };
    let Some(max_age) = max_age else {
        println!("Session retention is disabled (session_max_age_days = 0); nothing to do.");
        return Ok(());
    };

    let removed = store.gc(max_age)?;
    println!(
        "GC completed: {removed} session records removed from {}",
        store.dir().display()
    );
    Ok(())
}
