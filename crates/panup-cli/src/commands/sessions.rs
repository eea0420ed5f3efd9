use anyhow::Result;
use std::path::Path;

use panup_core::session::ResumeStore;

pub fn run(base_dir: &Path) -> Result<()> {
    let config = super::load_config(base_dir)?;
    let store = ResumeStore::open(&config.state_dir())?;
    let sessions = store.list()?;

    if sessions.is_empty() {
        println!("No unfinished uploads.");
        return Ok(());
    }

    println!(
        "{:<34} {:>9} {:>12} {:<20} LOCAL -> REMOTE",
        "KEY", "PARTS", "SIZE", "UPDATED"
    );
    for s in &sessions {
        let state = if s.committed {
            "committed".to_string()
        } else {
            format!("{}/{}", s.parts.len(), s.part_count())
        };
        println!(
            "{:<34} {:>9} {:>12} {:<20} {} -> {}",
            s.key(),
            state,
            s.file_size,
            s.updated_at.format("%Y-%m-%d %H:%M:%S"),
            s.local_path,
            s.dest_path
        );
    }
    println!("\n{} unfinished upload(s). Re-run `panup upload` with the same arguments to resume.", sessions.len());
    Ok(())
}
