use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

use panup_core::session::ResumeStore;
use panup_upload::{UploadProgress, UploadResult, Uploader};

pub async fn run(base_dir: &Path, files: &[PathBuf], dest: &str, json: bool) -> Result<()> {
    let config = super::load_config(base_dir)?;
    let drive = super::open_drive(&config)?;
    drive.ensure_auth().await?;

    let store = ResumeStore::open(&config.state_dir())?;
    let uploader = Uploader::new(drive, store, config.session_max_age());
    let dest = destination_for(dest, files.len());

    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")?
        .progress_chars("=>-");

    let mut failed = 0usize;
    for file in files {
        let pb = ProgressBar::new(0);
        pb.set_style(style.clone());
        pb.set_message(file.display().to_string());

        let result = uploader
            .upload(file, &dest, |p: &UploadProgress| {
                pb.set_length(p.total);
                pb.set_position(p.uploaded);
                pb.set_message(format!("{}  ETA {}", p.speed_text, p.remaining_text));
            })
            .await;

        if result.success() {
            pb.finish_with_message("done");
        } else {
            pb.abandon_with_message(result.code().to_string());
            failed += 1;
        }
        report(file, &result, json)?;
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} uploads failed", files.len());
    }
    Ok(())
}

/// Several files always land inside `dest`.
fn destination_for(dest: &str, count: usize) -> String {
    if count > 1 && !dest.ends_with('/') {
        format!("{dest}/")
    } else {
        dest.to_string()
    }
}

fn report(file: &Path, result: &UploadResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    match result.data() {
        Some(data) => {
            let name = data
                .get("file_name")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let fid = data.get("fid").and_then(|v| v.as_str()).unwrap_or_default();
            println!("Uploaded {} as {name} (fid {fid})", file.display());
        }
        None => {
            eprintln!("Failed {}: [{}] {}", file.display(), result.code(), result.message());
        }
    }
    Ok(())
}
