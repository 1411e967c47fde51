use anyhow::{Context, Result};
use colored::Colorize;
use modelsnap_core::{ChangeEvent, Config, ProjectSession};
use std::path::PathBuf;

pub async fn run(file: PathBuf, config: &Config) -> Result<()> {
    let (mut session, _) = ProjectSession::open_with_debounce(&file, config.debounce())
        .with_context(|| format!("Failed to open history for {:?}", file))?;
    let mut changes = session.watch().context("Failed to start watching")?;

    println!("{}", "👀 Watching for external changes...".bold().cyan());
    println!("   {}: {}", "File".bold(), file.display());
    println!("   {}: {:?}", "Debounce".bold(), config.debounce());
    println!();
    println!("{}", "Press Ctrl+C to stop".dimmed());
    println!();

    loop {
        tokio::select! {
            change = changes.recv() => {
                let Some(change) = change else { break };
                session.note_external_change(&change);
                print_change(&change);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close()?;
    println!("{}", "Stopped watching".dimmed());
    Ok(())
}

fn print_change(change: &ChangeEvent) {
    match change {
        ChangeEvent::Modified { path, modified } => {
            println!(
                "  {} {} {}",
                "~".yellow(),
                path.display(),
                modified
                    .with_timezone(&chrono::Local)
                    .format("%H:%M:%S")
                    .to_string()
                    .dimmed()
            );
            println!(
                "    Run {} to keep this version",
                format!("modelsnap commit {} -m \"message\"", path.display()).cyan()
            );
        }
        ChangeEvent::Deleted { path } => {
            println!("  {} {} {}", "-".red(), path.display(), "deleted".red());
        }
        ChangeEvent::AccessError { path, message } => {
            println!("  {} {}: {}", "!".red(), path.display(), message);
        }
    }
}
