use crate::display;
use anyhow::Result;
use colored::Colorize;
use modelsnap_core::{Config, Reconciler};
use std::path::PathBuf;

pub async fn run(file: PathBuf, config: &Config) -> Result<()> {
    let mut session = super::open_session(&file)?;

    if !session.has_history() {
        println!("{}", "No history for this file".red());
        println!(
            "Run {} to start tracking",
            format!("modelsnap commit {} -m <message>", file.display()).cyan()
        );
        return Ok(());
    }

    let tree = session.tree();
    println!("{}", "Model Status".bold().cyan());
    println!("  {}: {}", "File".bold(), file.display());
    if let Some(branch) = tree.active_branch() {
        println!("  {}: {}", "Branch".bold(), display::branch_label(branch));
    }
    match tree.current_commit_id.as_deref() {
        Some(id) if tree.is_detached() => println!(
            "  {}: {} {}",
            "Commit".bold(),
            display::short_id(id).yellow(),
            "(viewing outside the active branch)".dimmed()
        ),
        Some(id) => println!("  {}: {}", "Commit".bold(), display::short_id(id).yellow()),
        None => println!("  {}: {}", "Commit".bold(), "none".dimmed()),
    }
    println!(
        "  {}: {} commit(s) on {} branch(es)",
        "History".bold(),
        tree.commits.len(),
        tree.branches.len()
    );
    if !session.missing_blobs().is_empty() {
        println!(
            "  {}: {}",
            "Not stored locally".bold(),
            session.missing_blobs().len().to_string().yellow()
        );
    }
    println!();

    if super::has_uncommitted_changes(&session)? {
        println!("{}", "Working file has uncommitted changes".yellow());
        println!(
            "Run {} to commit them",
            format!("modelsnap commit {} -m \"message\"", file.display()).cyan()
        );
    } else {
        println!("{}", "Working file matches the current commit".green());
    }
    println!();

    if config.remote.is_none() {
        println!("{}", "No remote configured".dimmed());
        return Ok(());
    }

    println!("{}", "Cloud".bold().cyan());
    let client = super::remote_client(config)?;
    let reconciler = Reconciler::new(&client).with_retry(config.retry_policy());
    let pb = super::spinner("Checking remote...");
    let result = session.sync_status(&reconciler).await;
    pb.finish_and_clear();

    match result {
        Ok(status) => display::print_sync_status(&status),
        Err(e) => println!("  {} {}", "Remote unavailable:".red(), e),
    }

    Ok(())
}
