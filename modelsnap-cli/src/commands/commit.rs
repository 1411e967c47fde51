use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

pub fn run(file: PathBuf, message: String) -> Result<()> {
    if !file.is_file() {
        anyhow::bail!("{:?} does not exist or is not a file", file);
    }

    let mut session = super::open_session(&file)?;
    if session.has_history() && !super::has_uncommitted_changes(&session)? {
        println!("{}", "No changes to commit".yellow());
        return Ok(());
    }

    let commit = session
        .commit_working_file(&message)
        .context("Failed to create commit")?;
    let branch = session
        .tree()
        .branch(&commit.branch_id)
        .map(|b| b.name.clone())
        .unwrap_or_else(|| commit.branch_id.clone());
    session.close()?;

    println!("{}", "✓ Commit created successfully!".green().bold());
    println!("  {}: {}", "Commit ID".bold(), commit.id);
    println!("  {}: {}", "Branch".bold(), branch);
    println!("  {}: {}", "Message".bold(), commit.message);

    Ok(())
}
