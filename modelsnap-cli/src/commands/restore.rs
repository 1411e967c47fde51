use crate::display;
use anyhow::Result;
use colored::Colorize;
use modelsnap_core::Config;
use std::path::PathBuf;

pub async fn run(
    file: PathBuf,
    commit_id: String,
    execute: bool,
    yes: bool,
    config: &Config,
) -> Result<()> {
    let mut session = super::open_existing(&file)?;
    let commit = session.resolve_commit(&commit_id)?.clone();
    let tree = session.tree();

    println!("{}", "Restore Preview".bold().cyan());
    println!("  {}: {}", "Target Commit".bold(), commit.id);
    println!("  {}: {}", "Message".bold(), commit.message);
    if let Some(branch) = tree.branch(&commit.branch_id) {
        println!("  {}: {}", "Branch".bold(), display::branch_label(branch));
    }
    println!(
        "  {}: {}",
        "Date".bold(),
        commit
            .timestamp
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
    );
    if !session.store().commit_blob_exists(&commit.id) {
        println!("  {}", "Snapshot is not stored locally and will be downloaded".yellow());
    }
    let active_head = tree
        .active_branch()
        .and_then(|b| b.head_commit_id.as_deref())
        .unwrap_or_default();
    if !tree.is_ancestor(&commit.id, active_head) {
        println!(
            "  {}",
            "Commit is outside the active branch; the view returns to the branch head on the next save"
                .dimmed()
        );
    }
    println!();

    if !execute {
        println!("{}", "This is a preview only.".yellow());
        println!(
            "Run with {} to actually overwrite {}",
            "--execute".cyan(),
            file.display()
        );
        return Ok(());
    }

    if !super::confirm_overwrite(&session, yes)? {
        println!("{}", "Restore cancelled".yellow());
        return Ok(());
    }

    let bytes = super::restore_snapshot(&mut session, &commit.id, config).await?;
    session.write_working_copy(&bytes)?;
    session.close()?;

    println!(
        "{}",
        format!("✓ Restored {} to {}", file.display(), display::short_id(&commit.id))
            .green()
            .bold()
    );
    Ok(())
}
