use crate::display;
use anyhow::Result;
use colored::Colorize;
use modelsnap_core::{Config, Reconciler};
use std::path::PathBuf;

pub async fn run(file: PathBuf, branch: String, yes: bool, config: &Config) -> Result<()> {
    let mut session = super::open_existing(&file)?;
    let branch = session.resolve_branch(&branch)?.clone();

    if branch.id == session.tree().active_branch_id {
        println!("Already on {}", display::branch_label(&branch));
        return Ok(());
    }
    if !super::confirm_overwrite(&session, yes)? {
        println!("{}", "Switch cancelled".yellow());
        return Ok(());
    }

    let head_missing = branch
        .head_commit_id
        .as_deref()
        .is_some_and(|id| !session.store().commit_blob_exists(id));
    if head_missing && config.remote.is_some() {
        let client = super::remote_client(config)?;
        let reconciler = Reconciler::new(&client).with_retry(config.retry_policy());
        let pb = super::spinner(format!("Fetching head of {}...", branch.name));
        let result = session.checkout_branch_or_fetch(&branch.id, &reconciler).await;
        pb.finish_and_clear();
        result?;
    } else {
        session.checkout_branch(&branch.id)?;
    }

    match branch.head_commit_id.as_deref() {
        Some(head) => {
            println!(
                "{} {} at {}",
                "✓ Switched to".green().bold(),
                display::branch_label(&branch),
                display::short_id(head).yellow()
            );
        }
        None => {
            println!(
                "{} {} {}",
                "✓ Switched to".green().bold(),
                display::branch_label(&branch),
                "(no commits yet, working file left as is)".dimmed()
            );
        }
    }
    session.close()?;

    Ok(())
}
