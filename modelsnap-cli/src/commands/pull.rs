use crate::display;
use anyhow::{Context, Result};
use colored::Colorize;
use modelsnap_core::{Config, PullReport, Reconciler};
use std::path::PathBuf;

pub async fn run(file: PathBuf, config: &Config) -> Result<()> {
    let mut session = super::open_session(&file)?;
    let client = super::remote_client(config)?;
    let reconciler = Reconciler::new(&client).with_retry(config.retry_policy());

    // Bootstrapping replaces the working file.
    if !session.has_history() && !super::confirm_overwrite(&session, false)? {
        println!("{}", "Pull cancelled".yellow());
        return Ok(());
    }

    let pb = super::spinner(format!("Pulling from {}...", client.base_url()));
    let result = session.pull(&reconciler).await;
    pb.finish_and_clear();
    let report = result.context("Pull failed; local history is unchanged")?;
    session.close()?;

    match report {
        PullReport::Bootstrapped { commit_id } => {
            println!(
                "{}",
                format!("✓ Downloaded {} at {}", file.display(), display::short_id(&commit_id))
                    .green()
                    .bold()
            );
            println!(
                "  {}",
                "Older snapshots are fetched when you restore them".dimmed()
            );
        }
        PullReport::Merged { added } if added.is_empty() => {
            println!("{}", "Already up to date".green());
        }
        PullReport::Merged { added } => {
            println!(
                "{}",
                format!("✓ Merged {} new commit(s)", added.len()).green().bold()
            );
            for id in &added {
                println!("      • {}", display::short_id(id).dimmed());
            }
            println!(
                "  {}",
                "The working file is unchanged; use switch or restore to load them".dimmed()
            );
        }
    }

    Ok(())
}
