use crate::display;
use anyhow::{Context, Result};
use colored::Colorize;
use modelsnap_core::{Config, Reconciler};
use std::path::PathBuf;

pub async fn run(file: PathBuf, config: &Config) -> Result<()> {
    let mut session = super::open_existing(&file)?;
    let client = super::remote_client(config)?;
    let reconciler = Reconciler::new(&client).with_retry(config.retry_policy());

    let pb = super::spinner(format!("Pushing to {}...", client.base_url()));
    let result = session.push(&reconciler).await;
    pb.finish_and_clear();
    let outcome = result.context("Push failed; nothing was marked as synced")?;
    session.close()?;

    if outcome.pushed.is_empty() {
        println!("{}", "Everything up to date".green());
    } else {
        println!(
            "{}",
            format!("✓ Pushed {} commit(s)", outcome.pushed.len())
                .green()
                .bold()
        );
        for id in &outcome.pushed {
            println!("      • {}", display::short_id(id).dimmed());
        }
    }
    println!(
        "  {}: {} commit(s)",
        "Remote history".bold(),
        outcome.remote_tree.commits.len()
    );
    if !outcome.status.remote_only.is_empty() {
        println!(
            "Remote has {} commit(s) you have not pulled. Run {}",
            outcome.status.remote_only.len().to_string().yellow(),
            format!("modelsnap pull {}", file.display()).cyan()
        );
    }

    Ok(())
}
