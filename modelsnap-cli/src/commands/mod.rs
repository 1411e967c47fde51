pub mod branch;
pub mod commit;
pub mod log;
pub mod pull;
pub mod push;
pub mod restore;
pub mod serve;
pub mod star;
pub mod status;
pub mod switch;
pub mod watch;

use anyhow::{Context, Result};
use colored::Colorize;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use modelsnap_core::models::hash_content;
use modelsnap_core::{Config, OpenReport, ProjectSession, Reconciler, StaticToken};
use modelsnap_sdk::CloudClient;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let path = Config::resolve_path(explicit);
    debug!("Loading config from {:?}", path);
    Config::load(&path).with_context(|| format!("Failed to load config from {:?}", path))
}

pub fn open_session(file: &Path) -> Result<ProjectSession> {
    let (session, report) = ProjectSession::open_tracked_file(file)
        .with_context(|| format!("Failed to open history for {:?}", file))?;
    report_open(&report);
    Ok(session)
}

/// Like [`open_session`], but refuses files that have never been committed.
pub fn open_existing(file: &Path) -> Result<ProjectSession> {
    let session = open_session(file)?;
    if !session.has_history() {
        anyhow::bail!(
            "No history for {:?}. Run 'modelsnap commit {} -m <message>' first.",
            file,
            file.display()
        );
    }
    Ok(session)
}

fn report_open(report: &OpenReport) {
    if !report.missing_blobs.is_empty() {
        println!(
            "{}",
            format!(
                "⚠ {} commit snapshot(s) are not stored locally; 'modelsnap pull' can fetch them",
                report.missing_blobs.len()
            )
            .yellow()
        );
    }
}

pub fn remote_client(config: &Config) -> Result<CloudClient> {
    let remote = config
        .remote()
        .context("No [remote] section in the config file")?;
    let token = config
        .remote_token()
        .context("No remote token. Set MODELSNAP_TOKEN or [remote] token")?;
    Ok(CloudClient::new(
        remote.url.clone(),
        remote.project.clone(),
        StaticToken::new(token),
    ))
}

pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// True when the working file differs from the current commit's snapshot.
pub fn has_uncommitted_changes(session: &ProjectSession) -> Result<bool> {
    let bytes = match std::fs::read(session.tracked_path()) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let tree = session.tree();
    let recorded = tree
        .current_commit_id
        .as_deref()
        .and_then(|id| tree.commit(id))
        .and_then(|c| c.content_hash.as_deref());

    Ok(match recorded {
        Some(hash) => hash != hash_content(&bytes),
        None => tree.current_commit_id.is_none(),
    })
}

/// Asks before a restore or switch overwrites edits that were never committed.
pub fn confirm_overwrite(session: &ProjectSession, assume_yes: bool) -> Result<bool> {
    if assume_yes || !has_uncommitted_changes(session)? {
        return Ok(true);
    }
    let proceed = Confirm::new()
        .with_prompt(format!(
            "{} has uncommitted changes that will be lost. Continue?",
            session.tracked_path().display()
        ))
        .default(false)
        .interact()?;
    Ok(proceed)
}

/// Restores `commit_id`, downloading its snapshot first when it is only on
/// the remote and a remote is configured.
pub async fn restore_snapshot(
    session: &mut ProjectSession,
    commit_id: &str,
    config: &Config,
) -> Result<Vec<u8>> {
    if session.store().commit_blob_exists(commit_id) || config.remote.is_none() {
        return Ok(session.restore(commit_id)?);
    }

    let client = remote_client(config)?;
    let reconciler = Reconciler::new(&client).with_retry(config.retry_policy());
    let pb = spinner(format!("Fetching snapshot {}...", commit_id));
    let result = session.restore_or_fetch(commit_id, &reconciler).await;
    pb.finish_and_clear();
    Ok(result?)
}
