//! Cloud synchronization.
//!
//! [`compute_sync_status`] is a pure set partition. [`Reconciler`] drives blob
//! and tree transfers against a [`RemoteStore`]. Every reconciler operation
//! borrows the local tree immutably and hands back an outcome the caller
//! applies, so a failed or abandoned transfer never touches local state.

use crate::error::{Error, Result};
use crate::models::{hash_content, Tree};
use crate::remote::{RemoteObject, RemoteStore, TransferDirection};
use crate::store::SnapshotStore;
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Local commits not yet confirmed on the remote.
    pub local_only: BTreeSet<String>,
    /// Remote commits this side has never seen.
    pub remote_only: BTreeSet<String>,
    /// Marked synced locally and still present remotely.
    pub synced: BTreeSet<String>,
    /// Marked synced locally but gone from the remote.
    pub lost: BTreeSet<String>,
}

impl SyncStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.local_only.is_empty() && self.remote_only.is_empty() && self.lost.is_empty()
    }
}

pub fn compute_sync_status<L, S, R>(local: L, synced: S, remote: R) -> SyncStatus
where
    L: IntoIterator,
    L::Item: AsRef<str>,
    S: IntoIterator,
    S::Item: AsRef<str>,
    R: IntoIterator,
    R::Item: AsRef<str>,
{
    let local: BTreeSet<String> = local.into_iter().map(|id| id.as_ref().to_string()).collect();
    let marked: BTreeSet<String> = synced
        .into_iter()
        .map(|id| id.as_ref().to_string())
        .collect();
    let remote: BTreeSet<String> = remote
        .into_iter()
        .map(|id| id.as_ref().to_string())
        .collect();

    let local_only = local.difference(&marked).cloned().collect();
    let remote_only = remote.difference(&local).cloned().collect();
    let marked_local: BTreeSet<String> = local.intersection(&marked).cloned().collect();
    let synced = marked_local.intersection(&remote).cloned().collect();
    let lost = marked_local.difference(&remote).cloned().collect();

    SyncStatus {
        local_only,
        remote_only,
        synced,
        lost,
    }
}

/// Bounded exponential backoff for transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub status: SyncStatus,
    /// Commits whose blobs were uploaded in this pass, in history order.
    pub pushed: Vec<String>,
    /// The tree record now stored remotely.
    pub remote_tree: Tree,
    confirmed: BTreeSet<String>,
}

impl PushOutcome {
    pub fn apply(&self, tree: &mut Tree) {
        tree.cloud_synced_commit_ids
            .extend(self.confirmed.iter().cloned());
    }
}

#[derive(Debug, Clone)]
pub struct PullOutcome {
    pub tree: Tree,
    /// Commits learned from the remote. Their blobs are fetched on demand.
    pub added: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    pub tree: Tree,
    pub commit_id: String,
    pub bytes: Vec<u8>,
}

pub struct Reconciler<'a> {
    remote: &'a dyn RemoteStore,
    retry: RetryPolicy,
}

impl<'a> Reconciler<'a> {
    pub fn new(remote: &'a dyn RemoteStore) -> Self {
        Self {
            remote,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn with_retries<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!("{} failed ({}), retrying in {:?}", label, err, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(Error::Transport(msg)) => {
                    return Err(Error::Transport(format!("{}: {}", label, msg)))
                }
                Err(Error::Rejected(msg)) => {
                    return Err(Error::Rejected(format!("{}: {}", label, msg)))
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn upload(&self, object: &RemoteObject, bytes: Vec<u8>) -> Result<()> {
        let label = format!("upload {}", describe(object));
        let remote = self.remote;
        self.with_retries(&label, || {
            let bytes = bytes.clone();
            async move {
                let target = remote
                    .issue_target(TransferDirection::Upload, object)
                    .await?;
                remote.put_object(&target, bytes).await
            }
        })
        .await
    }

    async fn download(&self, object: &RemoteObject) -> Result<Option<Vec<u8>>> {
        let label = format!("download {}", describe(object));
        let remote = self.remote;
        self.with_retries(&label, || async move {
            let target = remote
                .issue_target(TransferDirection::Download, object)
                .await?;
            remote.get_object(&target).await
        })
        .await
    }

    pub async fn fetch_remote_tree(&self) -> Result<Option<Tree>> {
        let Some(bytes) = self.download(&RemoteObject::Tree).await? else {
            return Ok(None);
        };
        let tree: Tree = serde_json::from_slice(&bytes)
            .map_err(|e| Error::InvalidTree(format!("remote record: {}", e)))?;
        tree.validate()?;
        Ok(Some(tree))
    }

    pub async fn status(&self, tree: &Tree) -> Result<SyncStatus> {
        let remote = self.fetch_remote_tree().await?;
        let remote_ids: Vec<&str> = remote
            .as_ref()
            .map(|t| t.commit_ids().collect())
            .unwrap_or_default();
        Ok(compute_sync_status(
            tree.commit_ids(),
            &tree.cloud_synced_commit_ids,
            remote_ids,
        ))
    }

    /// Uploads every unsynced blob, then the merged tree record. Nothing is
    /// reported as synced unless both steps complete.
    pub async fn push(&self, tree: &Tree, store: &SnapshotStore) -> Result<PushOutcome> {
        let remote_tree = self.fetch_remote_tree().await?;
        let remote_ids: BTreeSet<String> = remote_tree
            .as_ref()
            .map(|t| t.commit_ids().map(str::to_string).collect())
            .unwrap_or_default();
        let status = compute_sync_status(
            tree.commit_ids(),
            &tree.cloud_synced_commit_ids,
            &remote_ids,
        );

        let pending: Vec<String> = tree
            .commit_ids()
            .filter(|id| status.local_only.contains(*id) || status.lost.contains(*id))
            .map(str::to_string)
            .collect();

        let mut pushed = Vec::with_capacity(pending.len());
        for commit_id in pending {
            let bytes = store.read_commit_blob(&commit_id).map_err(|e| match e {
                Error::BlobNotFound(id) => Error::Integrity {
                    commit_id: id,
                    reason: "snapshot blob is missing locally and cannot be pushed".to_string(),
                },
                other => other,
            })?;
            self.upload(&RemoteObject::commit(commit_id.as_str()), bytes)
                .await?;
            debug!("Uploaded blob for commit {}", commit_id);
            pushed.push(commit_id);
        }

        let mut merged = match remote_tree {
            Some(mut remote) => {
                remote.absorb(tree, true);
                remote.active_branch_id = tree.active_branch_id.clone();
                remote.current_commit_id = tree.current_commit_id.clone();
                remote
            }
            None => tree.clone(),
        };
        merged.cloud_synced_commit_ids.clear();
        merged.normalize_for_save();
        merged.validate()?;

        let record = serde_json::to_vec_pretty(&merged)?;
        self.upload(&RemoteObject::Tree, record).await?;

        let confirmed = tree.commit_ids().map(str::to_string).collect();
        info!(
            "Pushed {} commit(s); remote now holds {}",
            pushed.len(),
            merged.commits.len()
        );
        Ok(PushOutcome {
            status,
            pushed,
            remote_tree: merged,
            confirmed,
        })
    }

    /// Folds the remote history into a copy of `tree`. Only metadata moves.
    pub async fn pull(&self, tree: &Tree) -> Result<PullOutcome> {
        let Some(remote) = self.fetch_remote_tree().await? else {
            debug!("Remote has no history, nothing to pull");
            return Ok(PullOutcome {
                tree: tree.clone(),
                added: Vec::new(),
            });
        };

        let mut merged = tree.clone();
        let added = merged.absorb(&remote, true);
        merged
            .cloud_synced_commit_ids
            .extend(remote.commit_ids().map(str::to_string));
        merged.validate()?;

        info!("Pulled {} new commit(s)", added.len());
        Ok(PullOutcome {
            tree: merged,
            added,
        })
    }

    /// Builds a working copy from the remote when nothing exists locally:
    /// the remote tree plus the one blob at the tip of its active branch.
    pub async fn bootstrap(&self, store: &SnapshotStore) -> Result<BootstrapOutcome> {
        let mut tree = self.fetch_remote_tree().await?.ok_or(Error::RemoteEmpty)?;

        let branch_id = tree.active_branch_id.clone();
        let commit_id = tree
            .branch(&branch_id)
            .and_then(|b| b.head_commit_id.clone())
            .or_else(|| {
                tree.commits_for_display()
                    .into_iter()
                    .find(|c| c.branch_id == branch_id)
                    .map(|c| c.id.clone())
            })
            .ok_or(Error::RemoteEmpty)?;

        let bytes = self.download_verified(&tree, &commit_id).await?;
        store.ensure_root()?;
        store.save_commit_blob(&commit_id, &bytes)?;

        tree.current_commit_id = Some(commit_id.clone());
        tree.cloud_synced_commit_ids = tree.commit_ids().map(str::to_string).collect();

        info!("Bootstrapped from remote at commit {}", commit_id);
        Ok(BootstrapOutcome {
            tree,
            commit_id,
            bytes,
        })
    }

    /// Downloads one blob that the tree knows about but the store lacks.
    pub async fn fetch_blob(
        &self,
        tree: &Tree,
        store: &SnapshotStore,
        commit_id: &str,
    ) -> Result<Vec<u8>> {
        let bytes = self.download_verified(tree, commit_id).await?;
        store.save_commit_blob(commit_id, &bytes)?;
        debug!("Fetched blob for commit {}", commit_id);
        Ok(bytes)
    }

    async fn download_verified(&self, tree: &Tree, commit_id: &str) -> Result<Vec<u8>> {
        let commit = tree
            .commit(commit_id)
            .ok_or_else(|| Error::CommitNotFound(commit_id.to_string()))?;

        let bytes = self
            .download(&RemoteObject::commit(commit_id))
            .await?
            .ok_or_else(|| Error::Integrity {
                commit_id: commit_id.to_string(),
                reason: "snapshot blob is missing on the remote".to_string(),
            })?;

        if let Some(expected) = &commit.content_hash {
            if hash_content(&bytes) != *expected {
                return Err(Error::Integrity {
                    commit_id: commit_id.to_string(),
                    reason: "downloaded snapshot does not match recorded hash".to_string(),
                });
            }
        }
        Ok(bytes)
    }
}

fn describe(object: &RemoteObject) -> String {
    match object {
        RemoteObject::Tree => "tree record".to_string(),
        RemoteObject::Commit { commit_id } => format!("commit {}", commit_id),
    }
}
