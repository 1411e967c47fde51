//! One open tracked file.
//!
//! A [`ProjectSession`] is created by [`ProjectSession::open_tracked_file`]
//! and owns everything belonging to that file: the history tree, the
//! snapshot store and the change monitor. It is passed explicitly to every
//! operation and torn down with [`ProjectSession::close`].

use crate::error::{Error, Result};
use crate::events::{EventChannel, SessionEvent};
use crate::models::{hash_content, Branch, Commit, Tree};
use crate::store::{write_atomic, SnapshotStore};
use crate::sync::{PushOutcome, Reconciler, SyncStatus};
use crate::watcher::{ChangeEvent, ChangeMonitor, DEFAULT_DEBOUNCE};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenReport {
    /// The storage root did not exist before opening.
    pub created_root: bool,
    /// A persisted history record was found.
    pub loaded_history: bool,
    /// Commits recorded in the history whose blob is absent locally.
    pub missing_blobs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullReport {
    /// No local history existed; the working copy was materialized from the
    /// remote's active branch head.
    Bootstrapped { commit_id: String },
    /// Remote commits were folded into the local history.
    Merged { added: Vec<String> },
}

pub struct ProjectSession {
    store: SnapshotStore,
    tree: Tree,
    monitor: ChangeMonitor,
    events: EventChannel,
    missing_blobs: BTreeSet<String>,
    pending_external_change: bool,
}

impl ProjectSession {
    pub fn open_tracked_file<P: AsRef<Path>>(path: P) -> Result<(Self, OpenReport)> {
        Self::open_with_debounce(path, DEFAULT_DEBOUNCE)
    }

    pub fn open_with_debounce<P: AsRef<Path>>(
        path: P,
        debounce: Duration,
    ) -> Result<(Self, OpenReport)> {
        let path = path.as_ref();
        let store = SnapshotStore::for_tracked_file(path)?;
        let created_root = store.ensure_root()?;

        let loaded = store.load_tree()?;
        let loaded_history = loaded.is_some();
        let tree = loaded.unwrap_or_default();

        let missing_blobs = store.validate_commit_blobs(tree.commit_ids());
        if !missing_blobs.is_empty() {
            warn!(
                "{} commit(s) of {:?} have no local snapshot",
                missing_blobs.len(),
                path
            );
        }

        info!(
            "Opened {:?} ({} commits, {} branches)",
            path,
            tree.commits.len(),
            tree.branches.len()
        );

        let session = Self {
            monitor: ChangeMonitor::new(path).with_debounce(debounce),
            store,
            tree,
            events: EventChannel::default(),
            missing_blobs: missing_blobs.iter().cloned().collect(),
            pending_external_change: false,
        };
        let report = OpenReport {
            created_root,
            loaded_history,
            missing_blobs,
        };
        Ok((session, report))
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn tracked_path(&self) -> &Path {
        self.store.tracked_path()
    }

    pub fn has_history(&self) -> bool {
        self.store.tree_exists() || !self.tree.commits.is_empty()
    }

    pub fn missing_blobs(&self) -> &BTreeSet<String> {
        &self.missing_blobs
    }

    pub fn has_pending_external_change(&self) -> bool {
        self.pending_external_change
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn unsubscribe(&mut self) {
        self.events.unsubscribe();
    }

    /// Commits `blob` on the active branch.
    pub fn commit(&mut self, message: &str, blob: &[u8]) -> Result<Commit> {
        let branch_id = self.tree.active_branch_id.clone();
        let commit = self
            .tree
            .create_commit(&self.store, message, &branch_id, blob)?;
        self.pending_external_change = false;
        self.save()?;
        self.events.emit(SessionEvent::CommitCreated {
            commit: commit.clone(),
        });
        Ok(commit)
    }

    /// Commits the current on-disk contents of the tracked file.
    pub fn commit_working_file(&mut self, message: &str) -> Result<Commit> {
        let bytes = std::fs::read(self.store.tracked_path())?;
        self.commit(message, &bytes)
    }

    pub fn list_commits(&self) -> Vec<&Commit> {
        self.tree.commits_for_display()
    }

    /// Resolves a full id, a unique id prefix, or a unique id suffix (the
    /// short form the CLI prints).
    pub fn resolve_commit(&self, id_or_part: &str) -> Result<&Commit> {
        if let Some(commit) = self.tree.commit(id_or_part) {
            return Ok(commit);
        }
        if id_or_part.is_empty() {
            return Err(Error::CommitNotFound(id_or_part.to_string()));
        }
        let mut matches = self
            .tree
            .commits
            .iter()
            .filter(|c| c.id.starts_with(id_or_part) || c.id.ends_with(id_or_part));
        match (matches.next(), matches.next()) {
            (Some(commit), None) => Ok(commit),
            (Some(_), Some(_)) => Err(Error::Validation(format!(
                "commit id {} is ambiguous",
                id_or_part
            ))),
            _ => Err(Error::CommitNotFound(id_or_part.to_string())),
        }
    }

    /// Resolves a branch by id first, then by name.
    pub fn resolve_branch(&self, id_or_name: &str) -> Result<&Branch> {
        self.tree
            .branch(id_or_name)
            .or_else(|| self.tree.find_branch_by_name(id_or_name))
            .ok_or_else(|| Error::BranchNotFound(id_or_name.to_string()))
    }

    /// Forks from `from` (default: the current commit) with `color`
    /// (default: next palette entry).
    pub fn create_branch(
        &mut self,
        name: &str,
        from: Option<&str>,
        color: Option<&str>,
    ) -> Result<Branch> {
        let from = match from {
            Some(id) => id.to_string(),
            None => self.tree.current_commit_id.clone().ok_or_else(|| {
                Error::Validation("nothing to branch from: no commits yet".to_string())
            })?,
        };
        let color = color
            .map(str::to_string)
            .unwrap_or_else(|| self.tree.next_branch_color().to_string());

        let branch = self.tree.create_branch(name, &from, &color)?;
        self.save()?;
        self.events.emit(SessionEvent::BranchCreated {
            branch: branch.clone(),
        });
        Ok(branch)
    }

    /// Makes `branch_id` active in the record without touching the working
    /// copy. See [`checkout_branch`](Self::checkout_branch) for the variant
    /// that also loads the head snapshot.
    pub fn switch_branch(&mut self, branch_id: &str) -> Result<()> {
        self.tree.switch_branch(branch_id)?;
        self.save()?;
        self.events.emit(SessionEvent::BranchSwitched {
            branch_id: branch_id.to_string(),
            head_commit_id: self.tree.current_commit_id.clone(),
        });
        Ok(())
    }

    /// Makes `branch_id` active and writes its head snapshot to the tracked
    /// file, returning the bytes written.
    ///
    /// The head snapshot is read and verified before anything changes, so a
    /// missing or corrupt blob leaves the active branch, the saved record and
    /// the working copy as they were. A branch without commits is switched to
    /// and the working copy is left alone.
    pub fn checkout_branch(&mut self, branch_id: &str) -> Result<Option<Vec<u8>>> {
        let head = self
            .tree
            .branch(branch_id)
            .ok_or_else(|| Error::BranchNotFound(branch_id.to_string()))?
            .head_commit_id
            .clone();

        let bytes = match head.as_deref() {
            Some(commit_id) => Some(self.read_verified_snapshot(commit_id)?),
            None => None,
        };
        if let Some(bytes) = &bytes {
            self.write_working_copy(bytes)?;
            self.pending_external_change = false;
        }
        self.switch_branch(branch_id)?;
        Ok(bytes)
    }

    /// Like [`checkout_branch`](Self::checkout_branch), fetching the head
    /// snapshot from the remote first when it is not cached locally.
    pub async fn checkout_branch_or_fetch(
        &mut self,
        branch_id: &str,
        reconciler: &Reconciler<'_>,
    ) -> Result<Option<Vec<u8>>> {
        let head = self
            .tree
            .branch(branch_id)
            .and_then(|b| b.head_commit_id.clone());
        if let Some(head) = head {
            if !self.store.commit_blob_exists(&head) {
                reconciler
                    .fetch_blob(&self.tree, &self.store, &head)
                    .await?;
                self.missing_blobs.remove(&head);
            }
        }
        self.checkout_branch(branch_id)
    }

    fn read_verified_snapshot(&self, commit_id: &str) -> Result<Vec<u8>> {
        let commit = self
            .tree
            .commit(commit_id)
            .ok_or_else(|| Error::CommitNotFound(commit_id.to_string()))?;
        let bytes = self
            .store
            .read_commit_blob(commit_id)
            .map_err(not_cached)?;
        if let Some(expected) = &commit.content_hash {
            if hash_content(&bytes) != *expected {
                return Err(Error::Integrity {
                    commit_id: commit_id.to_string(),
                    reason: "snapshot content does not match recorded hash".to_string(),
                });
            }
        }
        Ok(bytes)
    }

    /// Time-travels the view to `commit_id` and returns its snapshot.
    pub fn restore(&mut self, commit_id: &str) -> Result<Vec<u8>> {
        let bytes = self
            .tree
            .restore_to_commit(&self.store, commit_id)
            .map_err(not_cached)?;
        self.pending_external_change = false;
        self.save()?;
        self.events.emit(SessionEvent::Restored {
            commit_id: commit_id.to_string(),
        });
        Ok(bytes)
    }

    /// Like [`restore`](Self::restore), fetching the blob from the remote
    /// first when it is not cached locally.
    pub async fn restore_or_fetch(
        &mut self,
        commit_id: &str,
        reconciler: &Reconciler<'_>,
    ) -> Result<Vec<u8>> {
        if self.tree.commit(commit_id).is_some() && !self.store.commit_blob_exists(commit_id) {
            reconciler
                .fetch_blob(&self.tree, &self.store, commit_id)
                .await?;
            self.missing_blobs.remove(commit_id);
        }
        self.restore(commit_id)
    }

    /// Snapshot bytes of the current commit, if there is one.
    pub fn current_snapshot(&self) -> Result<Option<Vec<u8>>> {
        let Some(commit_id) = self.tree.current_commit_id.as_deref() else {
            return Ok(None);
        };
        self.store
            .read_commit_blob(commit_id)
            .map(Some)
            .map_err(not_cached)
    }

    pub fn star(&mut self, commit_id: &str, starred: bool) -> Result<()> {
        self.tree.star_commit(commit_id, starred)?;
        self.save()?;
        self.events.emit(SessionEvent::CommitStarred {
            commit_id: commit_id.to_string(),
            starred,
        });
        Ok(())
    }

    /// Replaces the tracked file's contents.
    pub fn write_working_copy(&self, bytes: &[u8]) -> Result<()> {
        write_atomic(self.store.tracked_path(), bytes)
    }

    pub fn watch(&mut self) -> Result<mpsc::UnboundedReceiver<ChangeEvent>> {
        self.monitor.start()
    }

    /// Records a change reported by the monitor and returns whether the
    /// session now has external changes pending.
    pub fn note_external_change(&mut self, change: &ChangeEvent) -> bool {
        match change {
            ChangeEvent::Modified { .. } | ChangeEvent::Deleted { .. } => {
                self.pending_external_change = true;
            }
            ChangeEvent::AccessError { message, .. } => {
                warn!("Cannot observe {:?}: {}", self.tracked_path(), message);
            }
        }
        self.events.emit(SessionEvent::ExternalChange {
            change: change.clone(),
        });
        self.pending_external_change
    }

    pub async fn sync_status(&mut self, reconciler: &Reconciler<'_>) -> Result<SyncStatus> {
        let status = reconciler.status(&self.tree).await?;
        self.events.emit(SessionEvent::SyncStatus {
            status: status.clone(),
        });
        Ok(status)
    }

    pub async fn push(&mut self, reconciler: &Reconciler<'_>) -> Result<PushOutcome> {
        let outcome = reconciler.push(&self.tree, &self.store).await?;
        outcome.apply(&mut self.tree);
        self.save()?;
        Ok(outcome)
    }

    /// Bootstraps when there is no local history yet, otherwise merges the
    /// remote history in. Only the bootstrap writes the working copy.
    pub async fn pull(&mut self, reconciler: &Reconciler<'_>) -> Result<PullReport> {
        if !self.has_history() {
            let outcome = reconciler.bootstrap(&self.store).await?;
            self.tree = outcome.tree;
            self.missing_blobs = self
                .store
                .validate_commit_blobs(self.tree.commit_ids())
                .into_iter()
                .collect();
            self.write_working_copy(&outcome.bytes)?;
            self.save()?;
            return Ok(PullReport::Bootstrapped {
                commit_id: outcome.commit_id,
            });
        }

        let outcome = reconciler.pull(&self.tree).await?;
        self.tree = outcome.tree;
        self.missing_blobs.extend(outcome.added.iter().cloned());
        self.save()?;
        Ok(PullReport::Merged {
            added: outcome.added,
        })
    }

    /// Persists the history record. A cross-branch preview is reconciled in
    /// the record only; the in-memory view is left alone.
    pub fn save(&self) -> Result<()> {
        let mut record = self.tree.clone();
        record.normalize_for_save();
        self.store.save_tree(&record)
    }

    pub fn close(mut self) -> Result<()> {
        self.monitor.stop();
        self.events.unsubscribe();
        if self.has_history() {
            self.save()?;
        }
        info!("Closed {:?}", self.tracked_path());
        Ok(())
    }
}

/// A commit the history knows but whose blob is absent is an integrity
/// problem, not an unknown commit: the caller can re-fetch it.
fn not_cached(err: Error) -> Error {
    match err {
        Error::BlobNotFound(id) => Error::Integrity {
            commit_id: id,
            reason: "snapshot blob is missing locally; pull to fetch it".to_string(),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use crate::sync::RetryPolicy;
    use std::fs;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> (ProjectSession, OpenReport) {
        let path = dir.path().join("model.3dm");
        if !path.exists() {
            fs::write(&path, b"initial").unwrap();
        }
        ProjectSession::open_tracked_file(path).unwrap()
    }

    #[test]
    fn test_open_commit_reopen() {
        let dir = TempDir::new().unwrap();
        let (mut session, report) = open(&dir);
        assert!(report.created_root);
        assert!(!report.loaded_history);
        assert!(!session.has_history());

        let first = session.commit_working_file("first").unwrap();
        let second = session.commit("second", b"edited").unwrap();
        session.close().unwrap();

        let (session, report) = open(&dir);
        assert!(!report.created_root);
        assert!(report.loaded_history);
        assert!(report.missing_blobs.is_empty());
        let ids: Vec<&str> = session.list_commits().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.id.as_str()));
        assert_eq!(
            session.tree().current_commit_id.as_deref(),
            Some(second.id.as_str())
        );
    }

    #[test]
    fn test_reopen_reports_blobs_deleted_out_of_band() {
        let dir = TempDir::new().unwrap();
        let (mut session, _) = open(&dir);
        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(session.commit(&format!("c{}", i), &[i]).unwrap().id);
        }
        let root = session.store().root_path().to_path_buf();
        session.close().unwrap();

        for id in &ids {
            fs::remove_file(root.join(format!("commit_{}.3dm", id))).unwrap();
        }

        let (mut session, report) = open(&dir);
        assert_eq!(report.missing_blobs, ids);
        assert_eq!(session.tree().commits.len(), 3);

        let err = session.restore(&ids[0]).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
    }

    #[test]
    fn test_branch_restore_roundtrip() {
        let dir = TempDir::new().unwrap();
        let (mut session, _) = open(&dir);
        let base = session.commit("base", b"base bytes").unwrap();
        session.commit("more", b"more bytes").unwrap();

        let branch = session
            .create_branch("variant", Some(&base.id), None)
            .unwrap();
        session.switch_branch(&branch.id).unwrap();
        let bytes = session.restore(&base.id).unwrap();

        assert_eq!(bytes, b"base bytes");
        assert_eq!(session.resolve_branch("variant").unwrap().id, branch.id);
        assert_eq!(session.current_snapshot().unwrap(), Some(b"base bytes".to_vec()));
    }

    #[test]
    fn test_create_branch_without_commits() {
        let dir = TempDir::new().unwrap();
        let (mut session, _) = open(&dir);
        assert!(matches!(
            session.create_branch("early", None, None),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_resolve_commit_prefix() {
        let dir = TempDir::new().unwrap();
        let (mut session, _) = open(&dir);
        let commit = session.commit("first", b"x").unwrap();

        assert_eq!(session.resolve_commit(&commit.id).unwrap().id, commit.id);
        assert_eq!(
            session.resolve_commit(&commit.id[..commit.id.len() - 2]).unwrap().id,
            commit.id
        );
        assert!(matches!(
            session.resolve_commit("zzz"),
            Err(Error::CommitNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_commit_short_suffix() {
        let dir = TempDir::new().unwrap();
        let (mut session, _) = open(&dir);
        let first = session.commit("first", b"x").unwrap();
        let second = session.commit("second", b"y").unwrap();

        for commit in [&first, &second] {
            let suffix = &commit.id[commit.id.len() - 8..];
            assert_eq!(session.resolve_commit(suffix).unwrap().id, commit.id);
        }
        assert!(matches!(
            session.resolve_commit(""),
            Err(Error::CommitNotFound(_))
        ));
    }

    #[test]
    fn test_checkout_branch_loads_head() {
        let dir = TempDir::new().unwrap();
        let (mut session, _) = open(&dir);
        let base = session.commit("base", b"v1").unwrap();
        session.commit("more", b"v2").unwrap();
        let alt = session.create_branch("alt", Some(&base.id), None).unwrap();

        let bytes = session.checkout_branch(&alt.id).unwrap();
        assert_eq!(bytes, Some(b"v1".to_vec()));
        assert_eq!(fs::read(session.tracked_path()).unwrap(), b"v1");
        let record = session.store().load_tree().unwrap().unwrap();
        assert_eq!(record.active_branch_id, alt.id);
        assert_eq!(record.current_commit_id.as_deref(), Some(base.id.as_str()));
    }

    #[test]
    fn test_checkout_branch_with_missing_head_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let (mut session, _) = open(&dir);
        let base = session.commit("base", b"v1").unwrap();
        let head = session.commit("more", b"v2").unwrap();
        session.write_working_copy(b"v2").unwrap();
        let alt = session.create_branch("alt", Some(&base.id), None).unwrap();
        fs::remove_file(session.store().blob_path(&base.id).unwrap()).unwrap();

        let record_before = session.store().load_tree().unwrap().unwrap();
        let err = session.checkout_branch(&alt.id).unwrap_err();

        assert!(matches!(err, Error::Integrity { .. }));
        assert_eq!(session.tree().active_branch_id, "main");
        assert_eq!(
            session.tree().current_commit_id.as_deref(),
            Some(head.id.as_str())
        );
        assert_eq!(session.store().load_tree().unwrap().unwrap(), record_before);
        assert_eq!(fs::read(session.tracked_path()).unwrap(), b"v2");
    }

    #[test]
    fn test_events_follow_mutations() {
        let dir = TempDir::new().unwrap();
        let (mut session, _) = open(&dir);
        let mut events = session.subscribe();

        let commit = session.commit("first", b"x").unwrap();
        session.star(&commit.id, true).unwrap();
        let path = session.tracked_path().to_path_buf();
        session.note_external_change(&ChangeEvent::Deleted { path });

        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::CommitCreated { commit: c }) if c.id == commit.id
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::CommitStarred { starred: true, .. })
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::ExternalChange { .. })
        ));
        assert!(session.has_pending_external_change());

        session.unsubscribe();
        session.commit("second", b"y").unwrap();
        assert!(!session.has_pending_external_change());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_saved_record_drops_cross_branch_preview() {
        let dir = TempDir::new().unwrap();
        let (mut session, _) = open(&dir);
        let base = session.commit("base", b"1").unwrap();
        let branch = session.create_branch("alt", Some(&base.id), None).unwrap();
        session.switch_branch(&branch.id).unwrap();
        let alt = session.commit("alt", b"2").unwrap();
        session.switch_branch("main").unwrap();

        session.restore(&alt.id).unwrap();
        assert_eq!(session.tree().current_commit_id.as_deref(), Some(alt.id.as_str()));

        let record = session.store().load_tree().unwrap().unwrap();
        assert_eq!(record.current_commit_id.as_deref(), Some(base.id.as_str()));
    }

    #[tokio::test]
    async fn test_push_then_bootstrap_elsewhere() {
        let remote = MemoryRemote::new();
        let reconciler = Reconciler::new(&remote).with_retry(RetryPolicy::none());

        let dir_a = TempDir::new().unwrap();
        let (mut device_a, _) = open(&dir_a);
        device_a.commit("one", b"v1").unwrap();
        let head = device_a.commit("two", b"v2").unwrap();
        let outcome = device_a.push(&reconciler).await.unwrap();
        assert_eq!(outcome.pushed.len(), 2);
        assert!(device_a.sync_status(&reconciler).await.unwrap().is_up_to_date());

        let dir_b = TempDir::new().unwrap();
        let path_b = dir_b.path().join("model.3dm");
        let (mut device_b, _) = ProjectSession::open_tracked_file(&path_b).unwrap();
        let report = device_b.pull(&reconciler).await.unwrap();

        assert_eq!(
            report,
            PullReport::Bootstrapped {
                commit_id: head.id.clone()
            }
        );
        assert_eq!(fs::read(&path_b).unwrap(), b"v2");
        assert_eq!(device_b.missing_blobs().len(), 1);

        // Older history is fetched on demand.
        let first_id = device_b
            .list_commits()
            .iter()
            .find(|c| c.message == "one")
            .map(|c| c.id.clone())
            .unwrap();
        let bytes = device_b.restore_or_fetch(&first_id, &reconciler).await.unwrap();
        assert_eq!(bytes, b"v1");
        assert!(device_b.missing_blobs().is_empty());
    }

    #[tokio::test]
    async fn test_checkout_fetches_missing_head() {
        let remote = MemoryRemote::new();
        let reconciler = Reconciler::new(&remote).with_retry(RetryPolicy::none());

        let dir_a = TempDir::new().unwrap();
        let (mut device_a, _) = open(&dir_a);
        let base = device_a.commit("base", b"v1").unwrap();
        device_a.commit("more", b"v2").unwrap();
        let alt = device_a.create_branch("alt", Some(&base.id), None).unwrap();
        device_a.push(&reconciler).await.unwrap();

        let dir_b = TempDir::new().unwrap();
        let path_b = dir_b.path().join("model.3dm");
        let (mut device_b, _) = ProjectSession::open_tracked_file(&path_b).unwrap();
        device_b.pull(&reconciler).await.unwrap();
        assert!(device_b.missing_blobs().contains(&base.id));

        let bytes = device_b
            .checkout_branch_or_fetch(&alt.id, &reconciler)
            .await
            .unwrap();
        assert_eq!(bytes, Some(b"v1".to_vec()));
        assert_eq!(fs::read(&path_b).unwrap(), b"v1");
        assert_eq!(device_b.tree().active_branch_id, alt.id);
        assert!(device_b.missing_blobs().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_push_leaves_history_untouched() {
        let remote = MemoryRemote::new();
        let reconciler = Reconciler::new(&remote).with_retry(RetryPolicy::none());

        let dir = TempDir::new().unwrap();
        let (mut session, _) = open(&dir);
        session.commit("one", b"v1").unwrap();
        let tree_before = session.tree().clone();
        let record_before = session.store().load_tree().unwrap().unwrap();

        remote.set_stalled(true);
        let result =
            tokio::time::timeout(Duration::from_millis(50), session.push(&reconciler)).await;
        assert!(result.is_err());

        assert_eq!(session.tree(), &tree_before);
        assert!(session.tree().cloud_synced_commit_ids.is_empty());
        assert_eq!(session.store().load_tree().unwrap().unwrap(), record_before);
        assert!(remote.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_pull_merges_into_existing_history() {
        let remote = MemoryRemote::new();
        let reconciler = Reconciler::new(&remote).with_retry(RetryPolicy::none());

        let dir_a = TempDir::new().unwrap();
        let (mut device_a, _) = open(&dir_a);
        device_a.commit("one", b"v1").unwrap();
        device_a.push(&reconciler).await.unwrap();

        let dir_b = TempDir::new().unwrap();
        let (mut device_b, _) = ProjectSession::open_tracked_file(dir_b.path().join("model.3dm")).unwrap();
        device_b.pull(&reconciler).await.unwrap();

        let two = device_a.commit("two", b"v2").unwrap();
        device_a.push(&reconciler).await.unwrap();

        let report = device_b.pull(&reconciler).await.unwrap();
        assert_eq!(
            report,
            PullReport::Merged {
                added: vec![two.id.clone()]
            }
        );
        assert!(device_b.missing_blobs().contains(&two.id));
        assert!(device_b.tree().cloud_synced_commit_ids.contains(&two.id));
    }
}
