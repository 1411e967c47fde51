//! The boundary between the reconciler and a cloud object store.
//!
//! A remote holds one tree record per project plus one blob object per
//! commit. Nothing is transferred with long-lived credentials: every object
//! transfer goes through a short-lived target issued for exactly one object
//! and one direction.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

impl TransferDirection {
    pub fn as_str(&self) -> &str {
        match self {
            TransferDirection::Upload => "upload",
            TransferDirection::Download => "download",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RemoteObject {
    Tree,
    Commit {
        #[serde(rename = "commitId")]
        commit_id: String,
    },
}

impl RemoteObject {
    pub fn commit(commit_id: impl Into<String>) -> Self {
        RemoteObject::Commit {
            commit_id: commit_id.into(),
        }
    }

    /// Object key inside the store, embedding the commit id for blobs.
    pub fn key(&self, project: &str) -> String {
        match self {
            RemoteObject::Tree => format!("projects/{}/tree.json", project),
            RemoteObject::Commit { commit_id } => {
                format!("projects/{}/commits/{}.blob", project, commit_id)
            }
        }
    }
}

/// Body of a transfer-target request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub direction: TransferDirection,
    pub object: RemoteObject,
}

/// A pre-authorized URL for one object in one direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferTarget {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn issue_target(
        &self,
        direction: TransferDirection,
        object: &RemoteObject,
    ) -> Result<TransferTarget>;

    async fn put_object(&self, target: &TransferTarget, bytes: Vec<u8>) -> Result<()>;

    /// `None` when the object does not exist on the remote.
    async fn get_object(&self, target: &TransferTarget) -> Result<Option<Vec<u8>>>;
}

/// Supplies the authenticated-session token for remote calls.
pub trait TokenSupplier: Send + Sync {
    fn token(&self) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenSupplier for StaticToken {
    fn token(&self) -> Result<String> {
        if self.0.is_empty() {
            return Err(Error::Transport("no session token available".to_string()));
        }
        Ok(self.0.clone())
    }
}

const MEMORY_PROJECT: &str = "memory";

/// In-process remote with failure injection, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: HashMap<String, Vec<u8>>,
    offline: bool,
    stalled: bool,
    failing_targets: usize,
    target_requests: usize,
    failing_uploads: HashSet<String>,
    downloads: Vec<String>,
    uploads: Vec<String>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// While offline, target issuance fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// While stalled, target issuance never completes.
    pub fn set_stalled(&self, stalled: bool) {
        self.state().stalled = stalled;
    }

    /// Makes the next `count` target requests fail with a transport error.
    pub fn fail_next_targets(&self, count: usize) {
        self.state().failing_targets = count;
    }

    /// Number of target requests seen, including failed ones.
    pub fn target_requests(&self) -> usize {
        self.state().target_requests
    }

    /// Makes every upload of `object` fail with a transport error.
    pub fn fail_uploads_of(&self, object: &RemoteObject) {
        self.state()
            .failing_uploads
            .insert(object.key(MEMORY_PROJECT));
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failing_uploads.clear();
        state.failing_targets = 0;
    }

    pub fn contains(&self, object: &RemoteObject) -> bool {
        self.state().objects.contains_key(&object.key(MEMORY_PROJECT))
    }

    pub fn insert(&self, object: &RemoteObject, bytes: Vec<u8>) {
        self.state().objects.insert(object.key(MEMORY_PROJECT), bytes);
    }

    /// Keys of completed downloads, in order.
    pub fn downloads(&self) -> Vec<String> {
        self.state().downloads.clone()
    }

    /// Keys of completed uploads, in order.
    pub fn uploads(&self) -> Vec<String> {
        self.state().uploads.clone()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn issue_target(
        &self,
        direction: TransferDirection,
        object: &RemoteObject,
    ) -> Result<TransferTarget> {
        let stalled = {
            let mut state = self.state();
            state.target_requests += 1;
            if state.offline {
                return Err(Error::Transport(format!(
                    "remote unreachable while requesting {} target",
                    direction.as_str()
                )));
            }
            if state.failing_targets > 0 {
                state.failing_targets -= 1;
                return Err(Error::Transport(format!(
                    "{} target request timed out",
                    direction.as_str()
                )));
            }
            state.stalled
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(TransferTarget {
            url: object.key(MEMORY_PROJECT),
            expires_at: Utc::now() + Duration::minutes(5),
        })
    }

    async fn put_object(&self, target: &TransferTarget, bytes: Vec<u8>) -> Result<()> {
        let mut state = self.state();
        if state.failing_uploads.contains(&target.url) {
            return Err(Error::Transport(format!("upload of {} rejected", target.url)));
        }
        state.objects.insert(target.url.clone(), bytes);
        state.uploads.push(target.url.clone());
        Ok(())
    }

    async fn get_object(&self, target: &TransferTarget) -> Result<Option<Vec<u8>>> {
        let mut state = self.state();
        let bytes = state.objects.get(&target.url).cloned();
        if bytes.is_some() {
            state.downloads.push(target.url.clone());
        }
        Ok(bytes)
    }
}
