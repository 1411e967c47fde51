//! History operations on [`Tree`].
//!
//! The tree owns the structure of the history. Snapshot bytes are handed to
//! the [`SnapshotStore`] on commit and read back on restore; the tree never
//! keeps blob contents in memory.

use crate::error::{Error, Result};
use crate::models::{hash_content, Branch, Commit, Tree, BRANCH_COLORS, TREE_VERSION};
use crate::store::SnapshotStore;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

impl Tree {
    pub fn branch(&self, branch_id: &str) -> Option<&Branch> {
        self.branches.iter().find(|b| b.id == branch_id)
    }

    fn branch_mut(&mut self, branch_id: &str) -> Option<&mut Branch> {
        self.branches.iter_mut().find(|b| b.id == branch_id)
    }

    pub fn commit(&self, commit_id: &str) -> Option<&Commit> {
        self.commits.iter().find(|c| c.id == commit_id)
    }

    pub fn find_branch_by_name(&self, name: &str) -> Option<&Branch> {
        self.branches.iter().find(|b| b.name == name)
    }

    pub fn active_branch(&self) -> Option<&Branch> {
        self.branch(&self.active_branch_id)
    }

    pub fn commit_ids(&self) -> impl Iterator<Item = &str> {
        self.commits.iter().map(|c| c.id.as_str())
    }

    pub fn next_branch_color(&self) -> &'static str {
        BRANCH_COLORS[self.branches.len() % BRANCH_COLORS.len()]
    }

    pub fn create_commit(
        &mut self,
        store: &SnapshotStore,
        message: &str,
        branch_id: &str,
        blob: &[u8],
    ) -> Result<Commit> {
        let message = message.trim();
        if message.is_empty() {
            return Err(Error::Validation("commit message is empty".to_string()));
        }
        let head = self
            .branch(branch_id)
            .ok_or_else(|| Error::Validation(format!("unknown branch {}", branch_id)))?
            .head_commit_id
            .clone();

        let commit = Commit::new(message.to_string(), branch_id.to_string())
            .with_parent(head)
            .with_content(blob);

        // The blob lands first so the tree never points at a commit without one.
        store.save_commit_blob(&commit.id, blob)?;

        self.commits.push(commit.clone());
        if let Some(branch) = self.branch_mut(branch_id) {
            branch.head_commit_id = Some(commit.id.clone());
        }
        self.current_commit_id = Some(commit.id.clone());

        info!("Created commit {} on branch {}", commit.id, branch_id);
        Ok(commit)
    }

    pub fn create_branch(&mut self, name: &str, from_commit_id: &str, color: &str) -> Result<Branch> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("branch name is empty".to_string()));
        }
        if self.find_branch_by_name(name).is_some() {
            return Err(Error::Validation(format!("branch {:?} already exists", name)));
        }
        let origin = self.commit(from_commit_id).ok_or_else(|| {
            Error::Validation(format!("cannot branch from unknown commit {}", from_commit_id))
        })?;

        let branch = Branch::forked(
            name.to_string(),
            color.to_string(),
            origin.branch_id.clone(),
            from_commit_id.to_string(),
        );
        self.branches.push(branch.clone());

        info!("Created branch {} ({}) from {}", branch.name, branch.id, from_commit_id);
        Ok(branch)
    }

    pub fn switch_branch(&mut self, branch_id: &str) -> Result<()> {
        let head = self
            .branch(branch_id)
            .ok_or_else(|| Error::BranchNotFound(branch_id.to_string()))?
            .head_commit_id
            .clone();

        self.active_branch_id = branch_id.to_string();
        self.current_commit_id = head;
        debug!("Switched to branch {}", branch_id);
        Ok(())
    }

    /// Moves the current commit without touching any branch head and returns
    /// the snapshot bytes for it.
    pub fn restore_to_commit(&mut self, store: &SnapshotStore, commit_id: &str) -> Result<Vec<u8>> {
        let commit = self
            .commit(commit_id)
            .ok_or_else(|| Error::CommitNotFound(commit_id.to_string()))?;

        let bytes = store.read_commit_blob(commit_id)?;
        if let Some(expected) = &commit.content_hash {
            if hash_content(&bytes) != *expected {
                return Err(Error::Integrity {
                    commit_id: commit_id.to_string(),
                    reason: "snapshot content does not match recorded hash".to_string(),
                });
            }
        }

        self.current_commit_id = Some(commit_id.to_string());
        debug!("Restored view to commit {}", commit_id);
        Ok(bytes)
    }

    pub fn star_commit(&mut self, commit_id: &str, starred: bool) -> Result<()> {
        let commit = self
            .commits
            .iter_mut()
            .find(|c| c.id == commit_id)
            .ok_or_else(|| Error::CommitNotFound(commit_id.to_string()))?;
        commit.starred = starred;
        Ok(())
    }

    /// Newest first. Equal timestamps keep their recorded order.
    pub fn commits_for_display(&self) -> Vec<&Commit> {
        let mut commits: Vec<&Commit> = self.commits.iter().collect();
        commits.sort_by_key(|c| Reverse(c.timestamp));
        commits
    }

    /// Walks parent links from `commit_id` back to its root, inclusive.
    pub fn ancestors(&self, commit_id: &str) -> Vec<&Commit> {
        let index: HashMap<&str, &Commit> =
            self.commits.iter().map(|c| (c.id.as_str(), c)).collect();

        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(commit_id);
        while let Some(id) = next {
            let Some(commit) = index.get(id) else { break };
            if !seen.insert(id) {
                break;
            }
            chain.push(*commit);
            next = commit.parent_commit_id.as_deref();
        }
        chain
    }

    /// Head-first history of a branch, crossing fork points into parent branches.
    pub fn branch_history(&self, branch_id: &str) -> Result<Vec<&Commit>> {
        let branch = self
            .branch(branch_id)
            .ok_or_else(|| Error::BranchNotFound(branch_id.to_string()))?;
        Ok(branch
            .head_commit_id
            .as_deref()
            .map(|head| self.ancestors(head))
            .unwrap_or_default())
    }

    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        self.ancestors(descendant).iter().any(|c| c.id == ancestor)
    }

    /// True while the view is on a commit outside the active branch's history.
    pub fn is_detached(&self) -> bool {
        let Some(current) = self.current_commit_id.as_deref() else {
            return false;
        };
        match self.active_branch().and_then(|b| b.head_commit_id.as_deref()) {
            Some(head) => !self.is_ancestor(current, head),
            None => true,
        }
    }

    /// Brings a transient cross-branch view back to the active branch head.
    pub fn normalize_for_save(&mut self) {
        if self.is_detached() {
            let head = self
                .active_branch()
                .and_then(|b| b.head_commit_id.clone());
            debug!(
                "Current commit {:?} is off branch {}, resetting to {:?}",
                self.current_commit_id, self.active_branch_id, head
            );
            self.current_commit_id = head;
        }
    }

    /// Structural checks run on every loaded record.
    pub fn validate(&self) -> Result<()> {
        if self.version > TREE_VERSION {
            return Err(Error::InvalidTree(format!(
                "unsupported record version {}",
                self.version
            )));
        }

        let mut commit_ids = HashSet::new();
        for commit in &self.commits {
            if !commit_ids.insert(commit.id.as_str()) {
                return Err(Error::InvalidTree(format!("duplicate commit {}", commit.id)));
            }
        }
        let mut branch_ids = HashSet::new();
        for branch in &self.branches {
            if !branch_ids.insert(branch.id.as_str()) {
                return Err(Error::InvalidTree(format!("duplicate branch {}", branch.id)));
            }
        }

        let mains = self.branches.iter().filter(|b| b.is_main).count();
        if mains != 1 {
            return Err(Error::InvalidTree(format!(
                "expected exactly one main branch, found {}",
                mains
            )));
        }
        if !branch_ids.contains(self.active_branch_id.as_str()) {
            return Err(Error::InvalidTree(format!(
                "active branch {} does not exist",
                self.active_branch_id
            )));
        }
        if let Some(current) = &self.current_commit_id {
            if !commit_ids.contains(current.as_str()) {
                return Err(Error::InvalidTree(format!(
                    "current commit {} does not exist",
                    current
                )));
            }
        }

        for commit in &self.commits {
            if !branch_ids.contains(commit.branch_id.as_str()) {
                return Err(Error::InvalidTree(format!(
                    "commit {} belongs to unknown branch {}",
                    commit.id, commit.branch_id
                )));
            }
            if let Some(parent) = &commit.parent_commit_id {
                if !commit_ids.contains(parent.as_str()) {
                    return Err(Error::InvalidTree(format!(
                        "commit {} has unknown parent {}",
                        commit.id, parent
                    )));
                }
            }
            let chain = self.ancestors(&commit.id);
            let terminates = chain
                .last()
                .map(|root| root.parent_commit_id.is_none())
                .unwrap_or(false);
            if !terminates {
                return Err(Error::InvalidTree(format!(
                    "parent chain of commit {} is cyclic",
                    commit.id
                )));
            }
        }

        for branch in &self.branches {
            if let Some(parent) = &branch.parent_branch_id {
                if !branch_ids.contains(parent.as_str()) {
                    return Err(Error::InvalidTree(format!(
                        "branch {} has unknown parent branch {}",
                        branch.id, parent
                    )));
                }
            }
            if let Some(head) = &branch.head_commit_id {
                if !commit_ids.contains(head.as_str()) {
                    return Err(Error::InvalidTree(format!(
                        "branch {} points at unknown commit {}",
                        branch.id, head
                    )));
                }
            }
            if branch.is_main {
                continue;
            }
            let origin = branch.origin_commit_id.as_deref().ok_or_else(|| {
                Error::InvalidTree(format!("branch {} has no origin commit", branch.id))
            })?;
            let reachable = branch
                .head_commit_id
                .as_deref()
                .map(|head| self.is_ancestor(origin, head))
                .unwrap_or(false);
            if !reachable {
                return Err(Error::InvalidTree(format!(
                    "head of branch {} does not descend from its origin {}",
                    branch.id, origin
                )));
            }
        }

        Ok(())
    }

    /// Folds another copy of the same history into this one and returns the
    /// ids of commits that were not known before.
    ///
    /// Per commit id the preferred side's record wins. For a branch present on
    /// both sides, a head that descends from the other head wins; otherwise
    /// the preferred side wins.
    pub fn absorb(&mut self, other: &Tree, prefer_other: bool) -> Vec<String> {
        let mut added = Vec::new();
        for incoming in &other.commits {
            match self.commits.iter_mut().find(|c| c.id == incoming.id) {
                Some(existing) => {
                    if prefer_other {
                        *existing = incoming.clone();
                    }
                }
                None => {
                    self.commits.push(incoming.clone());
                    added.push(incoming.id.clone());
                }
            }
        }

        for incoming in &other.branches {
            let Some(existing) = self.branch(&incoming.id).cloned() else {
                self.branches.push(incoming.clone());
                continue;
            };

            let head = match (&existing.head_commit_id, &incoming.head_commit_id) {
                (Some(ours), Some(theirs)) if ours != theirs => {
                    if self.is_ancestor(ours, theirs) {
                        Some(theirs.clone())
                    } else if self.is_ancestor(theirs, ours) {
                        Some(ours.clone())
                    } else {
                        warn!(
                            "Branch {} diverged ({} vs {}), keeping {}",
                            existing.name,
                            ours,
                            theirs,
                            if prefer_other { "incoming" } else { "local" }
                        );
                        let winner = if prefer_other { theirs } else { ours };
                        Some(winner.clone())
                    }
                }
                (Some(ours), _) => Some(ours.clone()),
                (None, theirs) => theirs.clone(),
            };

            if let Some(branch) = self.branch_mut(&incoming.id) {
                if prefer_other {
                    branch.name = incoming.name.clone();
                    branch.color = incoming.color.clone();
                }
                branch.head_commit_id = head;
            }
        }

        added
    }
}
