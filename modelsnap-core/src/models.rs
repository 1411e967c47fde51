use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

pub const TREE_VERSION: u32 = 1;
pub const MAIN_BRANCH_ID: &str = "main";
pub const MAIN_BRANCH_NAME: &str = "main";

/// Palette handed out to new branches when the caller does not pick a color.
pub const BRANCH_COLORS: &[&str] = &[
    "#3b82f6", "#22c55e", "#f97316", "#a855f7", "#ef4444", "#14b8a6", "#eab308", "#ec4899",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: String,
    pub name: String,
    pub head_commit_id: Option<String>,
    pub color: String,
    pub is_main: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_branch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_commit_id: Option<String>,
}

impl Branch {
    pub fn main() -> Self {
        Self {
            id: MAIN_BRANCH_ID.to_string(),
            name: MAIN_BRANCH_NAME.to_string(),
            head_commit_id: None,
            color: BRANCH_COLORS[0].to_string(),
            is_main: true,
            parent_branch_id: None,
            origin_commit_id: None,
        }
    }

    pub fn forked(name: String, color: String, parent_branch_id: String, origin: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            head_commit_id: Some(origin.clone()),
            color,
            is_main: false,
            parent_branch_id: Some(parent_branch_id),
            origin_commit_id: Some(origin),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub parent_commit_id: Option<String>,
    pub branch_id: String,
    #[serde(default)]
    pub starred: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Commit {
    pub fn new(message: String, branch_id: String) -> Self {
        let timestamp = Utc::now();
        Self {
            id: Self::generate_id(timestamp),
            message,
            timestamp,
            parent_commit_id: None,
            branch_id,
            starred: false,
            content_hash: None,
        }
    }

    pub fn with_parent(mut self, parent: Option<String>) -> Self {
        self.parent_commit_id = parent;
        self
    }

    pub fn with_content(mut self, content: &[u8]) -> Self {
        self.content_hash = Some(hash_content(content));
        self
    }

    /// Creation time in milliseconds followed by a random hex suffix.
    fn generate_id(timestamp: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}{}", timestamp.timestamp_millis(), &suffix[..8])
    }
}

/// Persisted aggregate for one tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tree {
    pub version: u32,
    pub active_branch_id: String,
    pub current_commit_id: Option<String>,
    pub branches: Vec<Branch>,
    pub commits: Vec<Commit>,
    #[serde(default)]
    pub cloud_synced_commit_ids: BTreeSet<String>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self {
            version: TREE_VERSION,
            active_branch_id: MAIN_BRANCH_ID.to_string(),
            current_commit_id: None,
            branches: vec![Branch::main()],
            commits: Vec::new(),
            cloud_synced_commit_ids: BTreeSet::new(),
        }
    }
}

pub fn hash_content(content: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_creation() {
        let commit = Commit::new("Initial shape".to_string(), MAIN_BRANCH_ID.to_string())
            .with_content(b"solid");

        assert_eq!(commit.message, "Initial shape");
        assert_eq!(commit.branch_id, MAIN_BRANCH_ID);
        assert!(commit.parent_commit_id.is_none());
        assert!(!commit.starred);
        assert_eq!(commit.content_hash, Some(hash_content(b"solid")));
        assert!(commit
            .id
            .starts_with(&commit.timestamp.timestamp_millis().to_string()));
    }

    #[test]
    fn test_commit_ids_are_unique() {
        let a = Commit::new("a".to_string(), MAIN_BRANCH_ID.to_string());
        let b = Commit::new("b".to_string(), MAIN_BRANCH_ID.to_string());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_new_tree_has_single_main_branch() {
        let tree = Tree::new();

        assert_eq!(tree.branches.len(), 1);
        assert!(tree.branches[0].is_main);
        assert!(tree.branches[0].parent_branch_id.is_none());
        assert_eq!(tree.active_branch_id, MAIN_BRANCH_ID);
        assert!(tree.current_commit_id.is_none());
    }

    #[test]
    fn test_tree_record_uses_camel_case_keys() {
        let tree = Tree::new();
        let json = serde_json::to_value(&tree).unwrap();

        assert!(json.get("activeBranchId").is_some());
        assert!(json.get("currentCommitId").is_some());
        assert!(json["branches"][0].get("headCommitId").is_some());
        assert_eq!(json["branches"][0]["isMain"], true);
    }
}
