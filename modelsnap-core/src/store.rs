use crate::error::{Error, Result};
use crate::models::Tree;
use std::collections::BTreeSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const ROOT_SUFFIX: &str = "modelsnap";
const BLOB_PREFIX: &str = "commit_";
const TREE_FILE: &str = "tree.json";

/// Blob and history storage for a single tracked file.
///
/// Everything lives in a hidden sibling directory named after the tracked
/// file, so two files in the same folder never share a root:
///
/// ```text
/// models/model.3dm
/// models/.model.3dm.modelsnap/tree.json
/// models/.model.3dm.modelsnap/commit_<id>.3dm
/// ```
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    tracked_path: PathBuf,
    root: PathBuf,
    extension: String,
}

impl SnapshotStore {
    pub fn for_tracked_file<P: AsRef<Path>>(tracked_path: P) -> Result<Self> {
        let tracked_path = tracked_path.as_ref().to_path_buf();
        let file_name = tracked_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::Validation(format!(
                    "{} does not name a file",
                    tracked_path.display()
                ))
            })?;

        let parent = tracked_path.parent().unwrap_or_else(|| Path::new(""));
        let root = parent.join(format!(".{}.{}", file_name, ROOT_SUFFIX));
        let extension = tracked_path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        Ok(Self {
            tracked_path,
            root,
            extension,
        })
    }

    pub fn tracked_path(&self) -> &Path {
        &self.tracked_path
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Creates the storage root. Returns `true` only when it did not exist yet.
    pub fn ensure_root(&self) -> Result<bool> {
        if self.root.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(&self.root)?;
        debug!("Created snapshot root {:?}", self.root);
        Ok(true)
    }

    pub fn blob_path(&self, commit_id: &str) -> Result<PathBuf> {
        validate_commit_id(commit_id)?;
        Ok(self.root.join(self.blob_file_name(commit_id)))
    }

    pub fn save_commit_blob(&self, commit_id: &str, bytes: &[u8]) -> Result<()> {
        let path = self.blob_path(commit_id)?;
        write_atomic(&path, bytes)?;
        debug!("Saved blob for commit {} ({} bytes)", commit_id, bytes.len());
        Ok(())
    }

    pub fn read_commit_blob(&self, commit_id: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(commit_id)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::BlobNotFound(commit_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn commit_blob_exists(&self, commit_id: &str) -> bool {
        self.blob_path(commit_id)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    /// Scans the root for blob files. Independent of what the tree records.
    pub fn list_commit_ids(&self) -> Result<BTreeSet<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = BTreeSet::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(id) = self.commit_id_from_file_name(&name.to_string_lossy()) {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    /// Returns the ids whose blob file is absent, in the order given.
    pub fn validate_commit_blobs<'a, I>(&self, ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let missing: Vec<String> = ids
            .into_iter()
            .filter(|id| !self.commit_blob_exists(id))
            .map(str::to_string)
            .collect();

        if !missing.is_empty() {
            warn!(
                "{} commit blob(s) missing under {:?}",
                missing.len(),
                self.root
            );
        }
        missing
    }

    pub fn tree_exists(&self) -> bool {
        self.root.join(TREE_FILE).is_file()
    }

    pub fn save_tree(&self, tree: &Tree) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(tree)?;
        write_atomic(&self.root.join(TREE_FILE), &bytes)
    }

    pub fn load_tree(&self) -> Result<Option<Tree>> {
        let bytes = match fs::read(self.root.join(TREE_FILE)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let tree: Tree = serde_json::from_slice(&bytes)?;
        tree.validate()?;
        Ok(Some(tree))
    }

    fn blob_file_name(&self, commit_id: &str) -> String {
        format!("{}{}{}", BLOB_PREFIX, commit_id, self.extension)
    }

    fn commit_id_from_file_name(&self, name: &str) -> Option<String> {
        let rest = name.strip_prefix(BLOB_PREFIX)?;
        let id = if self.extension.is_empty() {
            rest
        } else {
            rest.strip_suffix(self.extension.as_str())?
        };
        validate_commit_id(id).ok()?;
        Some(id.to_string())
    }
}

/// Commit ids become file names and remote object keys, so only a
/// conservative character set is accepted.
pub fn validate_commit_id(commit_id: &str) -> Result<()> {
    let valid = !commit_id.is_empty()
        && commit_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid commit id {:?}", commit_id)))
    }
}

/// Writes to a uniquely named temporary sibling and persists it over `path`,
/// so concurrent writers never share a temp file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir, name: &str) -> SnapshotStore {
        SnapshotStore::for_tracked_file(dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_root_is_deterministic_per_file() {
        let dir = TempDir::new().unwrap();
        let a = store_in(&dir, "model.3dm");
        let b = store_in(&dir, "model.3dm");
        let other = store_in(&dir, "other.3dm");

        assert_eq!(a.root_path(), b.root_path());
        assert_ne!(a.root_path(), other.root_path());
        assert_eq!(a.root_path(), dir.path().join(".model.3dm.modelsnap"));
    }

    #[test]
    fn test_model_file_scenario() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "model.3dm");

        assert!(!store.root_path().exists());
        assert!(store.ensure_root().unwrap());
        assert!(!store.ensure_root().unwrap());
        assert!(!store.ensure_root().unwrap());

        store.save_commit_blob("1001", b"\x00\x01mesh").unwrap();
        assert!(store.commit_blob_exists("1001"));
        assert!(store
            .root_path()
            .join("commit_1001.3dm")
            .is_file());

        let ids: Vec<String> = store.list_commit_ids().unwrap().into_iter().collect();
        assert_eq!(ids, vec!["1001".to_string()]);
    }

    #[test]
    fn test_read_missing_blob_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "model.3dm");
        store.ensure_root().unwrap();

        let err = store.read_commit_blob("404").unwrap_err();
        assert!(matches!(err, Error::BlobNotFound(id) if id == "404"));
    }

    #[test]
    fn test_blob_roundtrip_and_overwrite_free_listing() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "part.stl");
        store.ensure_root().unwrap();

        store.save_commit_blob("a1", b"first").unwrap();
        store.save_commit_blob("b2", b"second").unwrap();
        fs::write(store.root_path().join("notes.txt"), b"ignored").unwrap();
        fs::write(store.root_path().join("commit_c3.obj"), b"wrong ext").unwrap();

        assert_eq!(store.read_commit_blob("a1").unwrap(), b"first");
        let ids: Vec<String> = store.list_commit_ids().unwrap().into_iter().collect();
        assert_eq!(ids, vec!["a1".to_string(), "b2".to_string()]);
    }

    #[test]
    fn test_validate_commit_blobs_reports_missing() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "model.3dm");
        store.ensure_root().unwrap();
        store.save_commit_blob("1", b"one").unwrap();
        store.save_commit_blob("2", b"two").unwrap();

        assert!(store.validate_commit_blobs(["1", "2"]).is_empty());

        fs::remove_file(store.blob_path("2").unwrap()).unwrap();
        assert_eq!(store.validate_commit_blobs(["1", "2", "3"]), vec!["2", "3"]);
    }

    #[test]
    fn test_rejects_unsafe_commit_ids() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "model.3dm");

        assert!(matches!(
            store.save_commit_blob("../escape", b"x"),
            Err(Error::Validation(_))
        ));
        assert!(!store.commit_blob_exists(""));
    }

    #[test]
    fn test_tree_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "model.3dm");

        assert!(store.load_tree().unwrap().is_none());
        store.ensure_root().unwrap();

        let tree = Tree::new();
        store.save_tree(&tree).unwrap();
        assert!(store.tree_exists());
        assert_eq!(store.load_tree().unwrap(), Some(tree));
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("record.json");

        write_atomic(&target, b"{}").unwrap();
        write_atomic(&target, b"{\"v\":2}").unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["record.json".to_string()]);
        assert_eq!(fs::read(&target).unwrap(), b"{\"v\":2}");
    }

    #[test]
    fn test_concurrent_atomic_writes_to_one_path() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("tree.json");
        let payloads: Vec<Vec<u8>> = (0..8u8).map(|i| vec![b'a' + i; 256 * 1024]).collect();

        std::thread::scope(|scope| {
            for payload in &payloads {
                let target = &target;
                scope.spawn(move || {
                    for _ in 0..20 {
                        write_atomic(target, payload).unwrap();
                    }
                });
            }
        });

        let written = fs::read(&target).unwrap();
        assert!(payloads.iter().any(|p| *p == written));
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["tree.json".to_string()]);
    }
}
