//! # modelsnap-core
//!
//! Core library for modelsnap - local version control for binary 3D model files.
//!
//! This crate provides the commit/branch tree, the on-disk snapshot store next
//! to each tracked file, the external change monitor, and the reconciler that
//! keeps local history in step with a cloud object store.

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod remote;
pub mod session;
pub mod store;
pub mod sync;
pub mod tree;
pub mod watcher;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use events::SessionEvent;
pub use models::{Branch, Commit, Tree};
pub use remote::{
    MemoryRemote, RemoteObject, RemoteStore, StaticToken, TokenSupplier, TransferDirection,
    TransferRequest, TransferTarget,
};
pub use session::{OpenReport, ProjectSession, PullReport};
pub use store::SnapshotStore;
pub use sync::{compute_sync_status, Reconciler, RetryPolicy, SyncStatus};
pub use watcher::{ChangeEvent, ChangeMonitor, MonitorState};
