//! # modelsnap
//!
//! Snapshot version control for binary 3D model files: a commit/branch tree per
//! tracked file, a local snapshot store, an external change monitor and a cloud
//! synchronization reconciler.

pub use modelsnap_core as core;
pub use modelsnap_sdk as sdk;
pub use modelsnap_server as server;
