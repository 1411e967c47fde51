//! # modelsnap-server
//!
//! Reference cloud store for modelsnap: issues per-object transfer grants and
//! serves the uploaded tree records and snapshot blobs.

pub mod api;
pub mod objects;
pub mod server;

pub use objects::ObjectStore;
pub use server::RemoteServer;
