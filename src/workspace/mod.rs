//! Durable workspace storage.
//!
//! A workspace is one SQLite file holding:
//!
//! * every scanned file with its size, modification time and hashes,
//! * the scan roots configured for it,
//! * a summary row recomputed after each scan.
//!
//! # Architecture
//!
//! * [`database`]: schema management, migrations and all reads and writes.
//! * [`entry`]: the record types stored in a workspace.
//! * [`recent`]: the list of recently opened workspaces, kept outside any
//!   single workspace.

pub mod database;
pub mod entry;
pub mod recent;

pub use database::{StoreError, StoreResult, WorkspaceStore, SCHEMA_VERSION};
pub use entry::{DirectoryEntry, FileRecord, FileStatus, WorkspaceStats};
pub use recent::{RecentEntry, RecentWorkspaces};
