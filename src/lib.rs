//! dedup - incremental duplicate file finder
//!
//! Scans directory trees into a persistent SQLite workspace, fingerprints
//! files with XXH64 and confirms duplicates with BLAKE3. Rescans reuse the
//! fingerprints of unchanged files.
//!
//! The [`engine::Engine`] is the entry point for library users; the `dedup`
//! binary is a thin CLI over it.

pub mod app;
pub mod cli;
pub mod config;
pub mod duplicates;
pub mod engine;
pub mod error;
pub mod logging;
pub mod progress;
pub mod scanner;
pub mod signal;
pub mod workspace;

pub use app::run_app;
