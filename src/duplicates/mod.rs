//! Duplicate detection module.
//!
//! This module provides functionality for:
//! - Fingerprint hashing of discovered files with resume support
//! - Fingerprint grouping (potential duplicates)
//! - Confirmation hashing (confirmed duplicates)
//! - Duplicate group management

pub mod groups;
pub mod pipeline;
pub mod resolver;

pub use groups::{
    confirm_group, group_by_fingerprint, sort_groups, DuplicateGroup, GroupingStats,
    PotentialGroup,
};
pub use pipeline::{
    estimate_remaining, HashFailure, HashReport, HashingPipeline, PipelineConfig, PipelineError,
    DEFAULT_COMMIT_BATCH, DEFAULT_LARGE_FILE_THRESHOLD,
};
pub use resolver::{DuplicateResolver, ResolveError, ResolveReport, ResolverConfig};
