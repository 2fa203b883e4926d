//! Scriptwatch Store - Versioned snapshot history per target

pub mod diff;
pub mod git;
pub mod memory;
pub mod store;

pub use diff::line_diff;
pub use git::{target_dir_name, GitStore, COMBINED_FILE, DEFAULT_SNAPSHOT_ROOT};
pub use memory::MemoryStore;
pub use store::{
    CommitOutcome, Revision, RevisionId, RevisionPage, StoreError, StoreResult, VersionStore,
};
