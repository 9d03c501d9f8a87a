//! Tree Transfer Library
//!
//! Copies a file tree between the local filesystem and a remote tree store:
//! - Crawling local (walkdir) and remote (bulk listing) trees
//! - Destination resolution and rename detection
//! - Batched directory creation
//! - Bounded-concurrency file copies with size-dependent upload strategies
//! - Progress indicators rendered with indicatif
//! - Dry-run capabilities

pub mod crawler;
pub mod engine;
pub mod error;
pub mod node;
pub mod plan;
pub mod planner;
pub mod progress;
pub mod session;
pub mod target;

// Re-export main types and functions
pub use crawler::Crawler;
pub use engine::TransferEngine;
pub use error::{Result, TransferError};
pub use node::{LocalPath, Node, NodePath, Origin, RemotePath, TreePath, REMOTE_PREFIX};
pub use plan::{TransferPlan, TransferReport};
pub use planner::DirectoryPlanner;
pub use progress::{format_bytes, Indicator, IndicatorPool, ProgressReader};
pub use session::{TransferOptions, TransferSession};
pub use target::{detect_rename, resolve_target};

/// Copy `source` to `target`, exactly one of them being remote.
///
/// `rename` forces or forbids renaming; `None` decides from the current
/// state of `target`.
pub async fn transfer_tree(
    session: &TransferSession,
    source: &NodePath,
    target: &NodePath,
    rename: Option<bool>,
) -> Result<TransferReport> {
    let plan = TransferPlan::build(session, source, target, rename).await?;
    plan.execute(session).await
}
