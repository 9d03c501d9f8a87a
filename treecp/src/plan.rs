//! Transfer plans and their reports

use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::crawler::Crawler;
use crate::engine::TransferEngine;
use crate::error::{Result, TransferError};
use crate::node::{Node, NodePath};
use crate::planner::DirectoryPlanner;
use crate::progress::{format_bytes, IndicatorPool};
use crate::session::TransferSession;
use crate::target::{detect_rename, resolve_target};

/// Everything needed to run one copy, computed before anything is written
#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub source_root: Node,
    pub target_root: Node,
    pub nodes: Vec<Node>,
    pub rename: bool,
}

impl TransferPlan {
    /// Crawl `source` and resolve where it lands below `target`.
    ///
    /// When `rename` is `None` the decision follows the existing state of
    /// `target`.
    pub async fn build(
        session: &TransferSession,
        source: &NodePath,
        target: &NodePath,
        rename: Option<bool>,
    ) -> Result<Self> {
        if source.origin() == target.origin() {
            return Err(TransferError::Unsupported(format!(
                "both {} and {} are {}, exactly one side must be remote",
                source,
                target,
                source.origin()
            )));
        }

        let crawler = Crawler::new(session.store().clone());
        let source_root = crawler.root(source).await?;
        let rename = match rename {
            Some(rename) => rename,
            None => detect_rename(session, &source_root, target).await?,
        };
        let nodes = crawler.walk(&source_root, None).await?;
        let target_root = resolve_target(target, &source_root, rename);

        info!(
            "Planned {} -> {} ({} entries, {})",
            source,
            target_root.path(),
            nodes.len(),
            format_bytes(nodes.iter().map(Node::size).sum())
        );
        Ok(Self {
            source_root,
            target_root,
            nodes,
            rename,
        })
    }

    pub fn directory_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_dir()).count()
    }

    pub fn file_count(&self) -> usize {
        self.nodes.len() - self.directory_count()
    }

    pub fn total_bytes(&self) -> u64 {
        self.nodes.iter().filter(|node| !node.is_dir()).map(Node::size).sum()
    }

    /// Create directories, then copy files.
    ///
    /// Planning failures abort the run; per-file failures end up in the report.
    pub async fn execute(&self, session: &TransferSession) -> Result<TransferReport> {
        let started = Instant::now();
        let options = session.options();
        let pool = IndicatorPool::new(
            self.nodes.len() > 1,
            self.nodes.len() as u64,
            session.queue_size(),
        );
        pool.start(options.refresh_interval, options.quiet);

        if self.source_root.is_dir() {
            let planned = DirectoryPlanner::new(session.clone())
                .ensure_directories(&self.target_root, &self.nodes, &pool)
                .await;
            if let Err(e) = planned {
                pool.stop().await;
                return Err(e);
            }
        }

        let errors = TransferEngine::new(session.clone())
            .copy_all(&self.target_root, &self.nodes, &pool)
            .await;
        pool.stop().await;

        let report = TransferReport {
            directories: self.directory_count(),
            files: self.file_count(),
            bytes: self.total_bytes(),
            elapsed: started.elapsed(),
            dry_run: session.dry_run(),
            errors,
        };
        if report.is_successful() {
            info!("{}", report);
        } else {
            warn!("{}", report);
        }
        Ok(report)
    }
}

/// Outcome of one transfer
#[derive(Debug)]
pub struct TransferReport {
    pub directories: usize,
    pub files: usize,
    pub bytes: u64,
    pub elapsed: Duration,
    pub dry_run: bool,
    pub errors: Vec<TransferError>,
}

impl TransferReport {
    pub fn is_successful(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn failed_files(&self) -> usize {
        self.errors.len()
    }
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} files ({}) and {} directories in {:.2}s, {} failed",
            if self.dry_run { "[dry run] " } else { "" },
            self.files,
            format_bytes(self.bytes),
            self.directories,
            self.elapsed.as_secs_f64(),
            self.failed_files()
        )
    }
}
