//! # CrawlForge Store
//!
//! The Store contract (§4.1): typed persistence for pages, backlinks,
//! sessions, domain/PageRank scores, and progress checkpoints, with a
//! Postgres-backed implementation and an in-memory double used by tests.
//!
//! Mirrors the teacher's repository-port split
//! (`riptide-persistence::adapters::postgres_repository` behind
//! `riptide_types::ports::Repository`): a single `async_trait` here, two
//! implementations behind it, domain logic in `crawlforge-scheduler` never
//! sees SQL.

pub mod memory;
pub mod postgres;
pub mod schema;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use crawlforge_types::{CorpusStats, DatabaseUsage, DomainScore, Link, Page, PageRankScore, Progress, Session, SessionStatus, StoreError};
use futures::stream::BoxStream;
use uuid::Uuid;

/// Result alias for Store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// The Store contract, backend-agnostic (§4.1).
#[async_trait]
pub trait Store: Send + Sync {
    /// Union of `source_url`/`target_url` from the backlinks table,
    /// deduplicated, ordered by insertion id, paginated with
    /// `LIMIT size OFFSET (page-1)*size`. Ordering is stable across calls.
    async fn get_frontier_batch(&self, page: u64, size: usize) -> StoreResult<Vec<String>>;

    /// Total distinct URLs in the frontier.
    async fn count_frontier(&self) -> StoreResult<u64>;

    /// True if a Page exists for `url` within `recrawl_window`.
    async fn already_crawled(&self, url: &str, recrawl_window: ChronoDuration) -> StoreResult<bool>;

    /// Create and persist a new Session, returning it.
    async fn create_session(
        &self,
        config_snapshot: serde_json::Value,
        target_db: &str,
        seed_batch_size: usize,
    ) -> StoreResult<Session>;

    /// Write a Page and its extracted Links as one atomic unit (all-or-
    /// nothing for this URL).
    async fn write_page_and_links(&self, page: Page, links: Vec<Link>) -> StoreResult<()>;

    /// Close a session with a terminal status.
    async fn end_session(&self, session_id: Uuid, status: SessionStatus) -> StoreResult<()>;

    /// Lazily stream every Link in the corpus, for the Analyzer. Must not
    /// materialize the whole graph eagerly when the backend can stream.
    fn iter_links(&self) -> BoxStream<'_, StoreResult<Link>>;

    async fn upsert_domain_scores(&self, scores: Vec<DomainScore>) -> StoreResult<()>;
    async fn upsert_pagerank_scores(&self, scores: Vec<PageRankScore>) -> StoreResult<()>;

    /// Read the singleton Progress row. `None` means no checkpoint has
    /// ever been committed (fresh start, not malformed — see
    /// `crawlforge-scheduler::progress` for the malformed-data fallback).
    async fn load_progress(&self) -> StoreResult<Option<Progress>>;

    /// Atomically overwrite the singleton Progress row.
    async fn save_progress(&self, progress: &Progress) -> StoreResult<()>;

    /// Periodic flush target for Rotation Manager's in-memory counters.
    async fn load_database_usage(&self) -> StoreResult<Vec<DatabaseUsage>>;
    async fn save_database_usage(&self, usage: &[DatabaseUsage]) -> StoreResult<()>;

    /// Aggregated counters for the Monitoring API's `/stats` (§4.9).
    async fn stats(&self) -> StoreResult<CorpusStats>;
}
