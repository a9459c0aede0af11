//! In-memory `Store` implementation. Used by the Scheduler's scenario
//! tests (§8 S1-S6) and as a lightweight example backend; the same role
//! the teacher's in-memory `Repository` implementations play against
//! `riptide_types::ports::repository` contract tests.

use crate::{Store, StoreResult};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use crawlforge_types::{CorpusStats, DailyThroughput, DatabaseUsage, DomainScore, Link, Page, PageRankScore, Progress, Session, SessionStatus, StoreError};
use futures::stream::BoxStream;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    backlinks: Vec<(String, String)>,
    sessions: HashMap<Uuid, Session>,
    pages: Vec<Page>,
    links: Vec<Link>,
    domain_scores: HashMap<String, DomainScore>,
    pagerank_scores: HashMap<String, PageRankScore>,
    progress: Option<Progress>,
    database_usage: HashMap<String, DatabaseUsage>,
}

/// An in-memory, single-process `Store`. Not shared across instances —
/// intended for tests and local examples only.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the append-only `backlinks` frontier table (§6), simulating
    /// rows produced by the upstream ingestion pipeline.
    pub fn seed_backlinks(&self, rows: impl IntoIterator<Item = (String, String)>) {
        self.inner.lock().backlinks.extend(rows);
    }

    pub fn page_count(&self) -> usize {
        self.inner.lock().pages.len()
    }

    pub fn link_count(&self) -> usize {
        self.inner.lock().links.len()
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Seed `links` directly, bypassing `write_page_and_links`'s Page
    /// requirement. Used by Analyzer tests, which only care about the
    /// link graph.
    pub async fn seed_links(&self, links: impl IntoIterator<Item = Link>) {
        self.inner.lock().links.extend(links);
    }

    pub async fn pagerank_scores_snapshot(&self) -> Vec<PageRankScore> {
        self.inner.lock().pagerank_scores.values().cloned().collect()
    }

    pub async fn domain_scores_snapshot(&self) -> Vec<DomainScore> {
        self.inner.lock().domain_scores.values().cloned().collect()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_frontier_batch(&self, page: u64, size: usize) -> StoreResult<Vec<String>> {
        let inner = self.inner.lock();
        let mut seen = std::collections::HashSet::new();
        let mut ordered = Vec::new();
        for (source, target) in &inner.backlinks {
            for url in [source, target] {
                if seen.insert(url.clone()) {
                    ordered.push(url.clone());
                }
            }
        }
        let offset = (page.saturating_sub(1)) as usize * size;
        Ok(ordered.into_iter().skip(offset).take(size).collect())
    }

    async fn count_frontier(&self) -> StoreResult<u64> {
        let inner = self.inner.lock();
        let mut seen = std::collections::HashSet::new();
        for (source, target) in &inner.backlinks {
            seen.insert(source.clone());
            seen.insert(target.clone());
        }
        Ok(seen.len() as u64)
    }

    async fn already_crawled(&self, url: &str, recrawl_window: ChronoDuration) -> StoreResult<bool> {
        let inner = self.inner.lock();
        let cutoff = Utc::now() - recrawl_window;
        Ok(inner
            .pages
            .iter()
            .any(|p| p.url == url && p.crawled_at >= cutoff))
    }

    async fn create_session(
        &self,
        config_snapshot: serde_json::Value,
        target_db: &str,
        seed_batch_size: usize,
    ) -> StoreResult<Session> {
        let session = Session::new(seed_batch_size, config_snapshot, target_db.to_string());
        self.inner
            .lock()
            .sessions
            .insert(session.session_id, session.clone());
        Ok(session)
    }

    async fn write_page_and_links(&self, page: Page, links: Vec<Link>) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.pages.retain(|p| !(p.url == page.url && p.session_id == page.session_id));
        inner.pages.push(page);
        for link in links {
            if !inner
                .links
                .iter()
                .any(|l| l.source_url == link.source_url && l.target_url == link.target_url && l.session_id == link.session_id)
            {
                inner.links.push(link);
            }
        }
        Ok(())
    }

    async fn end_session(&self, session_id: Uuid, status: SessionStatus) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        match inner.sessions.get_mut(&session_id) {
            Some(s) => {
                s.status = status;
                s.ended_at = Some(Utc::now());
                Ok(())
            }
            None => Err(StoreError::Permanent(format!("unknown session {session_id}"))),
        }
    }

    fn iter_links(&self) -> BoxStream<'_, StoreResult<Link>> {
        let links = self.inner.lock().links.clone();
        Box::pin(futures::stream::iter(links.into_iter().map(Ok)))
    }

    async fn upsert_domain_scores(&self, scores: Vec<DomainScore>) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for s in scores {
            inner.domain_scores.insert(s.domain.clone(), s);
        }
        Ok(())
    }

    async fn upsert_pagerank_scores(&self, scores: Vec<PageRankScore>) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for s in scores {
            inner.pagerank_scores.insert(s.url.clone(), s);
        }
        Ok(())
    }

    async fn load_progress(&self) -> StoreResult<Option<Progress>> {
        Ok(self.inner.lock().progress.clone())
    }

    async fn save_progress(&self, progress: &Progress) -> StoreResult<()> {
        self.inner.lock().progress = Some(progress.clone());
        Ok(())
    }

    async fn load_database_usage(&self) -> StoreResult<Vec<DatabaseUsage>> {
        Ok(self.inner.lock().database_usage.values().cloned().collect())
    }

    async fn save_database_usage(&self, usage: &[DatabaseUsage]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for u in usage {
            inner.database_usage.insert(u.name.clone(), u.clone());
        }
        Ok(())
    }

    async fn stats(&self) -> StoreResult<CorpusStats> {
        let inner = self.inner.lock();
        let total_pages = inner.pages.len() as u64;
        let total_links = inner.links.len() as u64;
        let successful = inner
            .pages
            .iter()
            .filter(|p| (200..300).contains(&p.http_status))
            .count() as u64;
        let success_rate = if total_pages == 0 {
            0.0
        } else {
            successful as f64 / total_pages as f64
        };

        let mut by_day: HashMap<chrono::NaiveDate, u64> = HashMap::new();
        for page in &inner.pages {
            *by_day.entry(page.crawled_at.date_naive()).or_insert(0) += 1;
        }
        let mut daily_throughput: Vec<DailyThroughput> = by_day
            .into_iter()
            .map(|(date, pages_crawled)| DailyThroughput { date, pages_crawled })
            .collect();
        daily_throughput.sort_by_key(|d| d.date);

        Ok(CorpusStats {
            total_pages,
            total_links,
            success_rate,
            daily_throughput,
        })
    }
}
