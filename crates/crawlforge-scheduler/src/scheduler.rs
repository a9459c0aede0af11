use chrono::Duration as ChronoDuration;
use crawlforge_extract::extract;
use crawlforge_fetch::Fetcher;
use crawlforge_rotation::RotationManager;
use crawlforge_store::Store;
use crawlforge_types::{normalize_url, CrawlError, Link, Page, Session, SessionStatus, StoreError};
use crawlforge_utils::{retry_with_backoff, BackoffConfig};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::progress;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// URLs pulled per `FetchBatch` (§4.6 default 50).
    pub batch_size: usize,
    /// A Page younger than this is skipped as `already_crawled` (default 7
    /// days).
    pub recrawl_window: ChronoDuration,
    /// How long `Drain` waits for in-flight fetches before forcing a
    /// partial commit (default 30s).
    pub drain_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            recrawl_window: ChronoDuration::days(7),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Why a `run` call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The frontier is exhausted; nothing left to crawl right now.
    Idle,
    /// A shutdown signal was observed; progress was committed (possibly
    /// partial) and the session closed.
    Drained,
}

/// Summary of one `RunBatch` pass.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Drives `LoadProgress -> FetchBatch -> RunBatch -> CommitProgress` until
/// the frontier is idle or a shutdown signal arrives (§4.6).
pub struct Scheduler {
    primary: Arc<dyn Store>,
    write_targets: HashMap<String, Arc<dyn Store>>,
    rotation: Arc<RotationManager>,
    fetcher: Arc<Fetcher>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        primary: Arc<dyn Store>,
        write_targets: HashMap<String, Arc<dyn Store>>,
        rotation: Arc<RotationManager>,
        fetcher: Arc<Fetcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            primary,
            write_targets,
            rotation,
            fetcher,
            config,
        }
    }

    /// Run the crawl loop until the frontier is exhausted or `shutdown`
    /// fires. Returns the reason the loop stopped.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<ExitReason, CrawlError> {
        let mut progress = progress::load_or_initial(self.primary.as_ref(), self.config.batch_size).await;
        self.primary.save_progress(&progress).await.map_err(CrawlError::Store)?;

        loop {
            if *shutdown.borrow() {
                return Ok(ExitReason::Drained);
            }

            let urls = self
                .primary
                .get_frontier_batch(progress.current_page, self.config.batch_size)
                .await
                .map_err(CrawlError::Store)?;

            if urls.is_empty() {
                let total = self.primary.count_frontier().await.map_err(CrawlError::Store)?;
                if total > progress.processed {
                    info!(total, processed = progress.processed, "frontier grew past known offsets, rescanning from page 1");
                    progress.current_page = 1;
                    progress.updated_at = chrono::Utc::now();
                    self.primary.save_progress(&progress).await.map_err(CrawlError::Store)?;
                    continue;
                }
                return Ok(ExitReason::Idle);
            }

            let filtered = self.filter_batch(urls).await;

            let target = match self.rotation.choose_write_target() {
                Some(handle) => handle,
                None => return Err(CrawlError::NoCapacity),
            };
            let target_store = self
                .write_targets
                .get(&target.name)
                .cloned()
                .ok_or_else(|| CrawlError::Internal(format!("no store registered for {}", target.name)))?;

            if filtered.is_empty() {
                // Every URL in the batch was filtered pre-fetch: the batch
                // is still consumed (§4.6 tie-break).
                progress.current_page += 1;
                progress.updated_at = chrono::Utc::now();
                self.primary.save_progress(&progress).await.map_err(CrawlError::Store)?;
                continue;
            }

            let session = target_store
                .create_session(serde_json::json!({"batch_size": self.config.batch_size}), &target.name, self.config.batch_size)
                .await
                .map_err(CrawlError::Store)?;

            let outcome = match self
                .run_batch(&filtered, &session, &target_store, &target.name, &mut shutdown)
                .await
            {
                Ok(outcome) => outcome,
                Err(CrawlError::NoCapacity) => {
                    let _ = target_store.end_session(session.session_id, SessionStatus::Failed).await;
                    return Err(CrawlError::NoCapacity);
                }
                Err(err) if err.aborts_batch() => {
                    let _ = target_store.end_session(session.session_id, SessionStatus::Failed).await;
                    return Err(err);
                }
                Err(err) => return Err(err),
            };

            progress.processed += (outcome.succeeded + outcome.failed) as u64;
            progress.succeeded += outcome.succeeded as u64;
            progress.failed += outcome.failed as u64;
            progress.active_session_id = Some(session.session_id);
            progress.updated_at = chrono::Utc::now();

            let drained = *shutdown.borrow();
            if !drained {
                progress.current_page += 1;
                target_store
                    .end_session(session.session_id, SessionStatus::Completed)
                    .await
                    .map_err(CrawlError::Store)?;
            } else {
                warn!(session = %session.session_id, "draining, leaving current_page unchanged for retry");
                target_store
                    .end_session(session.session_id, SessionStatus::Failed)
                    .await
                    .map_err(CrawlError::Store)?;
            }

            self.primary.save_progress(&progress).await.map_err(CrawlError::Store)?;

            if drained {
                return Ok(ExitReason::Drained);
            }
        }
    }

    /// Drop URLs that fail normalization or are already crawled within the
    /// recrawl window. These are silent skips, not failures — the batch is
    /// still consumed even if every URL drops out here (§4.6 tie-break).
    /// Robots denial is deliberately *not* filtered here: it is a
    /// `FetchResult` error kind (§4.4) surfaced by the Fetcher itself, so
    /// it still counts as a per-URL failure downstream (§8 scenario S6),
    /// not a silent skip.
    async fn filter_batch(&self, urls: Vec<String>) -> Vec<Url> {
        let mut kept = Vec::with_capacity(urls.len());
        for raw in urls {
            let normalized = match normalize_url(&raw) {
                Ok(n) => n,
                Err(err) => {
                    debug!(url = raw, error = %err, "dropping url: normalization failed");
                    continue;
                }
            };

            match self.primary.already_crawled(&normalized, self.config.recrawl_window).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    warn!(url = normalized, error = %err, "already_crawled check failed, assuming not crawled");
                }
            }

            let Ok(parsed) = Url::parse(&normalized) else {
                continue;
            };

            kept.push(parsed);
        }
        kept
    }

    /// Write one Page+Links through `target_store`, retrying `Transient`
    /// failures with backoff and re-routing to a different write target
    /// (via the Rotation Manager) on each retry, per §4.1/§7. Returns the
    /// name of the target that ultimately accepted the write; a
    /// `Permanent` failure (or a `Transient` one that outlives the retry
    /// budget) is returned as-is for the caller to classify.
    async fn write_with_retry(
        &self,
        target_name: &str,
        target_store: &Arc<dyn Store>,
        page: Page,
        links: Vec<Link>,
    ) -> Result<String, StoreError> {
        let current = RefCell::new((target_name.to_string(), target_store.clone()));
        let config = BackoffConfig::store_default();
        retry_with_backoff(
            &config,
            |err: &StoreError| {
                let retryable = matches!(err, StoreError::Transient(_));
                if retryable {
                    if let Some(handle) = self.rotation.choose_write_target() {
                        if let Some(store) = self.write_targets.get(&handle.name) {
                            *current.borrow_mut() = (handle.name.clone(), store.clone());
                        }
                    }
                }
                retryable
            },
            || {
                let (name, store) = current.borrow().clone();
                let page = page.clone();
                let links = links.clone();
                async move { store.write_page_and_links(page, links).await.map(|()| name) }
            },
        )
        .await
    }

    /// Fetch every URL in `batch` concurrently, extract, and write Page +
    /// Links through `target_store`, stopping acceptance of new work (but
    /// letting in-flight tasks finish, up to `drain_timeout`) once
    /// `shutdown` fires.
    async fn run_batch(
        &self,
        batch: &[Url],
        session: &Session,
        target_store: &Arc<dyn Store>,
        target_name: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<BatchOutcome, CrawlError> {
        let succeeded = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for url in batch {
            if *shutdown.borrow() {
                break;
            }
            let url = url.clone();
            let fetcher = self.fetcher.clone();
            let session_id = session.session_id;
            tasks.spawn(async move { fetch_and_build(fetcher, url, session_id).await });
        }

        let deadline = tokio::time::Instant::now() + self.config.drain_timeout;
        while let Some(joined) = {
            if *shutdown.borrow() {
                tokio::select! {
                    biased;
                    _ = tokio::time::sleep_until(deadline) => None,
                    res = tasks.join_next() => res,
                }
            } else {
                tasks.join_next().await
            }
        } {
            match joined {
                Ok(Some((page, links))) => {
                    let n_bytes = page.html_size as u64;
                    match self.write_with_retry(target_name, target_store, page, links).await {
                        Ok(actual_target) => {
                            succeeded.fetch_add(1, Ordering::Relaxed);
                            self.rotation.record_write(&actual_target, 1, n_bytes);
                        }
                        Err(StoreError::Permanent(msg)) => {
                            error!(error = %msg, "store write failed permanently, aborting batch");
                            tasks.abort_all();
                            return Err(CrawlError::Store(StoreError::Permanent(msg)));
                        }
                        Err(err) => {
                            error!(error = %err, "store write failed, retries exhausted");
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                Ok(None) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                }
                Err(join_err) => {
                    error!(error = %join_err, "fetch task panicked");
                    failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        tasks.abort_all();

        Ok(BatchOutcome {
            attempted: batch.len(),
            succeeded: succeeded.load(Ordering::Relaxed) as usize,
            failed: failed.load(Ordering::Relaxed) as usize,
        })
    }
}

/// Fetch one URL and, on success, turn it into a storable `(Page,
/// [Link])`. Returns `None` on fetch failure (counted as a per-URL
/// failure, never aborts the batch — §4.6).
async fn fetch_and_build(fetcher: Arc<Fetcher>, url: Url, session_id: uuid::Uuid) -> Option<(Page, Vec<Link>)> {
    let outcome = match fetcher.fetch(&url).await {
        Ok(outcome) => outcome,
        Err(err) => {
            debug!(url = %url, error = %err, "fetch failed");
            return None;
        }
    };

    let content_type = outcome
        .headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let (extracted, extracted_links) = extract(&outcome.final_url, &outcome.body.0, content_type.as_deref());

    let now = chrono::Utc::now();
    let page = Page {
        url: outcome.final_url.to_string(),
        title: extracted.title,
        cleaned_text: extracted.cleaned_text,
        html_size: extracted.html_size,
        word_count: extracted.word_count,
        http_status: outcome.http_status,
        response_time_ms: outcome.response_time_ms,
        content_hash: extracted.content_hash,
        crawled_at: now,
        session_id,
    };

    let links = extracted_links
        .into_iter()
        .map(|l| Link {
            source_url: l.source_url,
            target_url: l.target_url,
            anchor_text: l.anchor_text,
            surrounding_context: l.surrounding_context,
            is_nofollow: l.is_nofollow,
            discovered_at: now,
            session_id,
        })
        .collect();

    Some((page, links))
}
