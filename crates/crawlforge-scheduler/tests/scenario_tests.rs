use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use crawlforge_fetch::{Fetcher, FetcherConfig};
use crawlforge_robots::{RobotsCache, RobotsConfig};
use crawlforge_rotation::RotationManager;
use crawlforge_scheduler::{ExitReason, Scheduler, SchedulerConfig};
use crawlforge_store::memory::InMemoryStore;
use crawlforge_store::{Store, StoreResult};
use crawlforge_types::{
    content_hash, CorpusStats, DatabaseStatus, DatabaseUsage, DomainScore, Link, Page, PageRankScore, Progress, Session, SessionStatus, StoreError,
};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn healthy_db(name: &str) -> DatabaseUsage {
    DatabaseUsage {
        name: name.to_string(),
        url: format!("postgres://{name}"),
        auth_token: "tok".into(),
        bytes_used: 0,
        storage_quota_bytes: 1_000_000_000,
        writes_this_month: 0,
        monthly_write_limit: 1_000_000,
        last_health_check: Utc::now(),
        status: DatabaseStatus::Healthy,
    }
}

fn fast_fetcher_config() -> FetcherConfig {
    FetcherConfig {
        global_concurrency: 10,
        per_host_concurrency: 10,
        min_host_delay: Duration::from_millis(5),
        per_request_timeout: Duration::from_secs(5),
        per_url_budget: Duration::from_secs(10),
        respect_robots: false,
        ..Default::default()
    }
}

/// Wraps an `InMemoryStore`, failing the first `fail_count` calls to
/// `write_page_and_links` with `kind` before delegating to `inner` as
/// normal. Exercises the Scheduler's `write_with_retry` path without a
/// real database.
struct FaultyStore {
    inner: Arc<InMemoryStore>,
    fail_count: AtomicU32,
    kind: StoreError,
}

impl FaultyStore {
    fn new(inner: Arc<InMemoryStore>, fail_count: u32, kind: StoreError) -> Self {
        Self {
            inner,
            fail_count: AtomicU32::new(fail_count),
            kind,
        }
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn get_frontier_batch(&self, page: u64, size: usize) -> StoreResult<Vec<String>> {
        self.inner.get_frontier_batch(page, size).await
    }

    async fn count_frontier(&self) -> StoreResult<u64> {
        self.inner.count_frontier().await
    }

    async fn already_crawled(&self, url: &str, recrawl_window: ChronoDuration) -> StoreResult<bool> {
        self.inner.already_crawled(url, recrawl_window).await
    }

    async fn create_session(
        &self,
        config_snapshot: serde_json::Value,
        target_db: &str,
        seed_batch_size: usize,
    ) -> StoreResult<Session> {
        self.inner.create_session(config_snapshot, target_db, seed_batch_size).await
    }

    async fn write_page_and_links(&self, page: Page, links: Vec<Link>) -> StoreResult<()> {
        let remaining = self
            .fail_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if remaining.is_ok() {
            return Err(self.kind.clone());
        }
        self.inner.write_page_and_links(page, links).await
    }

    async fn end_session(&self, session_id: Uuid, status: SessionStatus) -> StoreResult<()> {
        self.inner.end_session(session_id, status).await
    }

    fn iter_links(&self) -> BoxStream<'_, StoreResult<Link>> {
        self.inner.iter_links()
    }

    async fn upsert_domain_scores(&self, scores: Vec<DomainScore>) -> StoreResult<()> {
        self.inner.upsert_domain_scores(scores).await
    }

    async fn upsert_pagerank_scores(&self, scores: Vec<PageRankScore>) -> StoreResult<()> {
        self.inner.upsert_pagerank_scores(scores).await
    }

    async fn load_progress(&self) -> StoreResult<Option<Progress>> {
        self.inner.load_progress().await
    }

    async fn save_progress(&self, progress: &Progress) -> StoreResult<()> {
        self.inner.save_progress(progress).await
    }

    async fn load_database_usage(&self) -> StoreResult<Vec<DatabaseUsage>> {
        self.inner.load_database_usage().await
    }

    async fn save_database_usage(&self, usage: &[DatabaseUsage]) -> StoreResult<()> {
        self.inner.save_database_usage(usage).await
    }

    async fn stats(&self) -> StoreResult<CorpusStats> {
        self.inner.stats().await
    }
}

/// S1 — empty frontier: Progress is created at `current_page=1,
/// processed=0`, no sessions are created, and a shutdown drains cleanly.
#[tokio::test]
async fn s1_empty_frontier() {
    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let rotation = Arc::new(RotationManager::new(vec![healthy_db("primary")]));
    let fetcher = Arc::new(Fetcher::new(fast_fetcher_config(), None).unwrap());
    let mut targets: HashMap<String, Arc<dyn Store>> = HashMap::new();
    targets.insert("primary".to_string(), store.clone());

    let scheduler = Scheduler::new(store.clone(), targets, rotation, fetcher, SchedulerConfig::default());
    let (_tx, rx) = tokio::sync::watch::channel(false);

    let exit = scheduler.run(rx).await.unwrap();
    assert_eq!(exit, ExitReason::Idle);
    assert_eq!(store.session_count(), 0);

    let progress = store.load_progress().await.unwrap().unwrap();
    assert_eq!(progress.current_page, 1);
    assert_eq!(progress.processed, 0);
}

/// S2 — single batch happy path: 50 seeded URLs, each serving HTML with 3
/// links, all land as Pages with their links, and Progress advances.
#[tokio::test]
async fn s2_single_batch_happy_path() {
    let mock_server = MockServer::start().await;
    let html = format!(
        r#"<html><head><title>Page</title></head><body>
            <p>Some content with outbound links.</p>
            <a href="{base}/other-a">A</a>
            <a href="{base}/other-b">B</a>
            <a href="{base}/other-c">C</a>
        </body></html>"#,
        base = mock_server.uri()
    );
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(html).insert_header("content-type", "text/html"))
        .mount(&mock_server)
        .await;

    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let seeds: Vec<(String, String)> = (0..50)
        .map(|i| {
            let u = format!("{}/page/{}", mock_server.uri(), i);
            (u.clone(), u)
        })
        .collect();
    store.seed_backlinks(seeds);

    let rotation = Arc::new(RotationManager::new(vec![healthy_db("primary")]));
    let fetcher = Arc::new(Fetcher::new(fast_fetcher_config(), None).unwrap());
    let mut targets: HashMap<String, Arc<dyn Store>> = HashMap::new();
    targets.insert("primary".to_string(), store.clone());

    let scheduler = Scheduler::new(store.clone(), targets, rotation, fetcher, SchedulerConfig::default());
    let (_tx, rx) = tokio::sync::watch::channel(false);

    let exit = scheduler.run(rx).await.unwrap();
    assert_eq!(exit, ExitReason::Idle);

    assert_eq!(store.page_count(), 50);
    assert_eq!(store.link_count(), 150);

    let progress = store.load_progress().await.unwrap().unwrap();
    assert_eq!(progress.current_page, 2);
    assert_eq!(progress.processed, 50);
    assert_eq!(progress.succeeded, 50);
    assert_eq!(progress.failed, 0);
}

/// S3 — mixed failures: 10 URLs return 500 (retried 3x then given up on),
/// 5 return 404 (never retried), 35 succeed. Expect 35 Pages, a
/// `succeeded=35, failed=15` split, and `current_page` still advancing.
#[tokio::test]
async fn s3_mixed_failures() {
    let mock_server = MockServer::start().await;
    let html = r#"<html><head><title>Page</title></head><body><p>ok</p></body></html>"#;

    for i in 0..10 {
        Mock::given(method("GET"))
            .and(path(format!("/page/{i}")))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;
    }
    for i in 10..15 {
        Mock::given(method("GET"))
            .and(path(format!("/page/{i}")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
    }
    for i in 15..50 {
        Mock::given(method("GET"))
            .and(path(format!("/page/{i}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(html).insert_header("content-type", "text/html"))
            .mount(&mock_server)
            .await;
    }

    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let seeds: Vec<(String, String)> = (0..50)
        .map(|i| {
            let u = format!("{}/page/{}", mock_server.uri(), i);
            (u.clone(), u)
        })
        .collect();
    store.seed_backlinks(seeds);

    let rotation = Arc::new(RotationManager::new(vec![healthy_db("primary")]));
    let fetcher = Arc::new(Fetcher::new(fast_fetcher_config(), None).unwrap());
    let mut targets: HashMap<String, Arc<dyn Store>> = HashMap::new();
    targets.insert("primary".to_string(), store.clone());

    let scheduler = Scheduler::new(store.clone(), targets, rotation, fetcher, SchedulerConfig::default());
    let (_tx, rx) = tokio::sync::watch::channel(false);

    let exit = scheduler.run(rx).await.unwrap();
    assert_eq!(exit, ExitReason::Idle);

    assert_eq!(store.page_count(), 35);
    let progress = store.load_progress().await.unwrap().unwrap();
    assert_eq!(progress.current_page, 2);
    assert_eq!(progress.succeeded, 35);
    assert_eq!(progress.failed, 15);
}

/// S4 — crash mid-batch: simulate a prior run that crashed after writing
/// 27 of 50 Pages directly (bypassing the Scheduler) without ever
/// advancing `current_page`. A fresh run must replay the whole batch,
/// skip the 27 already-crawled URLs via `already_crawled`, and still end
/// up with the full union of 50 Pages and `current_page=2`.
#[tokio::test]
async fn s4_crash_mid_batch() {
    let mock_server = MockServer::start().await;
    let html = r#"<html><head><title>Page</title></head><body><p>ok</p></body></html>"#;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(html).insert_header("content-type", "text/html"))
        .mount(&mock_server)
        .await;

    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let seeds: Vec<(String, String)> = (0..50)
        .map(|i| {
            let u = format!("{}/page/{}", mock_server.uri(), i);
            (u.clone(), u)
        })
        .collect();
    store.seed_backlinks(seeds);

    for i in 0..27 {
        let url = format!("{}/page/{}", mock_server.uri(), i);
        let page = Page {
            url,
            title: Some("Page".to_string()),
            cleaned_text: "ok".to_string(),
            html_size: html.len(),
            word_count: 1,
            http_status: 200,
            response_time_ms: 5,
            content_hash: content_hash("ok"),
            crawled_at: Utc::now(),
            session_id: Uuid::new_v4(),
        };
        store.write_page_and_links(page, vec![]).await.unwrap();
    }

    let rotation = Arc::new(RotationManager::new(vec![healthy_db("primary")]));
    let fetcher = Arc::new(Fetcher::new(fast_fetcher_config(), None).unwrap());
    let mut targets: HashMap<String, Arc<dyn Store>> = HashMap::new();
    targets.insert("primary".to_string(), store.clone());

    let scheduler = Scheduler::new(store.clone(), targets, rotation, fetcher, SchedulerConfig::default());
    let (_tx, rx) = tokio::sync::watch::channel(false);

    let exit = scheduler.run(rx).await.unwrap();
    assert_eq!(exit, ExitReason::Idle);

    assert_eq!(store.page_count(), 50);
    let progress = store.load_progress().await.unwrap().unwrap();
    assert_eq!(progress.current_page, 2);
    assert_eq!(progress.succeeded, 23);
    assert_eq!(progress.failed, 0);
}

/// S5 — rotation under load: DB-A at 84% of its monthly write limit,
/// DB-B at 20%. A 50-write batch must land entirely on DB-B, since the
/// whole batch is written through the single target chosen at batch
/// start and DB-B stays the lower-usage pick throughout.
#[tokio::test]
async fn s5_rotation_under_load() {
    let mock_server = MockServer::start().await;
    let html = r#"<html><head><title>Page</title></head><body><p>ok</p></body></html>"#;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(html).insert_header("content-type", "text/html"))
        .mount(&mock_server)
        .await;

    let primary: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let seeds: Vec<(String, String)> = (0..50)
        .map(|i| {
            let u = format!("{}/page/{}", mock_server.uri(), i);
            (u.clone(), u)
        })
        .collect();
    primary.seed_backlinks(seeds);

    let db_a: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let db_b: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());

    let usage_a = DatabaseUsage {
        name: "db-a".to_string(),
        url: "postgres://db-a".to_string(),
        auth_token: "tok".into(),
        bytes_used: 0,
        storage_quota_bytes: 1_000_000_000,
        writes_this_month: 840,
        monthly_write_limit: 1000,
        last_health_check: Utc::now(),
        status: DatabaseStatus::Healthy,
    };
    let usage_b = DatabaseUsage {
        name: "db-b".to_string(),
        url: "postgres://db-b".to_string(),
        writes_this_month: 200,
        ..usage_a.clone()
    };

    let rotation = Arc::new(RotationManager::new(vec![usage_a, usage_b]));
    let fetcher = Arc::new(Fetcher::new(fast_fetcher_config(), None).unwrap());
    let mut targets: HashMap<String, Arc<dyn Store>> = HashMap::new();
    targets.insert("db-a".to_string(), db_a.clone());
    targets.insert("db-b".to_string(), db_b.clone());

    let scheduler = Scheduler::new(primary.clone(), targets, rotation, fetcher, SchedulerConfig::default());
    let (_tx, rx) = tokio::sync::watch::channel(false);

    let exit = scheduler.run(rx).await.unwrap();
    assert_eq!(exit, ExitReason::Idle);

    assert_eq!(db_b.page_count(), 50);
    assert_eq!(db_a.page_count(), 0);
}

/// A `Transient` write failure is retried with backoff via
/// `write_with_retry` (consulting `rotation.choose_write_target()` on
/// each retry per §4.1/§7) rather than counted as an immediate failure;
/// once the underlying store recovers, the write still lands and
/// `succeeded` reflects it (closing the gap S3/S6 don't cover: failures
/// in the *write* stage rather than the *fetch* stage).
#[tokio::test]
async fn transient_write_failure_is_retried_until_it_succeeds() {
    let mock_server = MockServer::start().await;
    let html = r#"<html><head><title>Page</title></head><body><p>ok</p></body></html>"#;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(html).insert_header("content-type", "text/html"))
        .mount(&mock_server)
        .await;

    let backing: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let url = format!("{}/only", mock_server.uri());
    backing.seed_backlinks([(url.clone(), url)]);

    // Fails the first write with a Transient error, then delegates.
    let faulty: Arc<dyn Store> = Arc::new(FaultyStore::new(
        backing.clone(),
        1,
        StoreError::Transient("connection reset".to_string()),
    ));

    let rotation = Arc::new(RotationManager::new(vec![healthy_db("primary")]));
    let fetcher = Arc::new(Fetcher::new(fast_fetcher_config(), None).unwrap());
    let mut targets: HashMap<String, Arc<dyn Store>> = HashMap::new();
    targets.insert("primary".to_string(), faulty);

    let scheduler = Scheduler::new(backing.clone(), targets, rotation, fetcher, SchedulerConfig::default());
    let (_tx, rx) = tokio::sync::watch::channel(false);

    let exit = scheduler.run(rx).await.unwrap();
    assert_eq!(exit, ExitReason::Idle);

    assert_eq!(backing.page_count(), 1);
    let progress = backing.load_progress().await.unwrap().unwrap();
    assert_eq!(progress.succeeded, 1);
    assert_eq!(progress.failed, 0);
}

/// A Permanent store error aborts the batch outright: no Page is
/// written, no progress increment happens, and `run` surfaces the error
/// instead of completing the batch.
#[tokio::test]
async fn permanent_write_failure_aborts_batch() {
    let mock_server = MockServer::start().await;
    let html = r#"<html><head><title>Page</title></head><body><p>ok</p></body></html>"#;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(html).insert_header("content-type", "text/html"))
        .mount(&mock_server)
        .await;

    let backing: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let url = format!("{}/only", mock_server.uri());
    backing.seed_backlinks([(url.clone(), url)]);

    let faulty: Arc<dyn Store> = Arc::new(FaultyStore::new(
        backing.clone(),
        u32::MAX,
        StoreError::Permanent("disk full".to_string()),
    ));

    let rotation = Arc::new(RotationManager::new(vec![healthy_db("primary")]));
    let fetcher = Arc::new(Fetcher::new(fast_fetcher_config(), None).unwrap());
    let mut targets: HashMap<String, Arc<dyn Store>> = HashMap::new();
    targets.insert("primary".to_string(), faulty);

    let scheduler = Scheduler::new(backing.clone(), targets, rotation, fetcher, SchedulerConfig::default());
    let (_tx, rx) = tokio::sync::watch::channel(false);

    let err = scheduler.run(rx).await.unwrap_err();
    assert!(err.aborts_batch());

    assert_eq!(backing.page_count(), 0);
    let progress = backing.load_progress().await.unwrap().unwrap();
    assert_eq!(progress.current_page, 1);
    assert_eq!(progress.processed, 0);
}

/// S6 — robots denial: a single URL whose origin disallows everything
/// never gets fetched, counts as a failure, and `current_page` still
/// advances.
#[tokio::test]
async fn s6_robots_denial() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"))
        .mount(&mock_server)
        .await;

    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let target_url = format!("{}/secret", mock_server.uri());
    store.seed_backlinks([(target_url.clone(), target_url)]);

    let robots = Arc::new(RobotsCache::new(RobotsConfig::default()).unwrap());
    let fetcher_config = FetcherConfig {
        respect_robots: true,
        min_host_delay: Duration::from_millis(5),
        ..Default::default()
    };
    let fetcher = Arc::new(Fetcher::new(fetcher_config, Some(robots)).unwrap());

    let rotation = Arc::new(RotationManager::new(vec![healthy_db("primary")]));
    let mut targets: HashMap<String, Arc<dyn Store>> = HashMap::new();
    targets.insert("primary".to_string(), store.clone());

    let scheduler = Scheduler::new(store.clone(), targets, rotation, fetcher, SchedulerConfig::default());
    let (_tx, rx) = tokio::sync::watch::channel(false);

    let exit = scheduler.run(rx).await.unwrap();
    assert_eq!(exit, ExitReason::Idle);

    assert_eq!(store.page_count(), 0);
    let progress = store.load_progress().await.unwrap().unwrap();
    assert_eq!(progress.current_page, 2);
    assert_eq!(progress.succeeded, 0);
    assert_eq!(progress.failed, 1);
}
