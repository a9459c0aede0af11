//! Postgres-backed `Store` implementation.
//!
//! Grounded on `riptide-persistence::adapters::postgres_repository`: a
//! connection pool wrapped in `Arc`, `#[instrument]`ed public methods, and
//! SQL errors translated into the crate's own error type at the boundary
//! so nothing above this module ever sees `sqlx::Error`.

use crate::{Store, StoreResult};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use crawlforge_types::{
    CorpusStats, DailyThroughput, DatabaseStatus, DatabaseUsage, DomainScore, Link, Page,
    PageRankScore, Progress, Session, SessionStatus, StoreError,
};
use futures::stream::BoxStream;
use futures::TryStreamExt;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Apply the logical schema (§6). Idempotent; safe to call on every
    /// boot.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(crate::schema::SCHEMA_SQL)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Classify a `sqlx::Error` as transient (worth retrying / rotating away
/// from) or permanent (abort the batch), per §7.
fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Transient(err.to_string())
        }
        sqlx::Error::Database(db_err) => {
            // Constraint violations indicate a logic/schema problem, not a
            // transient backend hiccup.
            if db_err.is_unique_violation() || db_err.is_check_violation() {
                StoreError::Permanent(err.to_string())
            } else {
                StoreError::Transient(err.to_string())
            }
        }
        _ => StoreError::Permanent(err.to_string()),
    }
}

fn status_to_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "active",
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
    }
}

fn db_status_to_str(status: DatabaseStatus) -> &'static str {
    match status {
        DatabaseStatus::Healthy => "healthy",
        DatabaseStatus::Warning => "warning",
        DatabaseStatus::Critical => "critical",
        DatabaseStatus::Down => "down",
    }
}

fn db_status_from_str(s: &str) -> DatabaseStatus {
    match s {
        "warning" => DatabaseStatus::Warning,
        "critical" => DatabaseStatus::Critical,
        "down" => DatabaseStatus::Down,
        _ => DatabaseStatus::Healthy,
    }
}

#[async_trait]
impl Store for PostgresStore {
    #[instrument(skip(self))]
    async fn get_frontier_batch(&self, page: u64, size: usize) -> StoreResult<Vec<String>> {
        let offset = (page.saturating_sub(1)) as i64 * size as i64;
        let rows = sqlx::query(
            r#"
            SELECT url FROM (
                SELECT id, source_url AS url FROM backlinks
                UNION ALL
                SELECT id, target_url AS url FROM backlinks
            ) u
            GROUP BY url
            ORDER BY MIN(id)
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(size as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        Ok(rows.into_iter().map(|r| r.get::<String, _>("url")).collect())
    }

    async fn count_frontier(&self) -> StoreResult<u64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM (
                SELECT source_url AS url FROM backlinks
                UNION
                SELECT target_url AS url FROM backlinks
            ) u
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    async fn already_crawled(&self, url: &str, recrawl_window: ChronoDuration) -> StoreResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM pages
                WHERE url = $1 AND crawled_at >= now() - make_interval(secs => $2)
            ) AS exists_flag
            "#,
        )
        .bind(url)
        .bind(recrawl_window.num_seconds() as f64)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;
        Ok(row.get("exists_flag"))
    }

    async fn create_session(
        &self,
        config_snapshot: serde_json::Value,
        target_db: &str,
        seed_batch_size: usize,
    ) -> StoreResult<Session> {
        let session = Session::new(seed_batch_size, config_snapshot, target_db.to_string());
        sqlx::query(
            r#"
            INSERT INTO sessions (id, started_at, ended_at, status, config_json, target_db, seed_batch_size)
            VALUES ($1, $2, NULL, $3, $4, $5, $6)
            "#,
        )
        .bind(session.session_id)
        .bind(session.started_at)
        .bind(status_to_str(session.status))
        .bind(&session.config_snapshot)
        .bind(&session.target_db)
        .bind(session.seed_batch_size as i64)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        debug!(session_id = %session.session_id, "session created");
        Ok(session)
    }

    #[instrument(skip(self, page, links), fields(url = %page.url))]
    async fn write_page_and_links(&self, page: Page, links: Vec<Link>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        sqlx::query(
            r#"
            INSERT INTO pages (url, title, text, html_size, word_count, http_status, response_time_ms, content_hash, crawled_at, session_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (url, session_id) DO UPDATE SET
                title = EXCLUDED.title, text = EXCLUDED.text, html_size = EXCLUDED.html_size,
                word_count = EXCLUDED.word_count, http_status = EXCLUDED.http_status,
                response_time_ms = EXCLUDED.response_time_ms, content_hash = EXCLUDED.content_hash,
                crawled_at = EXCLUDED.crawled_at
            "#,
        )
        .bind(&page.url)
        .bind(&page.title)
        .bind(&page.cleaned_text)
        .bind(page.html_size as i64)
        .bind(page.word_count as i64)
        .bind(page.http_status as i32)
        .bind(page.response_time_ms as i64)
        .bind(&page.content_hash)
        .bind(page.crawled_at)
        .bind(page.session_id)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        for link in &links {
            sqlx::query(
                r#"
                INSERT INTO links (source_url, target_url, anchor_text, context, is_nofollow, discovered_at, session_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (source_url, target_url, session_id) DO NOTHING
                "#,
            )
            .bind(&link.source_url)
            .bind(&link.target_url)
            .bind(&link.anchor_text)
            .bind(&link.surrounding_context)
            .bind(link.is_nofollow)
            .bind(link.discovered_at)
            .bind(link.session_id)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        }

        tx.commit().await.map_err(classify)?;
        Ok(())
    }

    async fn end_session(&self, session_id: Uuid, status: SessionStatus) -> StoreResult<()> {
        sqlx::query("UPDATE sessions SET status = $1, ended_at = $2 WHERE id = $3")
            .bind(status_to_str(status))
            .bind(Utc::now())
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    fn iter_links(&self) -> BoxStream<'_, StoreResult<Link>> {
        let stream = sqlx::query(
            "SELECT source_url, target_url, anchor_text, context, is_nofollow, discovered_at, session_id FROM links",
        )
        .fetch(&self.pool)
        .map_err(classify)
        .map_ok(|row| Link {
            source_url: row.get("source_url"),
            target_url: row.get("target_url"),
            anchor_text: row.get("anchor_text"),
            surrounding_context: row.get("context"),
            is_nofollow: row.get("is_nofollow"),
            discovered_at: row.get("discovered_at"),
            session_id: row.get("session_id"),
        });
        Box::pin(stream)
    }

    async fn upsert_domain_scores(&self, scores: Vec<DomainScore>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        for s in &scores {
            sqlx::query(
                r#"
                INSERT INTO domain_scores (domain, authority_score, backlink_count, referring_domains, updated_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (domain) DO UPDATE SET
                    authority_score = EXCLUDED.authority_score,
                    backlink_count = EXCLUDED.backlink_count,
                    referring_domains = EXCLUDED.referring_domains,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(&s.domain)
            .bind(s.authority_score)
            .bind(s.backlink_count as i64)
            .bind(s.referring_domains as i64)
            .bind(s.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        }
        tx.commit().await.map_err(classify)?;
        Ok(())
    }

    async fn upsert_pagerank_scores(&self, scores: Vec<PageRankScore>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        for s in &scores {
            sqlx::query(
                r#"
                INSERT INTO pagerank_scores (url, score, updated_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (url) DO UPDATE SET score = EXCLUDED.score, updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(&s.url)
            .bind(s.score)
            .bind(s.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        }
        tx.commit().await.map_err(classify)?;
        Ok(())
    }

    async fn load_progress(&self) -> StoreResult<Option<Progress>> {
        let row = sqlx::query(
            "SELECT current_page, batch_size, total_urls, processed, succeeded, failed, updated_at, active_session_id, running FROM progress WHERE singleton_key = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        Ok(row.map(|r| Progress {
            current_page: r.get::<i64, _>("current_page") as u64,
            batch_size: r.get::<i64, _>("batch_size") as usize,
            total_urls: r.get::<i64, _>("total_urls") as u64,
            processed: r.get::<i64, _>("processed") as u64,
            succeeded: r.get::<i64, _>("succeeded") as u64,
            failed: r.get::<i64, _>("failed") as u64,
            updated_at: r.get("updated_at"),
            active_session_id: r.get("active_session_id"),
            running: r.get("running"),
        }))
    }

    async fn save_progress(&self, progress: &Progress) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO progress (singleton_key, current_page, batch_size, total_urls, processed, succeeded, failed, updated_at, active_session_id, running)
            VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (singleton_key) DO UPDATE SET
                current_page = EXCLUDED.current_page, batch_size = EXCLUDED.batch_size,
                total_urls = EXCLUDED.total_urls, processed = EXCLUDED.processed,
                succeeded = EXCLUDED.succeeded, failed = EXCLUDED.failed,
                updated_at = EXCLUDED.updated_at, active_session_id = EXCLUDED.active_session_id,
                running = EXCLUDED.running
            "#,
        )
        .bind(progress.current_page as i64)
        .bind(progress.batch_size as i64)
        .bind(progress.total_urls as i64)
        .bind(progress.processed as i64)
        .bind(progress.succeeded as i64)
        .bind(progress.failed as i64)
        .bind(progress.updated_at)
        .bind(progress.active_session_id)
        .bind(progress.running)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }

    async fn load_database_usage(&self) -> StoreResult<Vec<DatabaseUsage>> {
        let rows = sqlx::query(
            "SELECT name, url, auth_token, bytes_used, storage_quota_bytes, writes_this_month, monthly_write_limit, last_health_check, status FROM database_usage",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        Ok(rows
            .into_iter()
            .map(|r| DatabaseUsage {
                name: r.get("name"),
                url: r.get("url"),
                auth_token: r.get("auth_token"),
                bytes_used: r.get::<i64, _>("bytes_used") as u64,
                storage_quota_bytes: r.get::<i64, _>("storage_quota_bytes") as u64,
                writes_this_month: r.get::<i64, _>("writes_this_month") as u64,
                monthly_write_limit: r.get::<i64, _>("monthly_write_limit") as u64,
                last_health_check: r.get("last_health_check"),
                status: db_status_from_str(r.get::<String, _>("status").as_str()),
            })
            .collect())
    }

    async fn save_database_usage(&self, usage: &[DatabaseUsage]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        for u in usage {
            sqlx::query(
                r#"
                INSERT INTO database_usage (name, url, auth_token, bytes_used, storage_quota_bytes, writes_this_month, monthly_write_limit, last_health_check, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (name) DO UPDATE SET
                    url = EXCLUDED.url, auth_token = EXCLUDED.auth_token, bytes_used = EXCLUDED.bytes_used,
                    storage_quota_bytes = EXCLUDED.storage_quota_bytes, writes_this_month = EXCLUDED.writes_this_month,
                    monthly_write_limit = EXCLUDED.monthly_write_limit, last_health_check = EXCLUDED.last_health_check,
                    status = EXCLUDED.status
                "#,
            )
            .bind(&u.name)
            .bind(&u.url)
            .bind(&u.auth_token)
            .bind(u.bytes_used as i64)
            .bind(u.storage_quota_bytes as i64)
            .bind(u.writes_this_month as i64)
            .bind(u.monthly_write_limit as i64)
            .bind(u.last_health_check)
            .bind(db_status_to_str(u.status))
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        }
        tx.commit().await.map_err(classify)?;
        Ok(())
    }

    async fn stats(&self) -> StoreResult<CorpusStats> {
        let totals = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM pages) AS total_pages,
                (SELECT COUNT(*) FROM links) AS total_links,
                (SELECT COUNT(*) FROM pages WHERE http_status BETWEEN 200 AND 299) AS successful
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        let total_pages: i64 = totals.get("total_pages");
        let total_links: i64 = totals.get("total_links");
        let successful: i64 = totals.get("successful");
        let success_rate = if total_pages == 0 {
            0.0
        } else {
            successful as f64 / total_pages as f64
        };

        let rows = sqlx::query(
            r#"
            SELECT crawled_at::date AS day, COUNT(*) AS n
            FROM pages
            GROUP BY day
            ORDER BY day
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        let daily_throughput = rows
            .into_iter()
            .map(|r| DailyThroughput {
                date: r.get("day"),
                pages_crawled: r.get::<i64, _>("n") as u64,
            })
            .collect();

        Ok(CorpusStats {
            total_pages: total_pages as u64,
            total_links: total_links as u64,
            success_rate,
            daily_throughput,
        })
    }
}
