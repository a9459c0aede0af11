//! Domain entities (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A crawl run. Created at the start of each batch, closed with a terminal
/// status when the batch ends or the process drains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub seed_batch_size: usize,
    /// JSON snapshot of the configuration active when the session started.
    pub config_snapshot: serde_json::Value,
    pub target_db: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
}

impl Session {
    pub fn new(seed_batch_size: usize, config_snapshot: serde_json::Value, target_db: String) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            status: SessionStatus::Active,
            seed_batch_size,
            config_snapshot,
            target_db,
        }
    }
}

/// A crawled resource (§3). At most one row per `url` per session;
/// `content_hash` collisions across distinct URLs mark duplicates but are
/// never collapsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub url: String,
    pub title: Option<String>,
    pub cleaned_text: String,
    pub html_size: usize,
    pub word_count: usize,
    pub http_status: u16,
    pub response_time_ms: u64,
    pub content_hash: String,
    pub crawled_at: DateTime<Utc>,
    pub session_id: Uuid,
}

/// Stable digest over cleaned-text bytes, used as `Page::content_hash`.
pub fn content_hash(cleaned_text: &str) -> String {
    let digest = Sha256::digest(cleaned_text.as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// A discovered outbound edge (§3). `(source_url, target_url, session_id)`
/// is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub source_url: String,
    pub target_url: String,
    pub anchor_text: Option<String>,
    pub surrounding_context: Option<String>,
    pub is_nofollow: bool,
    pub discovered_at: DateTime<Utc>,
    pub session_id: Uuid,
}

/// Authority score for a domain, recomputed by the Analyzer (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainScore {
    pub domain: String,
    pub authority_score: f64,
    pub backlink_count: u64,
    pub referring_domains: u64,
    pub updated_at: DateTime<Utc>,
}

/// A single node's PageRank value. The sum of `score` across all nodes in
/// a corpus equals 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRankScore {
    pub url: String,
    pub score: f64,
    pub updated_at: DateTime<Utc>,
}

/// Durable checkpoint of scheduler position (§3, §4.8).
///
/// Invariant: `processed == succeeded + failed`, `current_page >= 1`,
/// `batch_size >= 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub current_page: u64,
    pub batch_size: usize,
    pub total_urls: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub updated_at: DateTime<Utc>,
    pub active_session_id: Option<Uuid>,
    pub running: bool,
}

impl Progress {
    /// The zero-initialized record used when no prior checkpoint exists
    /// (§4.6 `LoadProgress`, §4.8 on missing/malformed state).
    pub fn initial(batch_size: usize) -> Self {
        Self {
            current_page: 1,
            batch_size,
            total_urls: 0,
            processed: 0,
            succeeded: 0,
            failed: 0,
            updated_at: Utc::now(),
            active_session_id: None,
            running: false,
        }
    }

    /// Invariant check used by tests and by the Progress Tracker before a
    /// write is accepted.
    pub fn is_consistent(&self) -> bool {
        self.processed == self.succeeded + self.failed
            && self.current_page >= 1
            && self.batch_size >= 1
    }
}

/// Per-target-database usage and health snapshot (§3, §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseUsage {
    pub name: String,
    pub url: String,
    /// Stored out of band from `url`; never logged or serialized in full.
    #[serde(skip_serializing)]
    pub auth_token: String,
    pub bytes_used: u64,
    pub storage_quota_bytes: u64,
    pub writes_this_month: u64,
    pub monthly_write_limit: u64,
    pub last_health_check: DateTime<Utc>,
    pub status: DatabaseStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStatus {
    Healthy,
    Warning,
    Critical,
    Down,
}

impl DatabaseUsage {
    /// Fraction of storage quota consumed, in `[0, +inf)`.
    pub fn storage_fraction(&self) -> f64 {
        if self.storage_quota_bytes == 0 {
            return 1.0;
        }
        self.bytes_used as f64 / self.storage_quota_bytes as f64
    }

    /// Fraction of the monthly write budget consumed.
    pub fn write_fraction(&self) -> f64 {
        if self.monthly_write_limit == 0 {
            return 1.0;
        }
        self.writes_this_month as f64 / self.monthly_write_limit as f64
    }

    /// The worse of the two usage fractions — what Rotation Manager
    /// minimizes over healthy databases (§4.2).
    pub fn usage_fraction(&self) -> f64 {
        self.storage_fraction().max(self.write_fraction())
    }

    /// Recompute `status` from usage fractions per §3's thresholds. Does
    /// not touch `Down`, which is driven solely by health-probe failures.
    pub fn refresh_usage_status(&mut self) {
        if self.status == DatabaseStatus::Down {
            return;
        }
        self.status = if self.usage_fraction() >= 0.90 {
            DatabaseStatus::Critical
        } else if self.usage_fraction() >= 0.70 {
            DatabaseStatus::Warning
        } else {
            DatabaseStatus::Healthy
        };
    }
}

/// Pages crawled on a single UTC calendar day, for `/stats`' throughput
/// series (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyThroughput {
    pub date: chrono::NaiveDate,
    pub pages_crawled: u64,
}

/// Aggregated corpus counters served by the Monitoring API's `/stats`
/// (§4.9). Computed from `Page`/`Link` rows, not cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusStats {
    pub total_pages: u64,
    pub total_links: u64,
    /// Fraction of crawled pages with `http_status` in `200..300`.
    pub success_rate: f64,
    pub daily_throughput: Vec<DailyThroughput>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_consistency() {
        let mut p = Progress::initial(50);
        assert!(p.is_consistent());
        p.succeeded = 3;
        p.failed = 2;
        p.processed = 5;
        assert!(p.is_consistent());
        p.processed = 6;
        assert!(!p.is_consistent());
    }

    #[test]
    fn database_status_thresholds() {
        let mut db = DatabaseUsage {
            name: "a".into(),
            url: "postgres://a".into(),
            auth_token: "secret".into(),
            bytes_used: 0,
            storage_quota_bytes: 1000,
            writes_this_month: 0,
            monthly_write_limit: 1000,
            last_health_check: Utc::now(),
            status: DatabaseStatus::Healthy,
        };
        db.writes_this_month = 700;
        db.refresh_usage_status();
        assert_eq!(db.status, DatabaseStatus::Warning);
        db.writes_this_month = 900;
        db.refresh_usage_status();
        assert_eq!(db.status, DatabaseStatus::Critical);
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash("hello"), content_hash("hello"));
        assert_ne!(content_hash("hello"), content_hash("world"));
    }
}
