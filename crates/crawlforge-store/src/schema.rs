//! Logical schema (§6), expressed as Postgres DDL. `PostgresStore::migrate`
//! applies this at startup; it's intentionally idempotent (`IF NOT EXISTS`)
//! so repeated boots against an already-provisioned database are cheap.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS backlinks (
    id BIGSERIAL PRIMARY KEY,
    source_url TEXT NOT NULL,
    target_url TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id UUID PRIMARY KEY,
    started_at TIMESTAMPTZ NOT NULL,
    ended_at TIMESTAMPTZ,
    status TEXT NOT NULL,
    config_json JSONB NOT NULL,
    target_db TEXT NOT NULL,
    seed_batch_size BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS pages (
    id BIGSERIAL PRIMARY KEY,
    url TEXT NOT NULL,
    title TEXT,
    text TEXT NOT NULL,
    html_size BIGINT NOT NULL,
    word_count BIGINT NOT NULL,
    http_status INT NOT NULL,
    response_time_ms BIGINT NOT NULL,
    content_hash TEXT NOT NULL,
    crawled_at TIMESTAMPTZ NOT NULL,
    session_id UUID NOT NULL REFERENCES sessions(id),
    UNIQUE (url, session_id)
);

CREATE TABLE IF NOT EXISTS links (
    id BIGSERIAL PRIMARY KEY,
    source_url TEXT NOT NULL,
    target_url TEXT NOT NULL,
    anchor_text TEXT,
    context TEXT,
    is_nofollow BOOLEAN NOT NULL,
    discovered_at TIMESTAMPTZ NOT NULL,
    session_id UUID NOT NULL REFERENCES sessions(id),
    UNIQUE (source_url, target_url, session_id)
);

CREATE TABLE IF NOT EXISTS domain_scores (
    domain TEXT PRIMARY KEY,
    authority_score DOUBLE PRECISION NOT NULL,
    backlink_count BIGINT NOT NULL,
    referring_domains BIGINT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS pagerank_scores (
    url TEXT PRIMARY KEY,
    score DOUBLE PRECISION NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS progress (
    singleton_key INT PRIMARY KEY DEFAULT 1,
    current_page BIGINT NOT NULL,
    batch_size BIGINT NOT NULL,
    total_urls BIGINT NOT NULL,
    processed BIGINT NOT NULL,
    succeeded BIGINT NOT NULL,
    failed BIGINT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    active_session_id UUID,
    running BOOLEAN NOT NULL,
    CHECK (singleton_key = 1)
);

CREATE TABLE IF NOT EXISTS database_usage (
    name TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    auth_token TEXT NOT NULL,
    bytes_used BIGINT NOT NULL,
    storage_quota_bytes BIGINT NOT NULL,
    writes_this_month BIGINT NOT NULL,
    monthly_write_limit BIGINT NOT NULL,
    last_health_check TIMESTAMPTZ NOT NULL,
    status TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_backlinks_id ON backlinks (id);
CREATE INDEX IF NOT EXISTS idx_pages_url ON pages (url);
CREATE INDEX IF NOT EXISTS idx_links_source ON links (source_url);
CREATE INDEX IF NOT EXISTS idx_links_target ON links (target_url);
"#;
