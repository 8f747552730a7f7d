//! Schema migration. Runs idempotent `CREATE TABLE IF NOT EXISTS` statements
//! rather than a directory-based migration runner, mirroring how the teacher
//! crate bootstraps its own storage backend at `from_pool` time.

use sqlx::PgPool;

/// Apply the full devpulse schema. Safe to call on every startup.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workspaces (
            id              TEXT PRIMARY KEY,
            canonical_id    TEXT NOT NULL UNIQUE,
            display_name    TEXT NOT NULL,
            default_branch  TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            id            TEXT PRIMARY KEY,
            name          TEXT,
            device_type   TEXT,
            last_seen_at  TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workspace_devices (
            workspace_id  TEXT NOT NULL REFERENCES workspaces(id),
            device_id     TEXT NOT NULL REFERENCES devices(id),
            local_path    TEXT NOT NULL,
            last_seen_at  TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (workspace_id, device_id, local_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id            TEXT PRIMARY KEY,
            event_type    TEXT NOT NULL,
            timestamp     TIMESTAMPTZ NOT NULL,
            device_id     TEXT NOT NULL,
            workspace_id  TEXT NOT NULL,
            session_id    TEXT,
            data          JSONB NOT NULL,
            blob_refs     JSONB NOT NULL DEFAULT '[]',
            ingested_at   TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_workspace ON events(workspace_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id                 TEXT PRIMARY KEY,
            workspace_id       TEXT NOT NULL REFERENCES workspaces(id),
            device_id          TEXT NOT NULL,
            lifecycle          TEXT NOT NULL,
            parse_status       TEXT,
            cwd                TEXT NOT NULL,
            git_branch         TEXT,
            git_remote         TEXT,
            model              TEXT,
            started_at         TIMESTAMPTZ NOT NULL,
            ended_at           TIMESTAMPTZ,
            duration_ms        BIGINT,
            end_reason         TEXT,
            transcript_s3_key  TEXT,
            summary            TEXT,
            cost_estimate_usd  DOUBLE PRECISION,
            compact_sequence   BIGINT NOT NULL DEFAULT 0,
            updated_at         TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_device_workspace ON sessions(workspace_id, device_id, started_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transcript_messages (
            id                BIGSERIAL PRIMARY KEY,
            session_id        TEXT NOT NULL REFERENCES sessions(id),
            line_number       BIGINT NOT NULL,
            ordinal           BIGINT NOT NULL,
            role              TEXT NOT NULL,
            model             TEXT,
            tokens_in         BIGINT,
            tokens_out        BIGINT,
            tokens_cache_read  BIGINT,
            tokens_cache_write BIGINT,
            cost_usd          DOUBLE PRECISION,
            compact_sequence  BIGINT NOT NULL DEFAULT 0,
            is_compacted      BOOLEAN NOT NULL DEFAULT false,
            timestamp         TIMESTAMPTZ NOT NULL,
            metadata          JSONB NOT NULL DEFAULT '{}',
            UNIQUE (session_id, ordinal)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_blocks (
            id               BIGSERIAL PRIMARY KEY,
            message_id       BIGINT NOT NULL REFERENCES transcript_messages(id),
            session_id       TEXT NOT NULL REFERENCES sessions(id),
            block_order      BIGINT NOT NULL,
            block_type       TEXT NOT NULL,
            content_text     TEXT,
            tool_name        TEXT,
            tool_input       JSONB,
            tool_result_id   TEXT,
            result_s3_key    TEXT,
            is_error         BOOLEAN NOT NULL DEFAULT false,
            UNIQUE (message_id, block_order)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS git_activity (
            id             TEXT PRIMARY KEY,
            workspace_id   TEXT NOT NULL,
            device_id      TEXT NOT NULL,
            session_id     TEXT REFERENCES sessions(id),
            activity_type  TEXT NOT NULL,
            branch         TEXT NOT NULL,
            commit_sha     TEXT,
            message        TEXT,
            insertions     BIGINT,
            deletions      BIGINT,
            files_changed  BIGINT,
            timestamp      TIMESTAMPTZ NOT NULL,
            data           JSONB NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
