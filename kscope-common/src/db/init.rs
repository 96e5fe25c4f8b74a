//! Database initialization
//!
//! Creates the SQLite file on first run and every table the ingestion
//! pipeline touches. All statements are idempotent, so every service
//! instance can call [`init_database`] on startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Per-connection lock wait before SQLite reports `database is locked`
const BUSY_TIMEOUT_MS: u64 = 5000;

/// Open (or create) the database and ensure the schema exists
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pragmas are per connection, so they go on the connect options.
    // WAL lets the read-model and completion queries run beside one writer.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    // One pool per process; workers for every stream share it
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table and index (safe to call repeatedly)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Write model collaborators owned by the CRUD layer
    create_users_table(pool).await?;
    create_posts_table(pool).await?;
    create_post_media_table(pool).await?;
    create_hashtags_table(pool).await?;

    // Write model owned by the AI pipeline
    create_media_ai_insights_table(pool).await?;
    create_media_detected_faces_table(pool).await?;

    // Read models mirrored into the search index
    create_media_search_read_model_table(pool).await?;
    create_face_search_read_model_table(pool).await?;
    create_post_search_read_model_table(pool).await?;

    create_aggregation_triggers_table(pool).await?;

    // Event log
    create_stream_tables(pool).await?;

    Ok(())
}

pub async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            designation TEXT,
            profile_picture_url TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_posts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS posts (
            post_id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users(user_id),
            title TEXT NOT NULL,
            body TEXT,
            summary TEXT,
            visibility TEXT NOT NULL DEFAULT 'PUBLIC',
            status TEXT NOT NULL DEFAULT 'PUBLISHED',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_post_media_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS post_media (
            media_id INTEGER PRIMARY KEY,
            post_id INTEGER NOT NULL REFERENCES posts(post_id) ON DELETE CASCADE,
            media_url TEXT NOT NULL,
            position INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_post_media_post ON post_media(post_id)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_hashtags_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hashtags (
            hashtag_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            usage_count INTEGER NOT NULL DEFAULT 0 CHECK (usage_count >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_media_ai_insights_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS media_ai_insights (
            media_id INTEGER PRIMARY KEY REFERENCES post_media(media_id) ON DELETE CASCADE,
            post_id INTEGER NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('PENDING', 'COMPLETED')),
            is_safe INTEGER NOT NULL DEFAULT 1,
            caption TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            scenes TEXT NOT NULL DEFAULT '[]',
            image_embedding TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_media_ai_insights_post_status ON media_ai_insights(post_id, status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_media_detected_faces_table(pool: &SqlitePool) -> Result<()> {
    // No uniqueness on (media_id, bbox): a redelivered detection may add a twin row
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS media_detected_faces (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            media_id INTEGER NOT NULL REFERENCES media_ai_insights(media_id) ON DELETE CASCADE,
            bbox TEXT NOT NULL,
            embedding TEXT,
            status TEXT NOT NULL CHECK (status IN ('UNIDENTIFIED', 'SUGGESTED')),
            suggested_user_id INTEGER REFERENCES users(user_id) ON DELETE SET NULL,
            confidence_score REAL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_media_detected_faces_media ON media_detected_faces(media_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_media_search_read_model_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS read_model_media_search (
            media_id INTEGER PRIMARY KEY,
            post_id INTEGER NOT NULL,
            post_title TEXT,
            post_all_tags TEXT,
            media_url TEXT,
            ai_caption TEXT,
            ai_tags TEXT,
            ai_scenes TEXT,
            image_embedding TEXT,
            is_safe INTEGER,
            detected_user_ids TEXT,
            detected_usernames TEXT,
            uploader_id INTEGER,
            uploader_username TEXT,
            uploader_department TEXT,
            reaction_count INTEGER NOT NULL DEFAULT 0,
            comment_count INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_read_model_media_search_post ON read_model_media_search(post_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_face_search_read_model_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS read_model_face_search (
            face_id TEXT PRIMARY KEY,
            media_id INTEGER NOT NULL,
            post_id INTEGER NOT NULL,
            face_embedding TEXT,
            bbox TEXT,
            identified_user_id INTEGER,
            identified_username TEXT,
            match_confidence REAL,
            uploader_id INTEGER,
            post_title TEXT,
            media_url TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_post_search_read_model_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS read_model_post_search (
            post_id INTEGER PRIMARY KEY,
            author_id INTEGER,
            author_username TEXT,
            author_department TEXT,
            title TEXT,
            body TEXT,
            all_ai_tags TEXT,
            all_ai_scenes TEXT,
            all_detected_user_ids TEXT,
            inferred_event_type TEXT,
            inferred_tags TEXT,
            categories TEXT,
            total_reactions INTEGER NOT NULL DEFAULT 0,
            total_comments INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_aggregation_triggers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS aggregation_triggers (
            post_id INTEGER PRIMARY KEY,
            total_media INTEGER NOT NULL,
            idempotency_key TEXT NOT NULL,
            triggered_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Append-only log, consumer groups and the pending (unacknowledged) set
pub async fn create_stream_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stream_entries (
            entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
            stream TEXT NOT NULL,
            message_id TEXT NOT NULL,
            fields TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL,
            UNIQUE (stream, message_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_stream_entries_stream ON stream_entries(stream, entry_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stream_groups (
            stream TEXT NOT NULL,
            group_name TEXT NOT NULL,
            last_delivered_id INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (stream, group_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stream_pending (
            stream TEXT NOT NULL,
            group_name TEXT NOT NULL,
            entry_id INTEGER NOT NULL REFERENCES stream_entries(entry_id) ON DELETE CASCADE,
            consumer TEXT NOT NULL,
            delivery_count INTEGER NOT NULL DEFAULT 1,
            last_delivered_ms INTEGER NOT NULL,
            PRIMARY KEY (stream, group_name, entry_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
