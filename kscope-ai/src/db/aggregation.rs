//! `aggregation_triggers`: one remembered trigger per post

use kscope_common::Result;
use sqlx::SqliteConnection;

/// Remember that aggregation fired for `post_id` under `idempotency_key`
///
/// Returns false when the same key is already recorded. A different key
/// (the post's media count changed) replaces the old one and returns true.
pub async fn record_trigger(
    conn: &mut SqliteConnection,
    post_id: i64,
    total_media: i64,
    idempotency_key: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO aggregation_triggers (post_id, total_media, idempotency_key, triggered_at)
        VALUES (?, ?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(post_id) DO UPDATE SET
            total_media = excluded.total_media,
            idempotency_key = excluded.idempotency_key,
            triggered_at = excluded.triggered_at
        WHERE aggregation_triggers.idempotency_key <> excluded.idempotency_key
        "#,
    )
    .bind(post_id)
    .bind(total_media)
    .bind(idempotency_key)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Whether `idempotency_key` is the key currently recorded for `post_id`
pub async fn is_recorded(conn: &mut SqliteConnection, post_id: i64, idempotency_key: &str) -> Result<bool> {
    let recorded: Option<String> =
        sqlx::query_scalar("SELECT idempotency_key FROM aggregation_triggers WHERE post_id = ?")
            .bind(post_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(recorded.as_deref() == Some(idempotency_key))
}
