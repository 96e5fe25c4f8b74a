//! `media_ai_insights` rows

use chrono::{DateTime, Utc};
use kscope_common::db::{MediaAiInsight, MediaAiStatus};
use kscope_common::events::parse_string_list;
use kscope_common::Result;
use sqlx::{Row, SqliteConnection};

/// Insert an insight; false if one already exists for the media item
///
/// The existing row is kept untouched (one insight per media).
pub async fn insert_insight(conn: &mut SqliteConnection, insight: &MediaAiInsight) -> Result<bool> {
    let tags = serde_json::to_string(&insight.tags).unwrap_or_else(|_| "[]".to_string());
    let scenes = serde_json::to_string(&insight.scenes).unwrap_or_else(|_| "[]".to_string());

    let result = sqlx::query(
        r#"
        INSERT INTO media_ai_insights (
            media_id, post_id, status, is_safe, caption, tags, scenes, image_embedding,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(media_id) DO NOTHING
        "#,
    )
    .bind(insight.media_id)
    .bind(insight.post_id)
    .bind(insight.status.as_str())
    .bind(insight.is_safe)
    .bind(&insight.caption)
    .bind(tags)
    .bind(scenes)
    .bind(&insight.image_embedding)
    .bind(insight.created_at)
    .bind(insight.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn find_insight(conn: &mut SqliteConnection, media_id: i64) -> Result<Option<MediaAiInsight>> {
    let row = sqlx::query(
        r#"
        SELECT media_id, post_id, status, is_safe, caption, tags, scenes, image_embedding,
               created_at, updated_at
        FROM media_ai_insights
        WHERE media_id = ?
        "#,
    )
    .bind(media_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status: String = row.get("status");
    let tags: String = row.get("tags");
    let scenes: String = row.get("scenes");
    let created_at: DateTime<Utc> = row.get("created_at");
    let updated_at: DateTime<Utc> = row.get("updated_at");

    Ok(Some(MediaAiInsight {
        media_id: row.get("media_id"),
        post_id: row.get("post_id"),
        status: status.parse::<MediaAiStatus>()?,
        is_safe: row.get("is_safe"),
        caption: row.get("caption"),
        tags: parse_string_list(Some(&tags)),
        scenes: parse_string_list(Some(&scenes)),
        image_embedding: row.get("image_embedding"),
        created_at,
        updated_at,
    }))
}

/// Media items attached to a post
pub async fn count_media_for_post(conn: &mut SqliteConnection, post_id: i64) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM post_media WHERE post_id = ?")
        .bind(post_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// Insights of a post that reached `COMPLETED`
pub async fn count_completed_for_post(conn: &mut SqliteConnection, post_id: i64) -> Result<i64> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM media_ai_insights WHERE post_id = ? AND status = ?",
    )
    .bind(post_id)
    .bind(MediaAiStatus::Completed.as_str())
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}
