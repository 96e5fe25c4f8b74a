//! `media_detected_faces` rows

use chrono::{DateTime, Utc};
use kscope_common::db::{BoundingBox, DetectedFace, FaceDetectionStatus};
use kscope_common::Result;
use sqlx::{Row, SqliteConnection};

/// Insert an `UNIDENTIFIED` face; returns the generated face id
///
/// There is no uniqueness on (media, bbox): a redelivered detection adds a
/// second row for the same physical face.
pub async fn insert_face(
    conn: &mut SqliteConnection,
    media_id: i64,
    bbox: &BoundingBox,
    embedding: Option<&str>,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO media_detected_faces (media_id, bbox, embedding, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        "#,
    )
    .bind(media_id)
    .bind(bbox.to_json_text())
    .bind(embedding)
    .bind(FaceDetectionStatus::Unidentified.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn find_face(conn: &mut SqliteConnection, face_id: i64) -> Result<Option<DetectedFace>> {
    let row = sqlx::query(
        r#"
        SELECT id, media_id, bbox, embedding, status, suggested_user_id, confidence_score,
               created_at, updated_at
        FROM media_detected_faces
        WHERE id = ?
        "#,
    )
    .bind(face_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let bbox: String = row.get("bbox");
    let status: String = row.get("status");
    let created_at: DateTime<Utc> = row.get("created_at");
    let updated_at: DateTime<Utc> = row.get("updated_at");

    Ok(Some(DetectedFace {
        id: row.get("id"),
        media_id: row.get("media_id"),
        bbox: bbox.parse()?,
        embedding: row.get("embedding"),
        status: status.parse()?,
        suggested_user_id: row.get("suggested_user_id"),
        confidence_score: row.get("confidence_score"),
        created_at,
        updated_at,
    }))
}

/// Mark a face `SUGGESTED` for `user_id`; false if the face is gone
pub async fn record_suggestion(
    conn: &mut SqliteConnection,
    face_id: i64,
    user_id: i64,
    confidence_score: f32,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE media_detected_faces
        SET status = ?, suggested_user_id = ?, confidence_score = ?, updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(FaceDetectionStatus::Suggested.as_str())
    .bind(user_id)
    .bind(confidence_score)
    .bind(face_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Faces recorded for a media item
pub async fn count_faces_for_media(conn: &mut SqliteConnection, media_id: i64) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM media_detected_faces WHERE media_id = ?")
        .bind(media_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}
