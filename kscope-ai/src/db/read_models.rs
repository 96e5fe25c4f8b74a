//! Denormalized read-model rows mirrored into the search index

use chrono::{DateTime, Utc};
use kscope_common::db::{FaceSearchReadModel, MediaSearchReadModel, PostSearchReadModel};
use kscope_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

/// Table names, also used as index names on the index-sync stream
pub const MEDIA_SEARCH_TABLE: &str = "read_model_media_search";
pub const FACE_SEARCH_TABLE: &str = "read_model_face_search";
pub const POST_SEARCH_TABLE: &str = "read_model_post_search";

// ---------------------------------------------------------------------------
// read_model_media_search
// ---------------------------------------------------------------------------

/// Insert or refresh the insight-derived columns of a media row
///
/// Columns filled by later pipeline stages (`post_all_tags`, detected users,
/// interaction counters) are left as they are on conflict.
pub async fn upsert_media_search(conn: &mut SqliteConnection, row: &MediaSearchReadModel) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO read_model_media_search (
            media_id, post_id, post_title, media_url, ai_caption, ai_tags, ai_scenes,
            image_embedding, is_safe, uploader_id, uploader_username, uploader_department,
            reaction_count, comment_count, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, COALESCE(?, CURRENT_TIMESTAMP), CURRENT_TIMESTAMP)
        ON CONFLICT(media_id) DO UPDATE SET
            post_id = excluded.post_id,
            post_title = excluded.post_title,
            media_url = excluded.media_url,
            ai_caption = excluded.ai_caption,
            ai_tags = excluded.ai_tags,
            ai_scenes = excluded.ai_scenes,
            image_embedding = excluded.image_embedding,
            is_safe = excluded.is_safe,
            uploader_id = excluded.uploader_id,
            uploader_username = excluded.uploader_username,
            uploader_department = excluded.uploader_department,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(row.media_id)
    .bind(row.post_id)
    .bind(&row.post_title)
    .bind(&row.media_url)
    .bind(&row.ai_caption)
    .bind(&row.ai_tags)
    .bind(&row.ai_scenes)
    .bind(&row.image_embedding)
    .bind(row.is_safe)
    .bind(row.uploader_id)
    .bind(&row.uploader_username)
    .bind(&row.uploader_department)
    .bind(row.reaction_count)
    .bind(row.comment_count)
    .bind(row.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn find_media_search(
    conn: &mut SqliteConnection,
    media_id: i64,
) -> Result<Option<MediaSearchReadModel>> {
    let row = sqlx::query("SELECT * FROM read_model_media_search WHERE media_id = ?")
        .bind(media_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|row| media_search_from_row(&row)))
}

/// Set `post_all_tags` on every media row of a post; returns the touched media ids
pub async fn backfill_post_all_tags(
    conn: &mut SqliteConnection,
    post_id: i64,
    post_all_tags: &str,
) -> Result<Vec<i64>> {
    let mut ids: Vec<i64> = sqlx::query_scalar(
        r#"
        UPDATE read_model_media_search
        SET post_all_tags = ?, updated_at = CURRENT_TIMESTAMP
        WHERE post_id = ?
        RETURNING media_id
        "#,
    )
    .bind(post_all_tags)
    .bind(post_id)
    .fetch_all(&mut *conn)
    .await?;

    ids.sort_unstable();
    Ok(ids)
}

/// Add a user to the detected-user lists of a media row (set union)
///
/// Returns false when the row is missing or already lists the user.
pub async fn add_detected_user(
    conn: &mut SqliteConnection,
    media_id: i64,
    user_id: i64,
    username: &str,
) -> Result<bool> {
    let Some(current) = find_media_search(conn, media_id).await? else {
        return Ok(false);
    };

    let mut user_ids = split_list(current.detected_user_ids.as_deref());
    let user_id_text = user_id.to_string();
    if user_ids.contains(&user_id_text) {
        return Ok(false);
    }
    user_ids.push(user_id_text);

    let mut usernames = split_list(current.detected_usernames.as_deref());
    if !usernames.iter().any(|name| name == username) {
        usernames.push(username.to_string());
    }

    sqlx::query(
        r#"
        UPDATE read_model_media_search
        SET detected_user_ids = ?, detected_usernames = ?, updated_at = CURRENT_TIMESTAMP
        WHERE media_id = ?
        "#,
    )
    .bind(user_ids.join(","))
    .bind(usernames.join(","))
    .bind(media_id)
    .execute(&mut *conn)
    .await?;

    Ok(true)
}

fn media_search_from_row(row: &SqliteRow) -> MediaSearchReadModel {
    MediaSearchReadModel {
        media_id: row.get("media_id"),
        post_id: row.get("post_id"),
        post_title: row.get("post_title"),
        post_all_tags: row.get("post_all_tags"),
        media_url: row.get("media_url"),
        ai_caption: row.get("ai_caption"),
        ai_tags: row.get("ai_tags"),
        ai_scenes: row.get("ai_scenes"),
        image_embedding: row.get("image_embedding"),
        is_safe: row.get("is_safe"),
        detected_user_ids: row.get("detected_user_ids"),
        detected_usernames: row.get("detected_usernames"),
        uploader_id: row.get("uploader_id"),
        uploader_username: row.get("uploader_username"),
        uploader_department: row.get("uploader_department"),
        reaction_count: row.get("reaction_count"),
        comment_count: row.get("comment_count"),
        created_at: timestamp(row, "created_at"),
        updated_at: timestamp(row, "updated_at"),
    }
}

// ---------------------------------------------------------------------------
// read_model_face_search
// ---------------------------------------------------------------------------

pub async fn upsert_face_search(conn: &mut SqliteConnection, row: &FaceSearchReadModel) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO read_model_face_search (
            face_id, media_id, post_id, face_embedding, bbox, identified_user_id,
            identified_username, match_confidence, uploader_id, post_title, media_url,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, COALESCE(?, CURRENT_TIMESTAMP), CURRENT_TIMESTAMP)
        ON CONFLICT(face_id) DO UPDATE SET
            media_id = excluded.media_id,
            post_id = excluded.post_id,
            face_embedding = excluded.face_embedding,
            bbox = excluded.bbox,
            uploader_id = excluded.uploader_id,
            post_title = excluded.post_title,
            media_url = excluded.media_url,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(&row.face_id)
    .bind(row.media_id)
    .bind(row.post_id)
    .bind(&row.face_embedding)
    .bind(&row.bbox)
    .bind(row.identified_user_id)
    .bind(&row.identified_username)
    .bind(row.match_confidence)
    .bind(row.uploader_id)
    .bind(&row.post_title)
    .bind(&row.media_url)
    .bind(row.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn find_face_search(
    conn: &mut SqliteConnection,
    face_id: &str,
) -> Result<Option<FaceSearchReadModel>> {
    let row = sqlx::query("SELECT * FROM read_model_face_search WHERE face_id = ?")
        .bind(face_id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(|row| FaceSearchReadModel {
        face_id: row.get("face_id"),
        media_id: row.get("media_id"),
        post_id: row.get("post_id"),
        face_embedding: row.get("face_embedding"),
        bbox: row.get("bbox"),
        identified_user_id: row.get("identified_user_id"),
        identified_username: row.get("identified_username"),
        match_confidence: row.get("match_confidence"),
        uploader_id: row.get("uploader_id"),
        post_title: row.get("post_title"),
        media_url: row.get("media_url"),
        created_at: timestamp(&row, "created_at"),
        updated_at: timestamp(&row, "updated_at"),
    }))
}

/// Record the suggested identity on a face row; false if the row is missing
pub async fn set_face_identity(
    conn: &mut SqliteConnection,
    face_id: &str,
    user_id: i64,
    username: &str,
    confidence: f32,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE read_model_face_search
        SET identified_user_id = ?, identified_username = ?, match_confidence = ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE face_id = ?
        "#,
    )
    .bind(user_id)
    .bind(username)
    .bind(confidence)
    .bind(face_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// read_model_post_search
// ---------------------------------------------------------------------------

pub async fn find_post_search(
    conn: &mut SqliteConnection,
    post_id: i64,
) -> Result<Option<PostSearchReadModel>> {
    let row = sqlx::query("SELECT * FROM read_model_post_search WHERE post_id = ?")
        .bind(post_id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(|row| PostSearchReadModel {
        post_id: row.get("post_id"),
        author_id: row.get("author_id"),
        author_username: row.get("author_username"),
        author_department: row.get("author_department"),
        title: row.get("title"),
        body: row.get("body"),
        all_ai_tags: row.get("all_ai_tags"),
        all_ai_scenes: row.get("all_ai_scenes"),
        all_detected_user_ids: row.get("all_detected_user_ids"),
        inferred_event_type: row.get("inferred_event_type"),
        inferred_tags: row.get("inferred_tags"),
        categories: row.get("categories"),
        total_reactions: row.get("total_reactions"),
        total_comments: row.get("total_comments"),
        created_at: timestamp(&row, "created_at"),
        updated_at: timestamp(&row, "updated_at"),
    }))
}

/// Write every column of a post row; `created_at` is kept on conflict
pub async fn upsert_post_search(conn: &mut SqliteConnection, row: &PostSearchReadModel) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO read_model_post_search (
            post_id, author_id, author_username, author_department, title, body,
            all_ai_tags, all_ai_scenes, all_detected_user_ids, inferred_event_type,
            inferred_tags, categories, total_reactions, total_comments, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, COALESCE(?, CURRENT_TIMESTAMP), CURRENT_TIMESTAMP)
        ON CONFLICT(post_id) DO UPDATE SET
            author_id = excluded.author_id,
            author_username = excluded.author_username,
            author_department = excluded.author_department,
            title = excluded.title,
            body = excluded.body,
            all_ai_tags = excluded.all_ai_tags,
            all_ai_scenes = excluded.all_ai_scenes,
            all_detected_user_ids = excluded.all_detected_user_ids,
            inferred_event_type = excluded.inferred_event_type,
            inferred_tags = excluded.inferred_tags,
            categories = excluded.categories,
            total_reactions = excluded.total_reactions,
            total_comments = excluded.total_comments,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(row.post_id)
    .bind(row.author_id)
    .bind(&row.author_username)
    .bind(&row.author_department)
    .bind(&row.title)
    .bind(&row.body)
    .bind(&row.all_ai_tags)
    .bind(&row.all_ai_scenes)
    .bind(&row.all_detected_user_ids)
    .bind(&row.inferred_event_type)
    .bind(&row.inferred_tags)
    .bind(&row.categories)
    .bind(row.total_reactions)
    .bind(row.total_comments)
    .bind(row.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn timestamp(row: &SqliteRow, column: &str) -> Option<DateTime<Utc>> {
    row.try_get(column).ok()
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list_drops_blanks() {
        assert_eq!(split_list(Some("4, 5,,6")), vec!["4", "5", "6"]);
        assert!(split_list(None).is_empty());
        assert!(split_list(Some("")).is_empty());
    }
}
