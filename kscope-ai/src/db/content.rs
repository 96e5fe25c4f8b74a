//! Lookups against the CRUD layer's tables (users, posts, media)

use chrono::{DateTime, Utc};
use kscope_common::db::{Post, PostMedia, User};
use kscope_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

/// A media item with its post and uploader
#[derive(Debug, Clone)]
pub struct MediaContext {
    pub media: PostMedia,
    pub post: Post,
    pub uploader: User,
}

pub async fn find_user(conn: &mut SqliteConnection, user_id: i64) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT user_id, username, designation, profile_picture_url FROM users WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| user_from_row(&row, "")))
}

pub async fn find_post(conn: &mut SqliteConnection, post_id: i64) -> Result<Option<Post>> {
    let row = sqlx::query(
        r#"
        SELECT post_id, user_id, title, body, summary, visibility, status, created_at
        FROM posts
        WHERE post_id = ?
        "#,
    )
    .bind(post_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| post_from_row(&row)))
}

/// Post together with its author
pub async fn find_post_with_author(
    conn: &mut SqliteConnection,
    post_id: i64,
) -> Result<Option<(Post, User)>> {
    let Some(post) = find_post(conn, post_id).await? else {
        return Ok(None);
    };
    let Some(author) = find_user(conn, post.user_id).await? else {
        return Ok(None);
    };
    Ok(Some((post, author)))
}

/// Media item joined with its post and uploader
pub async fn load_media_context(
    conn: &mut SqliteConnection,
    media_id: i64,
) -> Result<Option<MediaContext>> {
    let row = sqlx::query(
        r#"
        SELECT m.media_id, m.post_id, m.media_url, m.position,
               p.user_id, p.title, p.body, p.summary, p.visibility, p.status, p.created_at,
               u.username AS u_username, u.designation AS u_designation,
               u.profile_picture_url AS u_profile_picture_url, u.user_id AS u_user_id
        FROM post_media m
        JOIN posts p ON p.post_id = m.post_id
        JOIN users u ON u.user_id = p.user_id
        WHERE m.media_id = ?
        "#,
    )
    .bind(media_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| MediaContext {
        media: PostMedia {
            media_id: row.get("media_id"),
            post_id: row.get("post_id"),
            media_url: row.get("media_url"),
            position: row.get("position"),
        },
        post: post_from_row(&row),
        uploader: user_from_row(&row, "u_"),
    }))
}

/// Media ids of a post in display order
pub async fn media_ids_for_post(conn: &mut SqliteConnection, post_id: i64) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        "SELECT media_id FROM post_media WHERE post_id = ? ORDER BY position, media_id",
    )
    .bind(post_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

fn post_from_row(row: &SqliteRow) -> Post {
    let created_at: DateTime<Utc> = row.get("created_at");
    Post {
        post_id: row.get("post_id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        body: row.get("body"),
        summary: row.get("summary"),
        visibility: row.get("visibility"),
        status: row.get("status"),
        created_at,
    }
}

fn user_from_row(row: &SqliteRow, prefix: &str) -> User {
    User {
        user_id: row.get(format!("{}user_id", prefix).as_str()),
        username: row.get(format!("{}username", prefix).as_str()),
        designation: row.get(format!("{}designation", prefix).as_str()),
        profile_picture_url: row.get(format!("{}profile_picture_url", prefix).as_str()),
    }
}
