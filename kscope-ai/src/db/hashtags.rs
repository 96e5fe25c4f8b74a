//! Hashtag usage counters

use kscope_common::db::Hashtag;
use kscope_common::Result;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

/// Add `change` to the usage counter of every named hashtag, clamped at zero
///
/// Names are matched lower-cased. Returns the number of rows updated.
pub async fn apply_usage_change(
    conn: &mut SqliteConnection,
    names: &[String],
    change: i32,
) -> Result<u64> {
    if names.is_empty() {
        return Ok(0);
    }

    let mut query: QueryBuilder<Sqlite> =
        QueryBuilder::new("UPDATE hashtags SET usage_count = MAX(0, usage_count + ");
    query.push_bind(change);
    query.push(") WHERE name IN (");
    let mut separated = query.separated(", ");
    for name in names {
        separated.push_bind(name.trim().to_lowercase());
    }
    separated.push_unseparated(")");

    let result = query.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

pub async fn find_hashtag(conn: &mut SqliteConnection, name: &str) -> Result<Option<Hashtag>> {
    let row = sqlx::query("SELECT hashtag_id, name, usage_count FROM hashtags WHERE name = ?")
        .bind(name.trim().to_lowercase())
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(|row| Hashtag {
        hashtag_id: row.get("hashtag_id"),
        name: row.get("name"),
        usage_count: row.get("usage_count"),
    }))
}
