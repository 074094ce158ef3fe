//! `SQLite` soft-cache of the conversation list.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, TimeZone, Utc};
use tokio_rusqlite::Connection;

use crate::chat::core::config::CacheConfig;
use crate::chat::core::conversation::ConversationSummary;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::ConversationId;

/// Boxed future type for cache operations.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Local copy of durable conversation summaries.
pub trait ConversationCache: Send + Sync {
    /// Load every cached summary, newest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn load_all(&self) -> CacheFuture<'_, ChatResult<Vec<ConversationSummary>>>;

    /// Replace the cached list.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn replace_all(&self, summaries: Vec<ConversationSummary>) -> CacheFuture<'_, ChatResult<()>>;

    /// Insert or update one summary.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn upsert(&self, summary: ConversationSummary) -> CacheFuture<'_, ChatResult<()>>;

    /// Remove one summary.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn remove(&self, id: ConversationId) -> CacheFuture<'_, ChatResult<()>>;
}

type Row = (String, String, i64, i64);

fn to_row(summary: &ConversationSummary) -> Row {
    (
        summary.id.as_str().to_string(),
        summary.title.clone(),
        summary.created_at.timestamp_millis(),
        summary.updated_at.timestamp_millis(),
    )
}

fn timestamp(millis: i64, field: &str) -> ChatResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| ChatError::InvalidCacheRecord(format!("invalid {field} timestamp")))
}

/// `SQLite` implementation of the conversation cache.
///
/// Temporary conversations are never written.
pub struct SqliteConversationCache {
    conn: Connection,
    table: String,
}

impl SqliteConversationCache {
    /// Open the cache file and create its table.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(config: &CacheConfig) -> ChatResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        Self::init(conn, config.table.clone()).await
    }

    /// Cache backed by a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be created.
    pub async fn open_in_memory(table: impl Into<String>) -> ChatResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn, table.into()).await
    }

    async fn init(conn: Connection, table: String) -> ChatResult<Self> {
        let table_name = table.clone();
        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                )"
            ))?;
            Ok(())
        })
        .await?;
        Ok(Self { conn, table })
    }
}

impl ConversationCache for SqliteConversationCache {
    fn load_all(&self) -> CacheFuture<'_, ChatResult<Vec<ConversationSummary>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let rows: Vec<Row> = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT id, title, created_at, updated_at FROM {table} ORDER BY updated_at DESC"
                    ))?;
                    let rows = stmt
                        .query_map([], |row| {
                            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                        })?
                        .collect::<Result<Vec<Row>, _>>()?;
                    Ok(rows)
                })
                .await?;

            rows.into_iter()
                .map(|(id, title, created_at, updated_at)| {
                    Ok(ConversationSummary {
                        id: ConversationId::durable(id),
                        title,
                        created_at: timestamp(created_at, "created_at")?,
                        updated_at: timestamp(updated_at, "updated_at")?,
                        provisional: false,
                    })
                })
                .collect()
        })
    }

    fn replace_all(&self, summaries: Vec<ConversationSummary>) -> CacheFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            let table = self.table.clone();
            let rows: Vec<Row> = summaries
                .iter()
                .filter(|s| !s.id.is_temporary())
                .map(to_row)
                .collect();
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    tx.execute(&format!("DELETE FROM {table}"), [])?;
                    {
                        let mut stmt = tx.prepare(&format!(
                            "INSERT INTO {table} (id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)"
                        ))?;
                        for (id, title, created_at, updated_at) in rows {
                            stmt.execute(rusqlite::params![id, title, created_at, updated_at])?;
                        }
                    }
                    tx.commit()?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn upsert(&self, summary: ConversationSummary) -> CacheFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            if summary.id.is_temporary() {
                return Ok(());
            }
            let table = self.table.clone();
            let (id, title, created_at, updated_at) = to_row(&summary);
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT OR REPLACE INTO {table} (id, title, created_at, updated_at)
                             VALUES (?1, ?2, ?3, ?4)"
                        ),
                        rusqlite::params![id, title, created_at, updated_at],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn remove(&self, id: ConversationId) -> CacheFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            let table = self.table.clone();
            let id = id.as_str().to_string();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!("DELETE FROM {table} WHERE id = ?1"),
                        rusqlite::params![id],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn summary(id: &str, title: &str, updated_offset_ms: i64) -> ConversationSummary {
        let base = Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap();
        ConversationSummary {
            id: ConversationId::durable(id),
            title: title.to_string(),
            created_at: base,
            updated_at: base + TimeDelta::milliseconds(updated_offset_ms),
            provisional: false,
        }
    }

    #[tokio::test]
    async fn replace_all_skips_temporary_conversations() {
        let cache = SqliteConversationCache::open_in_memory("conversations").await.unwrap();
        let temp = ConversationSummary::provisional(
            ConversationId::mint_temporary(Utc::now()),
            "draft",
            Utc::now(),
        );
        cache
            .replace_all(vec![summary("c-1", "Older", 0), summary("c-2", "Newer", 10), temp])
            .await
            .unwrap();

        let loaded = cache.load_all().await.unwrap();
        let ids: Vec<&str> = loaded.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["c-2", "c-1"]);
    }

    #[tokio::test]
    async fn upsert_and_remove() {
        let cache = SqliteConversationCache::open_in_memory("conversations").await.unwrap();
        cache.upsert(summary("c-1", "First", 0)).await.unwrap();
        cache.upsert(summary("c-1", "Renamed", 5)).await.unwrap();

        let loaded = cache.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].title, "Renamed");

        cache.remove(ConversationId::durable("c-1")).await.unwrap();
        assert!(cache.load_all().await.unwrap().is_empty());
    }
}
