use anyhow::{bail, Result};
use std::collections::HashMap;

use super::schema::Database;
use super::types::{feed_from_row, Feed, FeedCountRow, FeedRow, FeedWithCount};
use crate::util::strip_control_chars;

/// Stable drawer ordering: each top-level feed or group by id, immediately
/// followed by its children. The projector and the OPML export both assume
/// parents precede their children.
const FEED_ORDER: &str = "ORDER BY COALESCE(f.group_id, f.id), f.group_id IS NOT NULL, f.id";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert a batch of feeds whose ids are only unique within the batch
    /// (e.g. fresh from an OPML parse), remapping them to real rowids.
    ///
    /// Parents are inserted first; children have their `group_id` rewritten
    /// through the remap table. Non-group feeds whose link is already
    /// persisted are skipped, which makes re-importing the same OPML a no-op
    /// for existing subscriptions. Returns the number of rows inserted.
    pub async fn insert_feeds(&self, feeds: &[Feed]) -> Result<usize> {
        if feeds.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut id_map: HashMap<i64, i64> = HashMap::new();
        let mut inserted = 0;

        for feed in feeds.iter().filter(|f| f.group_id.is_none()) {
            // Merge on link for real subscriptions; groups have empty links
            // and always insert.
            if !feed.is_group && !feed.link.is_empty() {
                let existing: Option<(i64,)> =
                    sqlx::query_as("SELECT id FROM feeds WHERE link = ?")
                        .bind(&feed.link)
                        .fetch_optional(&mut *tx)
                        .await?;
                if let Some((id,)) = existing {
                    id_map.insert(feed.id, id);
                    continue;
                }
            }
            let row: (i64,) = sqlx::query_as(
                "INSERT INTO feeds (title, link, is_group, retrieve_full_text)
                 VALUES (?, ?, ?, ?) RETURNING id",
            )
            .bind(&feed.title)
            .bind(&feed.link)
            .bind(feed.is_group)
            .bind(feed.retrieve_full_text)
            .fetch_one(&mut *tx)
            .await?;
            id_map.insert(feed.id, row.0);
            inserted += 1;
        }

        for feed in feeds.iter().filter(|f| f.group_id.is_some()) {
            if !feed.link.is_empty() {
                let existing: Option<(i64,)> =
                    sqlx::query_as("SELECT id FROM feeds WHERE link = ?")
                        .bind(&feed.link)
                        .fetch_optional(&mut *tx)
                        .await?;
                if existing.is_some() {
                    continue;
                }
            }
            // A dangling group reference (parent not in this batch) falls
            // back to top-level rather than pointing at an arbitrary row.
            let group_id = feed.group_id.and_then(|gid| id_map.get(&gid).copied());
            sqlx::query(
                "INSERT INTO feeds (title, link, group_id, retrieve_full_text)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&feed.title)
            .bind(&feed.link)
            .bind(group_id)
            .bind(feed.retrieve_full_text)
            .execute(&mut *tx)
            .await?;
            inserted += 1;
        }

        tx.commit().await?;
        if inserted > 0 {
            self.mark_changed();
        }
        Ok(inserted)
    }

    /// Update a feed's editable fields (title, link, group membership, flags).
    pub async fn update_feed(&self, feed: &Feed) -> Result<()> {
        sqlx::query(
            "UPDATE feeds SET title = ?, link = ?, group_id = ?, retrieve_full_text = ?
             WHERE id = ?",
        )
        .bind(&feed.title)
        .bind(&feed.link)
        .bind(feed.group_id)
        .bind(feed.retrieve_full_text)
        .bind(feed.id)
        .execute(&self.pool)
        .await?;
        self.mark_changed();
        Ok(())
    }

    /// Rename a feed or group. The name is sanitized (control chars
    /// stripped, whitespace trimmed); empty names are rejected.
    pub async fn rename_feed(&self, feed_id: i64, new_title: &str) -> Result<()> {
        let sanitized = strip_control_chars(new_title);
        let trimmed = sanitized.trim();
        if trimmed.is_empty() {
            bail!("Feed name cannot be empty or whitespace-only");
        }

        sqlx::query("UPDATE feeds SET title = ? WHERE id = ?")
            .bind(trimmed)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        self.mark_changed();
        Ok(())
    }

    /// Delete a feed or group. Deleting a group cascades to its child feeds,
    /// and every deleted feed cascades to its entries (FK `ON DELETE CASCADE`).
    pub async fn delete_feed(&self, feed_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        self.mark_changed();
        Ok(())
    }

    /// Toggle full-text retrieval for a feed.
    pub async fn set_retrieve_full_text(&self, feed_id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE feeds SET retrieve_full_text = ? WHERE id = ?")
            .bind(enabled)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        self.mark_changed();
        Ok(())
    }

    /// Set or clear the fetch-error flag. Called by the external fetcher.
    pub async fn set_fetch_error(&self, feed_id: i64, error: bool) -> Result<()> {
        sqlx::query("UPDATE feeds SET fetch_error = ? WHERE id = ?")
            .bind(error)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        self.mark_changed();
        Ok(())
    }

    // ========================================================================
    // Feed Queries
    // ========================================================================

    /// Get all feeds in stable drawer order (parents before children).
    pub async fn all_feeds(&self) -> Result<Vec<Feed>> {
        let rows: Vec<FeedRow> = sqlx::query_as(&format!(
            "SELECT id, title, link, group_id, is_group, retrieve_full_text, fetch_error
             FROM feeds f {FEED_ORDER}"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(feed_from_row).collect())
    }

    /// Get a single feed by id.
    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        let row: Option<FeedRow> = sqlx::query_as(
            "SELECT id, title, link, group_id, is_group, retrieve_full_text, fetch_error
             FROM feeds WHERE id = ?",
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(feed_from_row))
    }

    /// Get all feeds joined with their unread entry counts, in stable drawer
    /// order. This is the projector's input.
    pub async fn feeds_with_counts(&self) -> Result<Vec<FeedWithCount>> {
        let rows: Vec<FeedCountRow> = sqlx::query_as(&format!(
            r#"
                SELECT
                    f.id, f.title, f.link, f.group_id,
                    f.is_group, f.retrieve_full_text, f.fetch_error,
                    COUNT(CASE WHEN e.read = 0 THEN 1 END) as entry_count
                FROM feeds f
                LEFT JOIN entries e ON f.id = e.feed_id
                GROUP BY f.id
                {FEED_ORDER}
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, title, link, group_id, is_group, retrieve_full_text, fetch_error, n)| {
                FeedWithCount {
                    feed: feed_from_row((
                        id,
                        title,
                        link,
                        group_id,
                        is_group,
                        retrieve_full_text,
                        fetch_error,
                    )),
                    entry_count: n,
                }
            })
            .collect())
    }
}
