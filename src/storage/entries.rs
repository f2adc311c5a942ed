use anyhow::Result;

use super::schema::Database;
use super::types::{Entry, NewEntry};

impl Database {
    // ========================================================================
    // Entry Operations
    // ========================================================================

    /// Insert entries for a feed, deduplicating on (feed_id, guid).
    /// Returns the number of new rows. Called by the external fetcher.
    pub async fn insert_entries(&self, feed_id: i64, entries: &[NewEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for entry in entries {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO entries (feed_id, guid, title, link)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(feed_id)
            .bind(&entry.guid)
            .bind(&entry.title)
            .bind(&entry.link)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        if inserted > 0 {
            self.mark_changed();
        }
        Ok(inserted)
    }

    /// Get all entries for a feed, unread first.
    pub async fn entries_for_feed(&self, feed_id: i64) -> Result<Vec<Entry>> {
        let entries = sqlx::query_as::<_, (i64, i64, String, String, String, bool)>(
            "SELECT id, feed_id, guid, title, link, read
             FROM entries WHERE feed_id = ? ORDER BY read, id",
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(id, feed_id, guid, title, link, read)| Entry {
            id,
            feed_id,
            guid,
            title,
            link,
            read,
        })
        .collect();

        Ok(entries)
    }

    // ========================================================================
    // Mark-as-Read
    // ========================================================================

    /// Mark a single entry as read.
    pub async fn mark_entry_read(&self, entry_id: i64) -> Result<()> {
        sqlx::query("UPDATE entries SET read = 1 WHERE id = ?")
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        self.mark_changed();
        Ok(())
    }

    /// Mark every entry of one feed as read.
    pub async fn mark_feed_read(&self, feed_id: i64) -> Result<()> {
        sqlx::query("UPDATE entries SET read = 1 WHERE feed_id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        self.mark_changed();
        Ok(())
    }

    /// Mark every entry of every feed in a group as read.
    pub async fn mark_group_read(&self, group_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE entries SET read = 1
             WHERE feed_id IN (SELECT id FROM feeds WHERE group_id = ?)",
        )
        .bind(group_id)
        .execute(&self.pool)
        .await?;
        self.mark_changed();
        Ok(())
    }

    /// Mark everything as read.
    pub async fn mark_all_read(&self) -> Result<()> {
        sqlx::query("UPDATE entries SET read = 1")
            .execute(&self.pool)
            .await?;
        self.mark_changed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, Feed, NewEntry};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_entry(guid: &str) -> NewEntry {
        NewEntry {
            guid: guid.to_string(),
            title: format!("Entry {}", guid),
            link: format!("https://example.com/{}", guid),
        }
    }

    async fn seed_feed(db: &Database, batch_id: i64, group_id: Option<i64>) -> i64 {
        db.insert_feeds(&[Feed {
            id: batch_id,
            title: format!("Feed {}", batch_id),
            link: format!("https://feed{}.example.com/rss", batch_id),
            group_id,
            ..Feed::default()
        }])
        .await
        .unwrap();
        let feeds = db.all_feeds().await.unwrap();
        feeds
            .iter()
            .find(|f| f.link.contains(&format!("feed{}", batch_id)))
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_insert_entries_dedup() {
        let db = test_db().await;
        let feed_id = seed_feed(&db, 1, None).await;

        let n = db
            .insert_entries(feed_id, &[test_entry("a"), test_entry("b")])
            .await
            .unwrap();
        assert_eq!(n, 2);

        // Same guids again: nothing new
        let n = db
            .insert_entries(feed_id, &[test_entry("a"), test_entry("c")])
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(db.entries_for_feed(feed_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_mark_entry_read_updates_count() {
        let db = test_db().await;
        let feed_id = seed_feed(&db, 1, None).await;
        db.insert_entries(feed_id, &[test_entry("a"), test_entry("b")])
            .await
            .unwrap();

        let counts = db.feeds_with_counts().await.unwrap();
        assert_eq!(counts[0].entry_count, 2);

        let entries = db.entries_for_feed(feed_id).await.unwrap();
        db.mark_entry_read(entries[0].id).await.unwrap();

        let counts = db.feeds_with_counts().await.unwrap();
        assert_eq!(counts[0].entry_count, 1);
    }

    #[tokio::test]
    async fn test_mark_feed_read() {
        let db = test_db().await;
        let feed_id = seed_feed(&db, 1, None).await;
        let other_id = seed_feed(&db, 2, None).await;
        db.insert_entries(feed_id, &[test_entry("a"), test_entry("b")])
            .await
            .unwrap();
        db.insert_entries(other_id, &[test_entry("c")]).await.unwrap();

        db.mark_feed_read(feed_id).await.unwrap();

        let counts = db.feeds_with_counts().await.unwrap();
        let by_id = |id: i64| counts.iter().find(|c| c.feed.id == id).unwrap().entry_count;
        assert_eq!(by_id(feed_id), 0);
        assert_eq!(by_id(other_id), 1, "other feeds are untouched");
    }

    #[tokio::test]
    async fn test_mark_group_read_covers_children_only() {
        let db = test_db().await;

        db.insert_feeds(&[
            Feed {
                id: 1,
                title: "Group".to_string(),
                is_group: true,
                ..Feed::default()
            },
            Feed {
                id: 2,
                title: "Child".to_string(),
                link: "https://child.example.com/rss".to_string(),
                group_id: Some(1),
                ..Feed::default()
            },
            Feed {
                id: 3,
                title: "Loner".to_string(),
                link: "https://loner.example.com/rss".to_string(),
                ..Feed::default()
            },
        ])
        .await
        .unwrap();

        let feeds = db.all_feeds().await.unwrap();
        let group_id = feeds.iter().find(|f| f.is_group).unwrap().id;
        let child_id = feeds.iter().find(|f| f.group_id.is_some()).unwrap().id;
        let loner_id = feeds.iter().find(|f| f.title == "Loner").unwrap().id;

        db.insert_entries(child_id, &[test_entry("a")]).await.unwrap();
        db.insert_entries(loner_id, &[test_entry("b")]).await.unwrap();

        db.mark_group_read(group_id).await.unwrap();

        let counts = db.feeds_with_counts().await.unwrap();
        let by_id = |id: i64| counts.iter().find(|c| c.feed.id == id).unwrap().entry_count;
        assert_eq!(by_id(child_id), 0);
        assert_eq!(by_id(loner_id), 1);
    }

    #[tokio::test]
    async fn test_mark_all_read() {
        let db = test_db().await;
        let a = seed_feed(&db, 1, None).await;
        let b = seed_feed(&db, 2, None).await;
        db.insert_entries(a, &[test_entry("a")]).await.unwrap();
        db.insert_entries(b, &[test_entry("b")]).await.unwrap();

        db.mark_all_read().await.unwrap();

        let counts = db.feeds_with_counts().await.unwrap();
        assert!(counts.iter().all(|c| c.entry_count == 0));
    }
}
