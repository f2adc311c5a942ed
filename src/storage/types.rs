use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another instance of the application has locked the database
    #[error("Another instance of vane appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscription or a group marker in the reading list.
///
/// Groups carry an empty `link` and the `is_group` flag; child feeds point at
/// their group through `group_id`. Equality is structural over every field;
/// the drawer projection relies on this for change detection, including the
/// `fetch_error` flag flipped by the external fetcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    /// Feed URL; empty for groups.
    pub link: String,
    /// Parent group id, `None` for top-level feeds and groups.
    pub group_id: Option<i64>,
    pub is_group: bool,
    pub retrieve_full_text: bool,
    /// Set by the external fetch process, cleared on success.
    pub fetch_error: bool,
}

impl Feed {
    /// Reserved id of the synthetic "all entries" aggregate. Never persisted;
    /// kept outside the positive rowid space so it cannot collide.
    pub const ALL_ENTRIES_ID: i64 = -1;
}

/// A feed joined with its current unread-entry count.
///
/// The count is computed by the store, not owned by the feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedWithCount {
    pub feed: Feed,
    pub entry_count: i64,
}

/// A stored article record, reduced to what unread counting and the
/// mark-read family need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub link: String,
    pub read: bool,
}

/// An entry about to be inserted for a feed.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub guid: String,
    pub title: String,
    pub link: String,
}

// ============================================================================
// Helper Types
// ============================================================================

/// Row type for feed queries
pub(crate) type FeedRow = (i64, String, String, Option<i64>, bool, bool, bool);

/// Row type for the feeds-with-unread-counts query
pub(crate) type FeedCountRow = (i64, String, String, Option<i64>, bool, bool, bool, i64);

pub(crate) fn feed_from_row(row: FeedRow) -> Feed {
    let (id, title, link, group_id, is_group, retrieve_full_text, fetch_error) = row;
    Feed {
        id,
        title,
        link,
        group_id,
        is_group,
        retrieve_full_text,
        fetch_error,
    }
}
