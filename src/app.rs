//! Operation boundary between the store and whatever observes it.
//!
//! `App` wires the database's change stream through the drawer projector,
//! exposes the deduplicated projection, and runs the user-facing operations:
//! OPML import/export (reporting outcomes as localized status strings on a
//! notification channel, never as propagated errors) and the closed set of
//! feed-management commands the drawer's context menu offers.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, watch};

use crate::config::{Config, Messages};
use crate::drawer::{self, DrawerProjector, FeedGroup};
use crate::opml;
use crate::storage::{Database, Feed};

// ============================================================================
// Commands
// ============================================================================

/// What a mark-read request applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    Group(i64),
    Feed(i64),
    Entry(i64),
}

impl Target {
    /// The mark-read scope a drawer row maps to: the aggregate marks
    /// everything, a group marks its children, a feed marks itself.
    pub fn for_feed(feed: &Feed) -> Self {
        if feed.id == Feed::ALL_ENTRIES_ID {
            Target::All
        } else if feed.is_group {
            Target::Group(feed.id)
        } else {
            Target::Feed(feed.id)
        }
    }
}

/// The feed-management command set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedAction {
    MarkRead(Target),
    Rename { id: i64, title: String },
    Delete(i64),
    SetFullText { id: i64, enabled: bool },
}

// ============================================================================
// App
// ============================================================================

pub struct App {
    db: Database,
    config: Config,
    groups: watch::Receiver<Arc<Vec<FeedGroup>>>,
    status_tx: mpsc::Sender<String>,
}

impl App {
    /// Wire up the drawer pump and the status channel. The returned receiver
    /// carries the user-visible status strings ("toasts").
    pub async fn new(db: Database, config: Config) -> Result<(Self, mpsc::Receiver<String>)> {
        let (mut projector, groups) = DrawerProjector::new(config.all_entries_label.clone());

        // Publish the initial projection before handing out receivers so a
        // fresh `groups()` snapshot is never behind the store.
        let feeds = db.feeds_with_counts().await?;
        projector.apply(&feeds);
        tokio::spawn(drawer::run_drawer(db.clone(), projector));

        let (status_tx, status_rx) = mpsc::channel(32);
        Ok((
            Self {
                db,
                config,
                groups,
                status_tx,
            },
            status_rx,
        ))
    }

    /// Current projection snapshot.
    pub fn groups(&self) -> Arc<Vec<FeedGroup>> {
        self.groups.borrow().clone()
    }

    /// A receiver that wakes on every republished projection.
    pub fn subscribe_groups(&self) -> watch::Receiver<Arc<Vec<FeedGroup>>> {
        self.groups.clone()
    }

    /// True if any feed in the current projection carries a fetch error.
    pub fn has_fetch_error(&self) -> bool {
        drawer::has_fetch_error(&self.groups.borrow())
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ========================================================================
    // OPML import/export
    // ========================================================================

    /// Import an OPML file into the store. Failures surface only as a
    /// status message; an OPML without feeds is a silent no-op.
    pub async fn import_opml(&self, path: &Path) {
        if let Err(e) = self.try_import(path).await {
            tracing::warn!(path = %path.display(), error = %e, "OPML import failed");
            self.post_status(self.config.messages.import_failed.clone())
                .await;
        }
    }

    async fn try_import(&self, path: &Path) -> Result<usize> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read OPML file: {}", path.display()))?;
        let feeds = opml::parse_with_fallback(&content)?;
        if feeds.is_empty() {
            tracing::debug!(path = %path.display(), "OPML contained no feeds");
            return Ok(0);
        }
        let inserted = self.db.insert_feeds(&feeds).await?;
        tracing::info!(path = %path.display(), inserted, "OPML import finished");
        Ok(inserted)
    }

    /// Export the full feed list as OPML. Both outcomes surface as status
    /// messages.
    pub async fn export_opml(&self, path: &Path) {
        match self.try_export(path).await {
            Ok(()) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                self.post_status(Messages::format(&self.config.messages.exported_to, &name))
                    .await;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "OPML export failed");
                self.post_status(self.config.messages.export_failed.clone())
                    .await;
            }
        }
    }

    async fn try_export(&self, path: &Path) -> Result<()> {
        let feeds = self.db.all_feeds().await?;
        let document = opml::render_document(&feeds, Utc::now())?;
        tokio::fs::write(path, document)
            .await
            .with_context(|| format!("Failed to write OPML file: {}", path.display()))?;
        Ok(())
    }

    // ========================================================================
    // Feed management
    // ========================================================================

    /// Dispatch one feed-management command against the store.
    pub async fn dispatch(&self, action: FeedAction) -> Result<()> {
        match action {
            FeedAction::MarkRead(Target::All) => self.db.mark_all_read().await,
            // The sentinel row is the whole list
            FeedAction::MarkRead(Target::Feed(id)) if id == Feed::ALL_ENTRIES_ID => {
                self.db.mark_all_read().await
            }
            FeedAction::MarkRead(Target::Feed(id)) => self.db.mark_feed_read(id).await,
            FeedAction::MarkRead(Target::Group(id)) => self.db.mark_group_read(id).await,
            FeedAction::MarkRead(Target::Entry(id)) => self.db.mark_entry_read(id).await,
            FeedAction::Rename { id, title } => self.db.rename_feed(id, &title).await,
            FeedAction::Delete(id) => self.db.delete_feed(id).await,
            FeedAction::SetFullText { id, enabled } => {
                self.db.set_retrieve_full_text(id, enabled).await
            }
        }
    }

    async fn post_status(&self, message: String) {
        if self.status_tx.send(message).await.is_err() {
            tracing::debug!("Status receiver dropped, message discarded");
        }
    }
}
