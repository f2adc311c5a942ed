//! Drawer projection: turns the flat feeds-with-counts list into the
//! hierarchy the navigation drawer shows (all-entries aggregate, then groups
//! and ungrouped feeds), publishing a new value only when it actually
//! changed so observers can treat "new value" as "visible change".

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::storage::{Database, Feed, FeedWithCount};

// ============================================================================
// FeedGroup
// ============================================================================

/// One drawer row group: a top-level feed (or group, or the synthetic
/// aggregate) paired with its child feeds.
///
/// Equality is structural and deep: parent fields, the full child sequence,
/// and every nested flag participate. Change suppression is a single `!=`
/// over the previous projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedGroup {
    pub feed_with_count: FeedWithCount,
    pub sub_feeds: Vec<FeedWithCount>,
}

impl FeedGroup {
    fn childless(feed_with_count: FeedWithCount) -> Self {
        Self {
            feed_with_count,
            sub_feeds: Vec::new(),
        }
    }
}

// ============================================================================
// Projection
// ============================================================================

/// Project the flat feed list into drawer groups.
///
/// The synthetic aggregate (sentinel id, `all_label`, count = sum of all
/// counts, no children) always comes first. The rest partitions by group
/// reference: top-level records keep their input order and collect the
/// children whose `group_id` matches their id.
pub fn project(feeds: &[FeedWithCount], all_label: &str) -> Vec<FeedGroup> {
    let all = FeedWithCount {
        feed: Feed {
            id: Feed::ALL_ENTRIES_ID,
            title: all_label.to_string(),
            ..Feed::default()
        },
        entry_count: feeds.iter().map(|f| f.entry_count).sum(),
    };

    let mut children: HashMap<i64, Vec<FeedWithCount>> = HashMap::new();
    let mut top_level: Vec<&FeedWithCount> = Vec::new();
    for fwc in feeds {
        match fwc.feed.group_id {
            Some(group_id) => children.entry(group_id).or_default().push(fwc.clone()),
            None => top_level.push(fwc),
        }
    }

    let mut groups = Vec::with_capacity(top_level.len() + 1);
    groups.push(FeedGroup::childless(all));
    for fwc in top_level {
        groups.push(FeedGroup {
            sub_feeds: children.remove(&fwc.feed.id).unwrap_or_default(),
            feed_with_count: fwc.clone(),
        });
    }
    groups
}

/// True if any parent or child in the projection carries a fetch error.
/// A pure query over published state, recomputed on demand.
pub fn has_fetch_error(groups: &[FeedGroup]) -> bool {
    groups.iter().any(|group| {
        group.feed_with_count.feed.fetch_error
            || group.sub_feeds.iter().any(|sub| sub.feed.fetch_error)
    })
}

// ============================================================================
// DrawerProjector
// ============================================================================

/// Owns the last published projection and the watch channel observers hang
/// off. The comparison-and-publish step reads and conditionally overwrites
/// `last`, so a projector must be driven by a single task; [`run_drawer`]
/// provides that discipline.
pub struct DrawerProjector {
    all_label: String,
    last: Arc<Vec<FeedGroup>>,
    tx: watch::Sender<Arc<Vec<FeedGroup>>>,
}

impl DrawerProjector {
    /// Create a projector and the receiver for its published projections.
    /// The initial published value is the empty projection.
    pub fn new(all_label: impl Into<String>) -> (Self, watch::Receiver<Arc<Vec<FeedGroup>>>) {
        let last: Arc<Vec<FeedGroup>> = Arc::new(Vec::new());
        let (tx, rx) = watch::channel(last.clone());
        (
            Self {
                all_label: all_label.into(),
                last,
                tx,
            },
            rx,
        )
    }

    /// Project `feeds` and publish the result if it differs from the last
    /// published projection. Returns whether a publication happened.
    pub fn apply(&mut self, feeds: &[FeedWithCount]) -> bool {
        let next = project(feeds, &self.all_label);
        if *self.last == next {
            return false;
        }
        let next = Arc::new(next);
        self.last = next.clone();
        self.tx.send_replace(next);
        true
    }

    /// Another receiver on the same channel.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<FeedGroup>>> {
        self.tx.subscribe()
    }
}

/// Pump the store's change notifications through a projector, one update at
/// a time in arrival order. Returns when the database side is dropped.
pub async fn run_drawer(db: Database, mut projector: DrawerProjector) {
    let mut changes = db.subscribe();
    loop {
        match db.feeds_with_counts().await {
            Ok(feeds) => {
                if projector.apply(&feeds) {
                    tracing::debug!(groups = projector.last.len(), "Drawer republished");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to query feeds for drawer"),
        }
        if changes.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn feed(id: i64, group_id: Option<i64>) -> FeedWithCount {
        FeedWithCount {
            feed: Feed {
                id,
                title: format!("Feed {}", id),
                link: format!("https://feed{}.example.com/rss", id),
                group_id,
                ..Feed::default()
            },
            entry_count: 0,
        }
    }

    fn group(id: i64) -> FeedWithCount {
        FeedWithCount {
            feed: Feed {
                id,
                title: format!("Group {}", id),
                is_group: true,
                ..Feed::default()
            },
            entry_count: 0,
        }
    }

    fn with_count(mut fwc: FeedWithCount, n: i64) -> FeedWithCount {
        fwc.entry_count = n;
        fwc
    }

    #[test]
    fn test_aggregate_first_with_summed_count() {
        let feeds = vec![
            with_count(feed(1, None), 3),
            with_count(group(2), 0),
            with_count(feed(3, Some(2)), 4),
        ];
        let groups = project(&feeds, "All entries");

        assert_eq!(groups[0].feed_with_count.feed.id, Feed::ALL_ENTRIES_ID);
        assert_eq!(groups[0].feed_with_count.feed.title, "All entries");
        assert_eq!(groups[0].feed_with_count.entry_count, 7);
        assert!(groups[0].sub_feeds.is_empty());
    }

    #[test]
    fn test_partition_children_under_their_group() {
        let feeds = vec![
            group(1),
            feed(2, Some(1)),
            feed(3, Some(1)),
            feed(4, None),
        ];
        let groups = project(&feeds, "All entries");

        assert_eq!(groups.len(), 3); // aggregate + group 1 + feed 4
        let g1 = &groups[1];
        assert_eq!(g1.feed_with_count.feed.id, 1);
        assert_eq!(
            g1.sub_feeds.iter().map(|f| f.feed.id).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert!(groups[2].sub_feeds.is_empty());
    }

    #[test]
    fn test_top_level_order_preserved() {
        let feeds = vec![feed(9, None), feed(2, None), feed(5, None)];
        let groups = project(&feeds, "All entries");
        let ids: Vec<i64> = groups[1..]
            .iter()
            .map(|g| g.feed_with_count.feed.id)
            .collect();
        assert_eq!(ids, vec![9, 2, 5]);
    }

    #[test]
    fn test_empty_input_still_projects_aggregate() {
        let groups = project(&[], "All entries");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].feed_with_count.entry_count, 0);
    }

    #[test]
    fn test_has_fetch_error_scans_children() {
        let mut feeds = vec![group(1), feed(2, Some(1))];
        let groups = project(&feeds, "All entries");
        assert!(!has_fetch_error(&groups));

        feeds[1].feed.fetch_error = true;
        let groups = project(&feeds, "All entries");
        assert!(has_fetch_error(&groups));
    }

    #[test]
    fn test_apply_publishes_once_for_identical_input() {
        let (mut projector, rx) = DrawerProjector::new("All entries");
        let feeds = vec![feed(1, None), group(2), feed(3, Some(2))];

        assert!(projector.apply(&feeds));
        // Same content, fresh instances: suppressed
        assert!(!projector.apply(&feeds.clone()));
        assert_eq!(rx.borrow().len(), 3);
    }

    #[test]
    fn test_apply_republishes_on_count_change() {
        let (mut projector, rx) = DrawerProjector::new("All entries");
        let mut feeds = vec![with_count(feed(1, None), 1)];
        assert!(projector.apply(&feeds));

        feeds[0].entry_count = 2;
        assert!(projector.apply(&feeds));
        assert_eq!(rx.borrow()[0].feed_with_count.entry_count, 2);
    }

    #[test]
    fn test_apply_republishes_on_nested_child_error_flag() {
        let (mut projector, _rx) = DrawerProjector::new("All entries");
        let mut feeds = vec![group(1), feed(2, Some(1))];
        assert!(projector.apply(&feeds));

        // Only a child's error flag flips; the parent rows are untouched.
        feeds[1].feed.fetch_error = true;
        assert!(projector.apply(&feeds));
        assert!(!projector.apply(&feeds));
    }

    #[test]
    fn test_watch_observers_see_latest_projection() {
        let (mut projector, rx) = DrawerProjector::new("All entries");
        let second = projector.subscribe();

        projector.apply(&[feed(1, None)]);
        assert_eq!(rx.borrow().len(), 2);
        assert_eq!(second.borrow().len(), 2);
    }

    // ========================================================================
    // Property tests
    // ========================================================================

    /// Arbitrary flat feed lists: a handful of groups first, then feeds that
    /// may or may not point at one of them.
    fn arb_feeds() -> impl Strategy<Value = Vec<FeedWithCount>> {
        (0usize..4, 0usize..12).prop_flat_map(|(n_groups, n_feeds)| {
            let groups: Vec<FeedWithCount> = (0..n_groups).map(|i| group(i as i64 + 1)).collect();
            let feed_vec = proptest::collection::vec(
                (0u8..=4, 0i64..50),
                n_feeds..=n_feeds,
            )
            .prop_map(move |specs| {
                let mut out = groups.clone();
                for (i, (slot, count)) in specs.into_iter().enumerate() {
                    let group_id = if n_groups > 0 && (slot as usize) < n_groups {
                        Some(slot as i64 + 1)
                    } else {
                        None
                    };
                    out.push(with_count(feed(100 + i as i64, group_id), count));
                }
                out
            });
            feed_vec
        })
    }

    proptest! {
        #[test]
        fn prop_aggregate_count_is_total(feeds in arb_feeds()) {
            let groups = project(&feeds, "All entries");
            let total: i64 = feeds.iter().map(|f| f.entry_count).sum();
            prop_assert_eq!(groups[0].feed_with_count.entry_count, total);
            prop_assert_eq!(groups[0].feed_with_count.feed.id, Feed::ALL_ENTRIES_ID);
        }

        #[test]
        fn prop_partition_is_complete_and_exact(feeds in arb_feeds()) {
            let groups = project(&feeds, "All entries");

            // Every grouped input appears exactly once as a child of the
            // matching parent; every ungrouped input exactly once at top level.
            for fwc in &feeds {
                match fwc.feed.group_id {
                    Some(gid) => {
                        let hits: usize = groups
                            .iter()
                            .map(|g| {
                                if g.feed_with_count.feed.id == gid {
                                    g.sub_feeds.iter().filter(|s| *s == fwc).count()
                                } else {
                                    g.sub_feeds.iter().filter(|s| s.feed.id == fwc.feed.id).count()
                                }
                            })
                            .sum();
                        prop_assert_eq!(hits, 1);
                    }
                    None => {
                        let hits = groups[1..]
                            .iter()
                            .filter(|g| g.feed_with_count == *fwc)
                            .count();
                        prop_assert_eq!(hits, 1);
                    }
                }
            }
        }

        #[test]
        fn prop_projection_is_idempotent(feeds in arb_feeds()) {
            let (mut projector, _rx) = DrawerProjector::new("All entries");
            projector.apply(&feeds);
            prop_assert!(!projector.apply(&feeds));
        }
    }
}
