//! Classification of incoming events against the persisted window.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use ratingsync_core::{ChangeKind, EventKey, RatingEvent, RatingStore};

/// Output of change detection.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// New and changed events, in incoming order, one per key.
    pub write_set: Vec<RatingEvent>,
    /// Classification of every event in `write_set`.
    pub kinds: HashMap<EventKey, ChangeKind>,
    pub new_count: usize,
    pub changed_count: usize,
    /// Incoming events identical to their persisted copy.
    pub unchanged_count: usize,
    /// Incoming events dropped because a later event repeated their key.
    pub collapsed_duplicates: usize,
}

impl ChangeSet {
    #[must_use]
    pub fn kind_of(&self, key: &EventKey) -> Option<ChangeKind> {
        self.kinds.get(key).copied()
    }
}

/// Classifies `incoming` against `existing`.
///
/// Events repeating a key within `incoming` are collapsed first: the
/// survivor keeps the position of the first occurrence and the values of the
/// last. Then each event is `New` when no existing event shares its key,
/// `Changed` when one does but differs in a value field, and dropped
/// otherwise.
#[must_use]
pub fn detect_changes(incoming: Vec<RatingEvent>, existing: &[RatingEvent]) -> ChangeSet {
    let mut collapsed: Vec<RatingEvent> = Vec::with_capacity(incoming.len());
    let mut positions: HashMap<EventKey, usize> = HashMap::with_capacity(incoming.len());
    let mut collapsed_duplicates = 0usize;

    for event in incoming {
        let key = event.key();
        if let Some(&pos) = positions.get(&key) {
            collapsed[pos] = event;
            collapsed_duplicates += 1;
        } else {
            positions.insert(key, collapsed.len());
            collapsed.push(event);
        }
    }

    let persisted: HashMap<EventKey, &RatingEvent> =
        existing.iter().map(|e| (e.key(), e)).collect();

    let mut set = ChangeSet {
        collapsed_duplicates,
        ..ChangeSet::default()
    };
    for event in collapsed {
        let key = event.key();
        let kind = match persisted.get(&key) {
            None => ChangeKind::New,
            Some(stored) if stored.has_material_change(&event) => ChangeKind::Changed,
            Some(_) => {
                set.unchanged_count += 1;
                continue;
            }
        };
        match kind {
            ChangeKind::New => set.new_count += 1,
            ChangeKind::Changed => set.changed_count += 1,
        }
        set.kinds.insert(key, kind);
        set.write_set.push(event);
    }

    set
}

/// Loads the comparison window from a [`RatingStore`] and runs
/// [`detect_changes`].
///
/// Incoming events older than the window always classify as `New`; the
/// upsert makes re-writing them harmless.
#[derive(Debug, Clone, Copy)]
pub struct ChangeDetector {
    lookback: Duration,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(30)
    }
}

impl ChangeDetector {
    #[must_use]
    pub fn new(lookback_days: u32) -> Self {
        Self {
            lookback: Duration::days(i64::from(lookback_days)),
        }
    }

    /// Start of the comparison window for a run at `now`. Saturates at the
    /// earliest representable instant.
    #[must_use]
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Fetches persisted events since [`Self::window_start`], widened to the
    /// oldest incoming event, and classifies `incoming` against them.
    ///
    /// Widening keeps old feed events comparable, so re-syncing them is a
    /// no-op and a correction to one counts as changed.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the range query fails.
    pub async fn load_and_detect<S: RatingStore>(
        &self,
        store: &S,
        incoming: Vec<RatingEvent>,
        now: DateTime<Utc>,
    ) -> Result<ChangeSet, S::Error> {
        let window = self.window_start(now);
        let since = incoming
            .iter()
            .map(|e| e.timestamp)
            .min()
            .map_or(window, |oldest| oldest.min(window));
        let existing = store.events_since(since).await?;
        let incoming_count = incoming.len();
        let set = detect_changes(incoming, &existing);

        tracing::info!(
            since = %since,
            existing = existing.len(),
            incoming = incoming_count,
            new = set.new_count,
            changed = set.changed_count,
            unchanged = set.unchanged_count,
            collapsed = set.collapsed_duplicates,
            "change detection complete"
        );

        Ok(set)
    }
}
