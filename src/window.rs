//! Per-user sliding-window state, owned exclusively by the featurizer's
//! single consumer task (spec §4.3, §5): no locking, because there is
//! exactly one writer.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::schema::Event;

/// Retention horizon for a user's window (spec §3).
pub const RETENTION: Duration = Duration::from_secs(48 * 3600);

/// The three rolling horizons features are derived over (spec §4.3).
pub const WINDOW_5M: Duration = Duration::from_secs(300);
pub const WINDOW_1H: Duration = Duration::from_secs(3600);
pub const WINDOW_24H: Duration = Duration::from_secs(86_400);

/// The retained event history for one user, plus the running aggregates
/// used for the z-score baseline.
#[derive(Debug, Default)]
pub struct UserWindow {
    events: VecDeque<Event>,
    total_amount: f64,
    amount_count: u64,
}

impl UserWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_amount(&self) -> f64 {
        self.total_amount
    }

    pub fn amount_count(&self) -> u64 {
        self.amount_count
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> impl DoubleEndedIterator<Item = &Event> {
        self.events.iter()
    }

    /// Events with `ts >= now - horizon`, oldest first.
    pub fn within(&self, now: DateTime<Utc>, horizon: Duration) -> impl Iterator<Item = &Event> {
        let cutoff = now - chrono::Duration::from_std(horizon).expect("horizon fits in range");
        self.events.iter().filter(move |e| e.ts >= cutoff)
    }

    /// Inserts `event`, then evicts the prefix older than the 48h retention
    /// bound relative to `now`. The event is inserted first so it is
    /// included in every downstream computation (spec §4.3 ordering rule).
    pub fn insert(&mut self, event: Event, now: DateTime<Utc>) {
        self.total_amount += event.amount;
        self.amount_count += 1;
        self.events.push_back(event);
        self.evict(now);
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::from_std(RETENTION).expect("retention fits in range");
        while let Some(front) = self.events.front() {
            if front.ts < cutoff {
                let dropped = self.events.pop_front().expect("front just checked Some");
                self.total_amount -= dropped.amount;
                self.amount_count -= 1;
            } else {
                break;
            }
        }
    }
}

/// All per-user windows live in one map; the featurizer's single consumer
/// task is the only writer, so no synchronization is needed (spec §5).
#[derive(Debug, Default)]
pub struct WindowStore {
    windows: HashMap<String, UserWindow>,
}

impl WindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, user_id: &str) -> &mut UserWindow {
        self.windows.entry(user_id.to_string()).or_default()
    }

    pub fn get(&self, user_id: &str) -> Option<&UserWindow> {
        self.windows.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
