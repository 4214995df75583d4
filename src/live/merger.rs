// =============================================================================
// Entity Merger — applies live events and REST snapshots to the store
// =============================================================================
//
// The only writer of entity state. Every operation is a pure function of the
// current records plus its input, so replaying the same tick is a no-op.
//
//   apply_tick          price update for matching positions + watchlist rows
//   apply_order_update  latest-order slot (a hint, never order history)
//   replace_*           full replacement from a REST snapshot
//   edit_notes          local notes on a position; ticks never touch notes
// =============================================================================

use std::sync::Arc;

use tracing::{debug, info};

use crate::live::events::{OrderEvent, TickEvent};
use crate::live::records::{PositionRecord, PositionSnapshot, WatchlistRecord};
use crate::live::store::LiveStateStore;

/// How many rows a tick touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub positions_matched: usize,
    pub watchlist_matched: usize,
}

impl TickOutcome {
    pub fn is_unmatched(&self) -> bool {
        self.positions_matched == 0 && self.watchlist_matched == 0
    }
}

pub struct EntityMerger {
    store: Arc<LiveStateStore>,
}

impl EntityMerger {
    pub fn new(store: Arc<LiveStateStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<LiveStateStore> {
        &self.store
    }

    /// Apply a price tick to every record keyed by `tick.instrument_key`.
    /// Unknown instruments are ignored; rows are never inserted from a tick.
    pub fn apply_tick(&self, tick: &TickEvent) -> TickOutcome {
        let key = tick.instrument_key.as_str();
        let price = tick.last_traded_price;
        let mut outcome = TickOutcome::default();

        self.store.write_positions(|positions| {
            let mut changed = false;
            for pos in positions.iter_mut().filter(|p| p.instrument == key) {
                outcome.positions_matched += 1;
                let before = pos.clone();
                pos.apply_price(price);
                changed |= *pos != before;
            }
            changed
        });

        self.store.write_watchlist(|rows| {
            let mut changed = false;
            for row in rows.iter_mut().filter(|r| r.trading_symbol == key) {
                outcome.watchlist_matched += 1;
                if row.last_traded_price != Some(price) {
                    row.last_traded_price = Some(price);
                    changed = true;
                }
            }
            changed
        });

        if outcome.is_unmatched() {
            debug!(instrument = %key, "tick for unknown instrument ignored");
        }
        outcome
    }

    /// Record `event` as the latest order update for display.
    pub fn apply_order_update(&self, event: &OrderEvent) {
        debug!(order_id = %event.order_id, status = %event.status, "order update received");
        self.store.set_latest_order(event.clone());
    }

    /// Replace the whole position collection with a fresh REST snapshot.
    pub fn replace_positions(&self, snapshot: Vec<PositionSnapshot>) {
        let records: Vec<PositionRecord> = snapshot.into_iter().map(PositionRecord::from).collect();
        let count = records.len();
        self.store.write_positions(move |positions| {
            *positions = records;
            true
        });
        info!(count, "positions snapshot applied");
    }

    /// Replace the whole watchlist with a fresh REST snapshot.
    pub fn replace_watchlist(&self, snapshot: Vec<WatchlistRecord>) {
        let count = snapshot.len();
        self.store.write_watchlist(move |rows| {
            *rows = snapshot;
            true
        });
        info!(count, "watchlist snapshot applied");
    }

    /// Set (or clear, with an empty string) the local notes on a position.
    /// Returns `false` if no position matches `instrument`.
    pub fn edit_notes(&self, instrument: &str, notes: &str) -> bool {
        let notes = notes.trim();
        let value = if notes.is_empty() { None } else { Some(notes.to_string()) };
        let mut found = false;
        self.store.write_positions(|positions| {
            let mut changed = false;
            for pos in positions.iter_mut().filter(|p| p.instrument == instrument) {
                found = true;
                if pos.notes != value {
                    pos.notes = value.clone();
                    changed = true;
                }
            }
            changed
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tick(key: &str, price: f64) -> TickEvent {
        TickEvent {
            instrument_key: key.to_string(),
            last_traded_price: price,
            timestamp: Utc::now(),
        }
    }

    fn seeded() -> EntityMerger {
        let merger = EntityMerger::new(Arc::new(LiveStateStore::new()));
        let positions: Vec<PositionSnapshot> = serde_json::from_str(
            r#"[{"instrument":"INFY","qty":10,"avg_cost":100,"ltp":100},
                {"instrument":"FREE","qty":4,"avg_cost":0,"ltp":0}]"#,
        )
        .unwrap();
        merger.replace_positions(positions);
        merger.replace_watchlist(vec![WatchlistRecord::new("INFY"), WatchlistRecord::new("TCS")]);
        merger
    }

    #[test]
    fn tick_updates_matching_position_and_watchlist_row() {
        let merger = seeded();
        let outcome = merger.apply_tick(&tick("INFY", 110.0));
        assert_eq!(outcome, TickOutcome { positions_matched: 1, watchlist_matched: 1 });

        let p = merger.store().position("INFY").unwrap();
        assert!((p.invested - 1000.0).abs() < 1e-9);
        assert!((p.current_value - 1100.0).abs() < 1e-9);
        assert!((p.pnl - 100.0).abs() < 1e-9);
        assert!((p.net_change_percent - 10.0).abs() < 1e-9);

        let rows = merger.store().watchlist();
        assert_eq!(rows[0].last_traded_price, Some(110.0));
        assert_eq!(rows[1].last_traded_price, None);
    }

    #[test]
    fn repeated_tick_is_idempotent() {
        let merger = seeded();
        let t = tick("INFY", 123.45);
        merger.apply_tick(&t);
        let once = merger.store().positions();
        let v = merger.store().version();

        for _ in 0..5 {
            merger.apply_tick(&t);
        }
        assert_eq!(merger.store().positions(), once);
        assert_eq!(merger.store().version(), v);
    }

    #[test]
    fn zero_cost_position_never_yields_nan() {
        let merger = seeded();
        for price in [0.0, 1.0, 1e12] {
            merger.apply_tick(&tick("FREE", price));
            let p = merger.store().position("FREE").unwrap();
            assert_eq!(p.net_change_percent, 0.0);
        }
    }

    #[test]
    fn unknown_instrument_leaves_collections_untouched() {
        let merger = seeded();
        let positions = merger.store().positions();
        let rows = merger.store().watchlist();
        let v = merger.store().version();

        let outcome = merger.apply_tick(&tick("FOO", 1.0));
        assert!(outcome.is_unmatched());
        assert_eq!(merger.store().positions(), positions);
        assert_eq!(merger.store().watchlist(), rows);
        assert_eq!(merger.store().version(), v);
    }

    #[test]
    fn notes_survive_ticks_and_snapshot_replaces_them() {
        let merger = seeded();
        assert!(merger.edit_notes("INFY", "  trail after results "));
        merger.apply_tick(&tick("INFY", 111.0));
        assert_eq!(merger.store().position("INFY").unwrap().notes.as_deref(), Some("trail after results"));

        assert!(!merger.edit_notes("NOPE", "x"));

        merger.replace_positions(Vec::new());
        assert!(merger.store().positions().is_empty());
        merger.apply_tick(&tick("INFY", 112.0));
        assert!(merger.store().positions().is_empty());
    }

    #[test]
    fn order_update_is_single_slot() {
        let merger = seeded();
        let first: OrderEvent = serde_json::from_str(r#"{"order_id":"1","status":"pending"}"#).unwrap();
        let second: OrderEvent = serde_json::from_str(r#"{"order_id":"2","status":"failed"}"#).unwrap();
        merger.apply_order_update(&first);
        merger.apply_order_update(&second);
        assert_eq!(merger.store().latest_order_update(), Some(second));
    }
}
