//! C6 (reclamation half): per-system execution history and the watermark
//! algorithm that decides when a dead entity's slot can be recycled
//! (spec.md §4.6 "Reclamation watermark").

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

/// How many trailing executions a system's history keeps. A dead entity's
/// slot is only reclaimed once every live system has observed its removal
/// through at least this many of its own executions.
pub const RECLAIM_DELAY: usize = 3;

struct SystemHistory {
    /// Absolute event-ring indices captured at the start of each of this
    /// system's last `RECLAIM_DELAY` executions, oldest first.
    windows: VecDeque<u32>,
    last_seen_curr: u32,
}

impl SystemHistory {
    fn new(curr_event_index: u32) -> Self {
        let mut history = SystemHistory {
            windows: VecDeque::with_capacity(RECLAIM_DELAY),
            last_seen_curr: curr_event_index,
        };
        history.record_execution(curr_event_index);
        history
    }

    fn record_execution(&mut self, curr_event_index: u32) {
        self.last_seen_curr = curr_event_index;
        self.windows.push_back(curr_event_index);
        while self.windows.len() > RECLAIM_DELAY {
            self.windows.pop_front();
        }
    }

    /// The oldest index this system still needs events from, i.e. the index
    /// its watermark cannot pass. Until the system has executed
    /// `RECLAIM_DELAY` times it hasn't yet demonstrated it has seen
    /// everything up to any particular point, so the floor stays at `0`
    /// (nothing reclaimable) rather than jumping ahead on its first run.
    fn floor(&self) -> u32 {
        if self.windows.len() < RECLAIM_DELAY {
            0
        } else {
            *self.windows.front().unwrap()
        }
    }
}

/// Tracks one history entry per system id and computes the global
/// reclamation watermark: the event index below which every system has
/// already observed all removals.
pub struct HistoryTable {
    systems: FxHashMap<String, SystemHistory>,
    warned_stale: std::collections::HashSet<String>,
    max_events: u32,
    /// The event index reclamation last advanced to (spec.md §4.6
    /// `lastReclaimIndex`), used both to measure buffer pressure and as the
    /// lower bound of the next scan.
    last_reclaim_index: u32,
}

impl HistoryTable {
    pub fn new(max_events: u32) -> Self {
        HistoryTable {
            systems: FxHashMap::default(),
            warned_stale: std::collections::HashSet::new(),
            max_events,
            last_reclaim_index: 0,
        }
    }

    /// Returns the `prevEventIndex` this system should use for its next
    /// execution (its own watermark floor from the prior run, or `0` the
    /// first time it runs).
    pub fn prev_event_index(&self, system_id: &str) -> u32 {
        self.systems.get(system_id).map(|h| h.floor()).unwrap_or(0)
    }

    pub fn record_execution(&mut self, system_id: &str, curr_event_index: u32) {
        self.systems
            .entry(system_id.to_string())
            .and_modify(|h| h.record_execution(curr_event_index))
            .or_insert_with(|| SystemHistory::new(curr_event_index));
    }

    pub fn forget_system(&mut self, system_id: &str) {
        self.systems.remove(system_id);
        self.warned_stale.remove(system_id);
    }

    pub fn last_reclaim_index(&self) -> u32 {
        self.last_reclaim_index
    }

    /// Computes the next reclamation watermark per spec.md §4.6 steps 2-7
    /// and, if it advances, records it as the new `lastReclaimIndex`.
    /// Returns `None` when nothing is reclaimable yet (low-pressure
    /// blocking by a short-history system, or the computed watermark hasn't
    /// moved past the last one).
    pub fn advance_watermark(&mut self, curr_event_index: u32) -> Option<u32> {
        let watermark = if self.systems.is_empty() {
            curr_event_index
        } else {
            let pressure = curr_event_index.wrapping_sub(self.last_reclaim_index) as f64
                / self.max_events.max(1) as f64;

            if pressure <= 0.75 {
                // Any system that hasn't yet demonstrated RECLAIM_DELAY
                // executions blocks reclamation entirely.
                if self.systems.values().any(|h| h.windows.len() < RECLAIM_DELAY) {
                    return None;
                }
                self.systems.values().map(SystemHistory::floor).min().unwrap()
            } else {
                // High pressure: exclude systems that have fallen behind by
                // more than a quarter of the ring, warning once each: this
                // is the pressure-release escape so one forgotten/slow
                // system can't block reclamation forever. Short-history
                // systems among the rest are skipped (not counted toward
                // the minimum), not allowed to block at floor 0.
                let stale_threshold = self.max_events / 4;
                let mut candidates = Vec::new();
                let mut stale_ids = Vec::new();
                for (id, history) in self.systems.iter() {
                    let behind = curr_event_index.wrapping_sub(history.last_seen_curr);
                    if behind > stale_threshold {
                        stale_ids.push(id.clone());
                        continue;
                    }
                    if history.windows.len() < RECLAIM_DELAY {
                        continue;
                    }
                    candidates.push(history.floor());
                }
                for id in &stale_ids {
                    if self.warned_stale.insert(id.clone()) {
                        log::warn!(
                            "system {id}: excluded from reclamation watermark, buffer pressure exceeded 0.75 and system fell behind"
                        );
                    }
                }
                candidates.into_iter().min().unwrap_or(curr_event_index)
            }
        };

        if watermark <= self.last_reclaim_index {
            return None;
        }
        self.last_reclaim_index = watermark;
        Some(watermark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_system_floor_starts_at_registration_index() {
        let mut table = HistoryTable::new(1000);
        table.record_execution("sys_a", 10);
        assert_eq!(
            table.prev_event_index("sys_a"),
            0,
            "floor stays at 0 until RECLAIM_DELAY executions have happened"
        );
    }

    #[test]
    fn watermark_is_minimum_floor_across_systems() {
        let mut table = HistoryTable::new(1000);
        for curr in [1, 2, 3] {
            table.record_execution("a", curr);
        }
        for curr in [10, 20, 30] {
            table.record_execution("b", curr);
        }
        assert_eq!(
            table.advance_watermark(30),
            Some(1),
            "a's floor (oldest of its last 3) is the minimum"
        );
    }

    #[test]
    fn low_pressure_blocks_on_any_short_history_system() {
        let mut table = HistoryTable::new(1000);
        for curr in [1, 2, 3] {
            table.record_execution("a", curr);
        }
        table.record_execution("b", 1);
        assert_eq!(
            table.advance_watermark(3),
            None,
            "b has fewer than RECLAIM_DELAY executions and pressure is low, so it blocks"
        );
    }

    #[test]
    fn watermark_does_not_regress_once_advanced() {
        let mut table = HistoryTable::new(1000);
        for curr in [1, 2, 3] {
            table.record_execution("a", curr);
        }
        assert_eq!(table.advance_watermark(3), Some(1));
        assert_eq!(
            table.advance_watermark(3),
            None,
            "nothing moved forward since the last call"
        );
    }

    #[test]
    fn floor_only_advances_after_reclaim_delay_executions() {
        let mut table = HistoryTable::new(1000);
        table.record_execution("a", 1);
        table.record_execution("a", 2);
        assert_eq!(table.prev_event_index("a"), 0, "fewer than RECLAIM_DELAY executions so far");
        table.record_execution("a", 3);
        assert_eq!(table.prev_event_index("a"), 1, "oldest of the last 3 executions");
        table.record_execution("a", 4);
        assert_eq!(table.prev_event_index("a"), 2, "window slides forward by one");
    }

    #[test]
    fn high_pressure_excludes_stale_systems_and_skips_short_history_ones() {
        // max_events = 100, last_reclaim_index starts at 0, so scanning at
        // curr_event_index = 80 gives pressure = 0.8 > 0.75.
        let mut table = HistoryTable::new(100);
        for curr in [78, 79, 80] {
            table.record_execution("fresh", curr);
        }
        // Hasn't executed in 80 events, far past the stale_threshold (25):
        // excluded from the candidate set entirely rather than pinning the
        // watermark at its registration index.
        table.record_execution("stale", 0);
        // Executed recently but has fewer than RECLAIM_DELAY runs: skipped,
        // not treated as floor 0.
        table.record_execution("short_history", 80);

        assert_eq!(
            table.advance_watermark(80),
            Some(78),
            "stale and short-history systems excluded, fresh system's floor wins"
        );
    }

    #[test]
    fn high_pressure_falls_back_to_curr_when_every_system_is_excluded() {
        let mut table = HistoryTable::new(100);
        table.record_execution("stale", 0);
        assert_eq!(
            table.advance_watermark(80),
            Some(80),
            "every system excluded, so reclamation still makes progress up to curr"
        );
    }
}
