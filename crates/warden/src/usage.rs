// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-(agent, child, activity) time accounting.
//!
//! Cells are advanced by telemetry timestamps only; the accountant owns no
//! timers. Elapsed time between reports is clamped to twice the report
//! interval so a telemetry gap never back-fills hours of usage.

use std::collections::{BTreeSet, HashMap};

use crate::clock::local_date;
use crate::model::Activity;

/// One accumulator for a (agent, child, activity) triple.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageCell {
    pub accumulated_seconds: u64,
    pub last_advance_ms: u64,
    /// Warning-ladder thresholds already emitted today (minutes).
    pub warnings_fired: BTreeSet<u32>,
}

type Key = (String, String, Activity);

/// All usage cells, keyed by (agent id, child id, activity).
#[derive(Debug, Default)]
pub struct UsageLedger {
    cells: HashMap<Key, UsageCell>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance a cell to `now_ms`. `count` decides whether the elapsed span
    /// accrues; either way the advance marker moves forward.
    ///
    /// Crossing a local-date boundary zeroes the cell and clears its fired
    /// warnings before advancing (midnight rollover).
    pub fn advance(
        &mut self,
        agent_id: &str,
        child_id: &str,
        activity: Activity,
        now_ms: u64,
        report_interval_ms: u64,
        count: bool,
    ) -> &UsageCell {
        let key = (agent_id.to_owned(), child_id.to_owned(), activity);
        let cell = self.cells.entry(key).or_default();

        if cell.last_advance_ms == 0 {
            // First observation: establish the marker, accrue nothing.
            cell.last_advance_ms = now_ms;
            return cell;
        }

        if local_date(now_ms) != local_date(cell.last_advance_ms) {
            // Midnight rollover: the cross-midnight span is dropped rather
            // than charged to either day.
            cell.accumulated_seconds = 0;
            cell.warnings_fired.clear();
            cell.last_advance_ms = now_ms;
            return cell;
        }

        let elapsed_ms = now_ms.saturating_sub(cell.last_advance_ms).min(2 * report_interval_ms);
        if count {
            cell.accumulated_seconds += elapsed_ms / 1000;
        }
        cell.last_advance_ms = now_ms;
        cell
    }

    pub fn cell(&self, agent_id: &str, child_id: &str, activity: Activity) -> Option<&UsageCell> {
        self.cells.get(&(agent_id.to_owned(), child_id.to_owned(), activity))
    }

    /// Mark a warning threshold fired for today. Returns `true` if it was not
    /// already marked (i.e. the caller should emit the warning).
    pub fn mark_warning(
        &mut self,
        agent_id: &str,
        child_id: &str,
        activity: Activity,
        threshold: u32,
    ) -> bool {
        let key = (agent_id.to_owned(), child_id.to_owned(), activity);
        self.cells.entry(key).or_default().warnings_fired.insert(threshold)
    }

    /// Flush an agent's cells when its session ends: tallies and fired
    /// warnings stay with their child for the rest of the day, but advance
    /// markers reset so the gap to the next session never accrues.
    pub fn flush_agent(&mut self, agent_id: &str) {
        for ((a, _, _), cell) in self.cells.iter_mut() {
            if a == agent_id {
                cell.last_advance_ms = 0;
            }
        }
    }

    /// Total accumulated seconds today for a child across agents.
    pub fn child_total(&self, child_id: &str, activity: Activity) -> u64 {
        self.cells
            .iter()
            .filter(|((_, c, act), _)| c == child_id && *act == activity)
            .map(|(_, cell)| cell.accumulated_seconds)
            .sum()
    }
}

#[cfg(test)]
#[path = "usage_tests.rs"]
mod tests;
