// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Global settings and per-child configuration records.
//!
//! Every field carries a serde default so a partially-populated persisted
//! blob (or an older on-disk version) loads cleanly with documented
//! defaults filled in.

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::model::Category;

/// Global monitoring settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Monitor report interval in milliseconds.
    pub monitor_interval_ms: u64,
    /// Warning ladder thresholds in minutes, largest first.
    pub warning_times: Vec<u32>,
    /// Seconds between the "time up" warning and the logout action.
    pub grace_period_secs: u64,
    /// Stop counting computer time while the session is idle.
    pub pause_on_idle: bool,
    /// Kill processes that match a blocked pattern.
    pub kill_on_violation: bool,
    /// Notify the parent UI on violations.
    pub notify_parent: bool,
    /// Idle threshold in milliseconds before a session counts as idle.
    pub idle_threshold_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            monitor_interval_ms: 30_000,
            warning_times: vec![15, 5, 1],
            grace_period_secs: 60,
            pause_on_idle: true,
            kill_on_violation: true,
            notify_parent: true,
            idle_threshold_ms: 300_000,
        }
    }
}

/// Partial settings update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsPatch {
    pub monitor_interval_ms: Option<u64>,
    pub warning_times: Option<Vec<u32>>,
    pub grace_period_secs: Option<u64>,
    pub pause_on_idle: Option<bool>,
    pub kill_on_violation: Option<bool>,
    pub notify_parent: Option<bool>,
    pub idle_threshold_ms: Option<u64>,
}

impl Settings {
    /// Apply a partial update. Returns `true` if the monitor interval changed
    /// (the caller must push the new interval to every deployed monitor).
    pub fn apply(&mut self, patch: SettingsPatch) -> bool {
        let mut interval_changed = false;
        if let Some(v) = patch.monitor_interval_ms {
            interval_changed = v != self.monitor_interval_ms;
            self.monitor_interval_ms = v;
        }
        if let Some(v) = patch.warning_times {
            self.warning_times = v;
        }
        if let Some(v) = patch.grace_period_secs {
            self.grace_period_secs = v;
        }
        if let Some(v) = patch.pause_on_idle {
            self.pause_on_idle = v;
        }
        if let Some(v) = patch.kill_on_violation {
            self.kill_on_violation = v;
        }
        if let Some(v) = patch.notify_parent {
            self.notify_parent = v;
        }
        if let Some(v) = patch.idle_threshold_ms {
            self.idle_threshold_ms = v;
        }
        interval_changed
    }
}

// -- Per-child configuration --------------------------------------------------

/// Per-child configuration record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChildConfig {
    /// Daily computer-time cap in seconds. `None` = unlimited.
    pub daily_computer_secs: Option<u64>,
    /// Daily internet-time cap in seconds. `None` = unlimited.
    pub daily_internet_secs: Option<u64>,
    /// Ordered blocked process name patterns (case-insensitive substring).
    pub blocked_processes: Vec<String>,
    pub bedtime: Option<BedtimeRule>,
    pub schedules: Vec<ScheduleRule>,
    pub focus: Option<FocusProfile>,
}

/// Partial child-config update. A missing field is left unchanged; an
/// explicit `null` clears the field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChildPatch {
    #[serde(default, deserialize_with = "double_option")]
    pub daily_computer_secs: Option<Option<u64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub daily_internet_secs: Option<Option<u64>>,
    pub blocked_processes: Option<Vec<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub bedtime: Option<Option<BedtimeRule>>,
    pub schedules: Option<Vec<ScheduleRule>>,
    #[serde(default, deserialize_with = "double_option")]
    pub focus: Option<Option<FocusProfile>>,
}

/// Distinguish a missing field (outer `None`) from an explicit `null`
/// (`Some(None)`) during patch deserialization.
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    serde::Deserialize::deserialize(de).map(Some)
}

impl ChildConfig {
    pub fn apply(&mut self, patch: ChildPatch) {
        if let Some(v) = patch.daily_computer_secs {
            self.daily_computer_secs = v;
        }
        if let Some(v) = patch.daily_internet_secs {
            self.daily_internet_secs = v;
        }
        if let Some(v) = patch.blocked_processes {
            self.blocked_processes = v;
        }
        if let Some(v) = patch.bedtime {
            self.bedtime = v;
        }
        if let Some(v) = patch.schedules {
            self.schedules = v;
        }
        if let Some(v) = patch.focus {
            self.focus = v;
        }
    }
}

/// Bedtime rule: a local time-of-day deadline on a set of weekdays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BedtimeRule {
    pub enabled: bool,
    /// Local time of day, serialized as `"HH:MM"`.
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    /// Lowercase three-letter day names (`"mon"`..`"sun"`).
    pub days: Vec<String>,
}

impl BedtimeRule {
    pub fn applies_on(&self, day: Weekday) -> bool {
        self.days.iter().any(|d| parse_day(d) == Some(day))
    }
}

/// A named time-of-day schedule window with category allowances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRule {
    pub name: String,
    /// Lowercase three-letter day names (`"mon"`..`"sun"`).
    pub days: Vec<String>,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    #[serde(default)]
    pub allowed_categories: Vec<Category>,
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
}

impl ScheduleRule {
    /// Whether the window covers `day` at `time` (`start ≤ time < end`).
    pub fn active_at(&self, day: Weekday, time: NaiveTime) -> bool {
        self.days.iter().any(|d| parse_day(d) == Some(day))
            && self.start <= time
            && time < self.end
    }
}

/// Focus-mode profile: a temporary broadening of the blocked set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusProfile {
    pub hide_icons: Vec<String>,
    pub blocked_categories: Vec<Category>,
    pub blocked_apps: Vec<String>,
}

/// Parse a lowercase three-letter day name into a weekday.
pub fn parse_day(name: &str) -> Option<Weekday> {
    match name.to_lowercase().as_str() {
        "mon" => Some(Weekday::Mon),
        "tue" => Some(Weekday::Tue),
        "wed" => Some(Weekday::Wed),
        "thu" => Some(Weekday::Thu),
        "fri" => Some(Weekday::Fri),
        "sat" => Some(Weekday::Sat),
        "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Serde adapter for `NaiveTime` as `"HH:MM"`.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(de)?;
        NaiveTime::parse_from_str(&s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
