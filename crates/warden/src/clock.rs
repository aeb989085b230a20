// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Convert epoch millis to a local-zone datetime.
pub fn local_datetime(ms: u64) -> DateTime<Local> {
    Local
        .timestamp_millis_opt(ms as i64)
        .single()
        .unwrap_or_else(|| DateTime::from(std::time::UNIX_EPOCH))
}

/// Local calendar date for an epoch-millis timestamp.
pub fn local_date(ms: u64) -> NaiveDate {
    local_datetime(ms).date_naive()
}

/// Local wall-clock datetime (no zone) for an epoch-millis timestamp.
pub fn local_naive(ms: u64) -> NaiveDateTime {
    local_datetime(ms).naive_local()
}
