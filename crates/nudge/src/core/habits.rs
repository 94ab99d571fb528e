//! Habit-specific selection rules

use nudge_api::{DatabaseConfig, Record, Result, SyncError, DEFAULT_HABIT_DAYS};
use std::collections::HashSet;

/// Name of the checkbox property that means "done today".
///
/// The checkbox specification is either a single property name or a
/// comma-separated list indexed by weekday, Sunday first. A list entry that
/// is blank or missing for `weekday_from_sunday` falls back to the first
/// named entry.
pub fn habit_checkbox_property(db: &DatabaseConfig, weekday_from_sunday: usize) -> Result<String> {
    let raw = db.checkbox_property_name.trim();
    let raw = if raw.is_empty() { DEFAULT_HABIT_DAYS } else { raw };

    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    let mut named = parts.iter().copied().filter(|p| !p.is_empty());
    let first = named
        .next()
        .ok_or_else(|| SyncError::missing("checkbox_property_name"))?;
    if named.next().is_none() {
        return Ok(first.to_string());
    }

    match parts.get(weekday_from_sunday) {
        Some(part) if !part.is_empty() => Ok(part.to_string()),
        _ => Ok(first.to_string()),
    }
}

/// Drops later records whose trimmed title repeats an earlier one.
/// Untitled records are keyed by id instead.
pub fn unique_by_title(records: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|record| {
            let title = record.title.trim();
            let key = if title.is_empty() {
                record.id.clone()
            } else {
                title.to_string()
            };
            seen.insert(key)
        })
        .collect()
}

/// Habits still to do today.
pub fn filter_unchecked(records: Vec<Record>) -> Vec<Record> {
    records.into_iter().filter(|r| !r.checked).collect()
}
