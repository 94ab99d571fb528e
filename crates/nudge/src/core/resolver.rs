//! Logical database lookup
//!
//! Maps a `(key, kind)` request onto one entry of the current `Config`.

use nudge_api::{Config, ConfigStateError, DatabaseConfig, DatabaseKind, Result};

/// Picks the database a request addresses.
///
/// An empty key selects the first database of `kind`. A non-empty key must
/// match exactly; the entry's kind is not checked here, callers that need a
/// particular kind use [`require_kind`]. Disabled entries are never returned.
pub fn resolve_database<'a>(
    config: &'a Config,
    key: &str,
    kind: DatabaseKind,
) -> Result<&'a DatabaseConfig> {
    let key = key.trim();
    let db = if key.is_empty() {
        config
            .first_database_by_kind(kind)
            .ok_or(ConfigStateError::NotConfigured { kind })?
    } else {
        config
            .database_by_key(key)
            .ok_or_else(|| ConfigStateError::NotFound {
                key: key.to_string(),
            })?
    };
    if !db.enabled {
        return Err(ConfigStateError::Disabled {
            key: db.key.clone(),
        }
        .into());
    }
    Ok(db)
}

pub fn require_kind(db: &DatabaseConfig, expected: DatabaseKind) -> Result<()> {
    if db.kind != expected {
        return Err(ConfigStateError::WrongKind {
            key: db.key.clone(),
            expected,
        }
        .into());
    }
    Ok(())
}
