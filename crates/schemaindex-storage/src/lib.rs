//! schemaindex-storage — pluggable storage backends for SchemaIndex.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence)
//! - `sqlite` — SQLite via `sqlx` (embedded, single-file persistence)
//! - `postgres` — PostgreSQL via `sqlx` (production)
//!
//! Every backend implements [`BatchStore`](schemaindex_core::store::BatchStore)
//! and [`StateQuery`](schemaindex_core::store::StateQuery).

use serde_json::Value;

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStorage;

/// Rows per multi-row INSERT. Keeps every statement well below the
/// bind-parameter limits of SQLite (32766) and Postgres (65535).
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) const INSERT_CHUNK: usize = 500;

/// Text form of `value.<field>` used by value-field lookups.
pub(crate) fn value_field_text(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_field_text_forms() {
        let v = json!({"s": "red", "n": 10, "b": true, "z": null});
        assert_eq!(value_field_text(&v, "s").as_deref(), Some("red"));
        assert_eq!(value_field_text(&v, "n").as_deref(), Some("10"));
        assert_eq!(value_field_text(&v, "b").as_deref(), Some("true"));
        assert_eq!(value_field_text(&v, "z"), None);
        assert_eq!(value_field_text(&v, "missing"), None);
    }
}
