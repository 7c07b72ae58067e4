//! Storage Module
//!
//! SQLite-backed stores owned by the persistence provider: the durable
//! chain log and the disposable relational snapshot.

mod chain_store;
mod snapshot;

pub use chain_store::ChainStore;
pub use snapshot::{QueryResult, SnapshotStore};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rusqlite::types::ValueRef;

/// Render a column value as text for query results.
///
/// NULL becomes the empty string; blobs that are not valid UTF-8 are
/// rendered as base64.
pub(crate) fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => match std::str::from_utf8(b) {
            Ok(s) => s.to_string(),
            Err(_) => STANDARD.encode(b),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(ValueRef::Null), "");
        assert_eq!(render_value(ValueRef::Integer(-7)), "-7");
        assert_eq!(render_value(ValueRef::Real(1.5)), "1.5");
        assert_eq!(render_value(ValueRef::Text(b"abc")), "abc");
        assert_eq!(render_value(ValueRef::Blob(b"key")), "key");
        assert_eq!(render_value(ValueRef::Blob(&[0xff, 0x00])), "/wA=");
    }
}
