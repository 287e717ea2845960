//! Small string key-value side table, used to persist observability
//! snapshots (and anything else small) across restarts.

use super::Store;
use crate::error::Result;

pub fn get(store: &Store, key: &str) -> Result<Option<String>> {
    store.with_connection(|conn| {
        let value = conn
            .query_row(
                "SELECT value FROM runtime_meta WHERE key = ?1",
                [key],
                |row| row.get::<_, String>(0),
            )
            .ok();
        Ok(value)
    })
}

pub fn set(store: &Store, key: &str, value: &str) -> Result<()> {
    store.with_connection(|conn| {
        conn.execute(
            "INSERT INTO runtime_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_value() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(get(&store, "k").unwrap(), None);
        set(&store, "k", "v1").unwrap();
        assert_eq!(get(&store, "k").unwrap(), Some("v1".to_string()));
        set(&store, "k", "v2").unwrap();
        assert_eq!(get(&store, "k").unwrap(), Some("v2".to_string()));
    }
}
