//! Chunked collection persistence
//!
//! Browser storage caps the size of a single value, so large collections are
//! split across several keys:
//!
//! | key              | contents                                   |
//! |------------------|--------------------------------------------|
//! | `<name>`         | whole collection (when `len <= chunk_size`) |
//! | `<name>_count`   | number of chunks N                          |
//! | `<name>_{i}`     | chunk i, `0 <= i < N`, in write order       |
//!
//! Only one layout is live per collection; writing one layout removes the
//! keys of the other.

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::error::{EngagementError, Result};
use crate::storage::KeyValueStore;

pub fn count_key(name: &str) -> String {
    format!("{}_count", name)
}

pub fn chunk_key(name: &str, index: usize) -> String {
    format!("{}_{}", name, index)
}

/// Outcome of a collection write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    pub records: usize,
    /// 0 when the collection was written under its direct key
    pub chunks: usize,
    pub bytes: usize,
}

/// Read `<name>_count`. A malformed value is a corrupt chunk set.
fn stored_chunk_count<S>(store: &S, name: &str) -> Result<Option<usize>>
where
    S: KeyValueStore + ?Sized,
{
    match store.get(&count_key(name))? {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| EngagementError::CorruptChunkSet {
                collection: name.to_string(),
                reason: format!("bad chunk count {:?}: {}", raw, e),
            }),
    }
}

/// Previous value of every key a write touches, so a failed write can be undone.
#[derive(Debug, Default)]
struct Journal {
    saved: Vec<(String, Option<String>)>,
}

impl Journal {
    fn set<S>(&mut self, store: &mut S, key: &str, value: &str) -> Result<()>
    where
        S: KeyValueStore + ?Sized,
    {
        self.save(store, key)?;
        store.set(key, value)?;
        Ok(())
    }

    fn remove<S>(&mut self, store: &mut S, key: &str) -> Result<()>
    where
        S: KeyValueStore + ?Sized,
    {
        self.save(store, key)?;
        store.remove(key)?;
        Ok(())
    }

    fn save<S>(&mut self, store: &S, key: &str) -> Result<()>
    where
        S: KeyValueStore + ?Sized,
    {
        if !self.saved.iter().any(|(k, _)| k == key) {
            let previous = store.get(key)?;
            self.saved.push((key.to_string(), previous));
        }
        Ok(())
    }

    /// Put every touched key back, newest first. Returns the number of keys
    /// that could not be restored.
    fn restore<S>(self, store: &mut S) -> usize
    where
        S: KeyValueStore + ?Sized,
    {
        let mut failures = 0;
        for (key, previous) in self.saved.into_iter().rev() {
            let result = match previous {
                Some(value) => store.set(&key, &value),
                None => store.remove(&key),
            };
            if let Err(e) = result {
                warn!(key = %key, error = %e, "could not restore key after failed write");
                failures += 1;
            }
        }
        failures
    }
}

/// Serialize `records` under `name`, chunking above `chunk_size`.
///
/// On error every key touched so far is restored to its previous value, so
/// a failed write leaves the previous collection readable.
pub fn write_collection<T, S>(
    store: &mut S,
    name: &str,
    records: &[T],
    chunk_size: usize,
) -> Result<WriteReport>
where
    T: Serialize,
    S: KeyValueStore + ?Sized,
{
    let chunk_size = chunk_size.max(1);

    // An unreadable previous count only means we can't clean up old chunks
    let previous_chunks = match stored_chunk_count(store, name) {
        Ok(count) => count.unwrap_or(0),
        Err(e) => {
            warn!(collection = name, error = %e, "ignoring unreadable chunk count");
            0
        }
    };

    let mut journal = Journal::default();
    match write_layout(store, &mut journal, name, records, chunk_size, previous_chunks) {
        Ok(report) => Ok(report),
        Err(e) => {
            let touched = journal.saved.len();
            let unrestored = journal.restore(store);
            warn!(
                collection = name,
                error = %e,
                touched,
                unrestored,
                "write failed, previous collection restored"
            );
            Err(e)
        }
    }
}

fn write_layout<T, S>(
    store: &mut S,
    journal: &mut Journal,
    name: &str,
    records: &[T],
    chunk_size: usize,
    previous_chunks: usize,
) -> Result<WriteReport>
where
    T: Serialize,
    S: KeyValueStore + ?Sized,
{
    if records.len() <= chunk_size {
        let json = serde_json::to_string(records)?;
        journal.set(store, name, &json)?;
        // Direct key is live now; drop the chunked layout
        journal.remove(store, &count_key(name))?;
        for i in 0..previous_chunks {
            journal.remove(store, &chunk_key(name, i))?;
        }
        debug!(collection = name, records = records.len(), "wrote collection");
        return Ok(WriteReport {
            records: records.len(),
            chunks: 0,
            bytes: json.len(),
        });
    }

    let mut bytes = 0;
    let mut chunks = 0;
    for (i, chunk) in records.chunks(chunk_size).enumerate() {
        let json = serde_json::to_string(chunk)?;
        journal.set(store, &chunk_key(name, i), &json)?;
        bytes += json.len();
        chunks += 1;
    }
    // Count goes last so a reader never sees a count ahead of its chunks
    journal.set(store, &count_key(name), &chunks.to_string())?;
    journal.remove(store, name)?;
    for i in chunks..previous_chunks {
        journal.remove(store, &chunk_key(name, i))?;
    }

    debug!(
        collection = name,
        records = records.len(),
        chunks,
        "wrote chunked collection"
    );
    Ok(WriteReport {
        records: records.len(),
        chunks,
        bytes,
    })
}

/// Load a collection written by [`write_collection`]. Missing keys load as empty.
pub fn read_collection<T, S>(store: &S, name: &str) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    S: KeyValueStore + ?Sized,
{
    let Some(count) = stored_chunk_count(store, name)? else {
        return match store.get(name)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        };
    };

    let mut records = Vec::new();
    for i in 0..count {
        let json = store
            .get(&chunk_key(name, i))?
            .ok_or_else(|| EngagementError::CorruptChunkSet {
                collection: name.to_string(),
                reason: format!("chunk {} of {} missing", i, count),
            })?;
        let mut chunk: Vec<T> = serde_json::from_str(&json)?;
        records.append(&mut chunk);
    }
    Ok(records)
}

/// Remove every key a collection may occupy.
pub fn remove_collection<S>(store: &mut S, name: &str) -> Result<()>
where
    S: KeyValueStore + ?Sized,
{
    let chunks = stored_chunk_count(store, name).unwrap_or(None).unwrap_or(0);
    store.remove(name)?;
    store.remove(&count_key(name))?;
    for i in 0..chunks {
        store.remove(&chunk_key(name, i))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::MemoryStore;

    fn numbers(n: usize) -> Vec<u32> {
        (0..n as u32).collect()
    }

    #[test]
    fn test_small_collection_uses_direct_key() {
        let mut store = MemoryStore::new();
        let report = write_collection(&mut store, "reactions", &numbers(3), 5).unwrap();

        assert_eq!(report.chunks, 0);
        assert_eq!(store.keys(), vec!["reactions".to_string()]);
        let loaded: Vec<u32> = read_collection(&store, "reactions").unwrap();
        assert_eq!(loaded, numbers(3));
    }

    #[test]
    fn test_exactly_chunk_size_is_not_chunked() {
        let mut store = MemoryStore::new();
        let report = write_collection(&mut store, "reviews", &numbers(5), 5).unwrap();
        assert_eq!(report.chunks, 0);
        assert!(!store.contains_key("reviews_count"));
    }

    #[test]
    fn test_large_collection_is_chunked_in_order() {
        let mut store = MemoryStore::new();
        let report = write_collection(&mut store, "reactions", &numbers(12), 5).unwrap();

        assert_eq!(report.chunks, 3);
        assert_eq!(store.get("reactions_count").unwrap().as_deref(), Some("3"));
        assert_eq!(store.get("reactions_2").unwrap().as_deref(), Some("[10,11]"));
        assert!(!store.contains_key("reactions"));

        let loaded: Vec<u32> = read_collection(&store, "reactions").unwrap();
        assert_eq!(loaded, numbers(12));
    }

    #[test]
    fn test_shrinking_removes_stale_chunks() {
        let mut store = MemoryStore::new();
        write_collection(&mut store, "h", &numbers(12), 5).unwrap();
        write_collection(&mut store, "h", &numbers(7), 5).unwrap();

        assert_eq!(store.get("h_count").unwrap().as_deref(), Some("2"));
        assert!(!store.contains_key("h_2"));

        write_collection(&mut store, "h", &numbers(2), 5).unwrap();
        assert_eq!(store.keys(), vec!["h".to_string()]);
        let loaded: Vec<u32> = read_collection(&store, "h").unwrap();
        assert_eq!(loaded, numbers(2));
    }

    #[test]
    fn test_missing_collection_loads_empty() {
        let store = MemoryStore::new();
        let loaded: Vec<u32> = read_collection(&store, "nothing").unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_missing_chunk_is_corrupt() {
        let mut store = MemoryStore::new();
        write_collection(&mut store, "r", &numbers(12), 5).unwrap();
        store.remove("r_1").unwrap();

        let err = read_collection::<u32, _>(&store, "r").unwrap_err();
        assert!(matches!(err, EngagementError::CorruptChunkSet { .. }));
    }

    #[test]
    fn test_bad_count_is_corrupt() {
        let mut store = MemoryStore::new();
        store.set("r_count", "many").unwrap();
        let err = read_collection::<u32, _>(&store, "r").unwrap_err();
        assert!(matches!(err, EngagementError::CorruptChunkSet { .. }));
    }

    #[test]
    fn test_quota_failure_propagates() {
        let mut store = MemoryStore::with_value_limit(8);
        let err = write_collection(&mut store, "r", &numbers(50), 100).unwrap_err();
        assert!(matches!(err, EngagementError::Storage(_)));
    }

    fn words(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_failed_middle_chunk_keeps_previous_collection() {
        let mut store = MemoryStore::with_value_limit(40);
        write_collection(&mut store, "r", &words("old", 6), 2).unwrap();
        let keys_before = store.keys();

        let mut next = words("new", 6);
        next[2] = "x".repeat(50);
        let err = write_collection(&mut store, "r", &next, 2).unwrap_err();
        assert!(matches!(err, EngagementError::Storage(StorageError::QuotaExceeded { .. })));

        let loaded: Vec<String> = read_collection(&store, "r").unwrap();
        assert_eq!(loaded, words("old", 6));
        assert_eq!(store.keys(), keys_before);
    }

    #[test]
    fn test_failed_growth_removes_new_chunks() {
        let mut store = MemoryStore::with_value_limit(40);
        write_collection(&mut store, "r", &words("old", 4), 2).unwrap();

        let mut next = words("new", 8);
        next[7] = "x".repeat(50);
        write_collection(&mut store, "r", &next, 2).unwrap_err();

        assert!(!store.contains_key("r_2"));
        assert_eq!(store.get("r_count").unwrap().as_deref(), Some("2"));
        let loaded: Vec<String> = read_collection(&store, "r").unwrap();
        assert_eq!(loaded, words("old", 4));
    }

    #[test]
    fn test_failed_switch_to_direct_key_keeps_chunks() {
        let mut store = MemoryStore::new();
        write_collection(&mut store, "r", &words("old", 6), 2).unwrap();

        // The direct key lands but dropping the chunked layout fails
        store.set_fail_removes(true);
        write_collection(&mut store, "r", &words("new", 1), 2).unwrap_err();

        let loaded: Vec<String> = read_collection(&store, "r").unwrap();
        assert_eq!(loaded, words("old", 6));

        store.set_fail_removes(false);
        write_collection(&mut store, "r", &words("new", 1), 2).unwrap();
        assert_eq!(store.keys(), vec!["r".to_string()]);
        let loaded: Vec<String> = read_collection(&store, "r").unwrap();
        assert_eq!(loaded, words("new", 1));
    }

    #[test]
    fn test_remove_collection_clears_all_layouts() {
        let mut store = MemoryStore::new();
        write_collection(&mut store, "r", &numbers(12), 5).unwrap();
        remove_collection(&mut store, "r").unwrap();
        assert!(store.is_empty());
    }
}
