use layerkv::compaction::{EntrySource, MergeIterator};
use layerkv::entry::Entry;
use layerkv::error::{LayerError, Result};

fn put(key: &str, value: &str, sequence: u64) -> Entry {
    Entry::put(key.as_bytes().to_vec(), value.as_bytes().to_vec(), sequence)
}

fn source(entries: Vec<Entry>) -> EntrySource {
    Box::new(entries.into_iter().map(Ok))
}

fn collect(sources: Vec<EntrySource>) -> Vec<Entry> {
    MergeIterator::new(sources)
        .collect::<Result<Vec<_>>>()
        .unwrap()
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_merge_interleaves_sorted_sources() {
    let merged = collect(vec![
        source(vec![put("a", "1", 1), put("c", "3", 3), put("e", "5", 5)]),
        source(vec![put("b", "2", 2), put("d", "4", 4)]),
    ]);

    let keys: Vec<&[u8]> = merged.iter().map(|e| e.key.as_slice()).collect();
    assert_eq!(keys, vec![&b"a"[..], &b"b"[..], &b"c"[..], &b"d"[..], &b"e"[..]]);
}

#[test]
fn test_merge_of_nothing() {
    assert!(collect(Vec::new()).is_empty());
    assert!(collect(vec![source(Vec::new()), source(Vec::new())]).is_empty());
}

// =============================================================================
// Deduplication Tests
// =============================================================================

#[test]
fn test_highest_sequence_wins() {
    let merged = collect(vec![
        source(vec![put("k", "older", 4)]),
        source(vec![put("k", "newer", 9)]),
        source(vec![put("k", "oldest", 1)]),
    ]);

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].value, b"newer");
    assert_eq!(merged[0].sequence, 9);
}

#[test]
fn test_tombstones_pass_through() {
    let merged = collect(vec![
        source(vec![put("a", "1", 1), put("k", "live", 2)]),
        source(vec![Entry::tombstone(b"k".to_vec(), 3)]),
    ]);

    assert_eq!(merged.len(), 2);
    assert!(merged[1].tombstone);
    assert_eq!(merged[1].sequence, 3);
}

#[test]
fn test_older_tombstone_is_superseded() {
    let merged = collect(vec![
        source(vec![Entry::tombstone(b"k".to_vec(), 1)]),
        source(vec![put("k", "back", 2)]),
    ]);

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].live_value(), Some(&b"back"[..]));
}

// =============================================================================
// Error Propagation
// =============================================================================

#[test]
fn test_source_error_is_surfaced() {
    let failing: EntrySource = Box::new(
        vec![
            Ok(put("a", "1", 1)),
            Err(LayerError::Storage("read failed".to_string())),
        ]
        .into_iter(),
    );

    let results: Vec<Result<Entry>> =
        MergeIterator::new(vec![failing, source(vec![put("b", "2", 2)])]).collect();
    assert!(results.iter().any(|r| r.is_err()));
}
