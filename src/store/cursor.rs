//! Opaque pagination cursors.
//!
//! A cursor carries `(filter-hash, offset)` so a page request can be
//! validated against the filter it was issued for: replaying a cursor with
//! a different filter is an *invalid-cursor* error, never silent garbage.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

use super::StoreError;
use crate::types::{Page, PageRequest};

/// Deterministic hash of a serializable filter.
pub fn filter_hash<F: Serialize>(filter: &F) -> u64 {
    // Struct field order is fixed, so the JSON bytes are canonical.
    let bytes = serde_json::to_vec(filter).unwrap_or_default();
    xxh64(&bytes, 0)
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorPayload {
    /// Filter hash, hex-encoded.
    f: String,
    /// Absolute offset of the next page.
    o: u64,
}

/// Encode a cursor for the page starting at `offset`.
pub fn encode(filter_hash: u64, offset: u64) -> String {
    let payload = CursorPayload {
        f: format!("{filter_hash:016x}"),
        o: offset,
    };
    let bytes = serde_json::to_vec(&payload).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode a cursor, verifying it was issued for the same filter.
pub fn decode(cursor: &str, expected_filter_hash: u64) -> Result<u64, StoreError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| StoreError::InvalidCursor("not base64url".to_string()))?;
    let payload: CursorPayload = serde_json::from_slice(&bytes)
        .map_err(|_| StoreError::InvalidCursor("malformed payload".to_string()))?;
    if payload.f != format!("{expected_filter_hash:016x}") {
        return Err(StoreError::InvalidCursor(
            "cursor was issued for a different filter".to_string(),
        ));
    }
    Ok(payload.o)
}

/// Page an already-filtered, deterministically-ordered item list.
///
/// Shared by the in-memory and sled backends, which materialize matches
/// before slicing; the relational backend pushes LIMIT/OFFSET into SQL and
/// only reuses the cursor codec.
pub fn paginate<T, F: Serialize>(
    items: Vec<T>,
    filter: &F,
    page: &PageRequest,
) -> Result<Page<T>, StoreError> {
    let hash = filter_hash(filter);
    let offset = match &page.cursor {
        Some(cursor) => decode(cursor, hash)? as usize,
        None => 0,
    };
    let limit = page.effective_limit();
    let total_count = items.len() as u64;

    let page_items: Vec<T> = items
        .into_iter()
        .skip(offset)
        .take(limit)
        .collect();
    let next_offset = offset + page_items.len();
    let has_more = (next_offset as u64) < total_count;

    Ok(Page {
        items: page_items,
        total_count,
        has_more,
        next_cursor: has_more.then(|| encode(hash, next_offset as u64)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeFilter;

    #[test]
    fn test_round_trip() {
        let hash = filter_hash(&NodeFilter::default());
        let cursor = encode(hash, 300);
        assert_eq!(decode(&cursor, hash).unwrap(), 300);
    }

    #[test]
    fn test_foreign_filter_rejected() {
        let all = filter_hash(&NodeFilter::default());
        let scoped = filter_hash(&NodeFilter {
            name_prefix: Some("db-".into()),
            ..NodeFilter::default()
        });
        assert_ne!(all, scoped);

        let cursor = encode(all, 100);
        assert!(matches!(
            decode(&cursor, scoped),
            Err(StoreError::InvalidCursor(_))
        ));
    }

    #[test]
    fn test_garbage_cursor_rejected() {
        let hash = filter_hash(&NodeFilter::default());
        assert!(matches!(
            decode("!!!not-base64!!!", hash),
            Err(StoreError::InvalidCursor(_))
        ));
        assert!(matches!(
            decode("bm90LWpzb24", hash), // "not-json"
            Err(StoreError::InvalidCursor(_))
        ));
    }

    #[test]
    fn test_paginate_walks_every_item_once() {
        let filter = NodeFilter::default();
        let items: Vec<u32> = (0..25).collect();

        let mut seen = Vec::new();
        let mut page = PageRequest::with_limit(10);
        loop {
            let result = paginate(items.clone(), &filter, &page).unwrap();
            assert_eq!(result.total_count, 25);
            seen.extend(result.items);
            match result.next_cursor {
                Some(cursor) => {
                    assert!(result.has_more);
                    page = PageRequest {
                        limit: Some(10),
                        cursor: Some(cursor),
                    };
                }
                None => {
                    assert!(!result.has_more);
                    break;
                }
            }
        }
        assert_eq!(seen, items);
    }

    #[test]
    fn test_offset_past_end_yields_empty_page() {
        let filter = NodeFilter::default();
        let hash = filter_hash(&filter);
        let page = PageRequest {
            limit: Some(10),
            cursor: Some(encode(hash, 999)),
        };
        let result = paginate((0..5).collect::<Vec<u32>>(), &filter, &page).unwrap();
        assert!(result.items.is_empty());
        assert!(!result.has_more);
        assert!(result.next_cursor.is_none());
    }
}
