//! Range query helpers for prefix scans and ordered index keys.

/// Calculate the exclusive end bound for a prefix range query.
///
/// Given prefix "flow-001:", returns "flow-001;" (next ASCII char after ':').
/// This allows efficient range scans: range(prefix..end_prefix)
pub fn prefix_end_bound(prefix: &str) -> String {
    if prefix.is_empty() {
        return String::new();
    }

    let mut bytes = prefix.as_bytes().to_vec();
    if let Some(last) = bytes.last_mut() {
        *last = last.saturating_add(1);
    }

    String::from_utf8(bytes).unwrap_or_else(|_| format!("{}\x7F", prefix))
}

/// Create a prefix range for redb queries.
pub fn prefix_range(prefix: &str) -> (String, String) {
    (prefix.to_string(), prefix_end_bound(prefix))
}

/// Build a lexicographically ordered key for a millisecond timestamp.
///
/// Negative timestamps clamp to zero so they sort first.
pub fn timestamp_key(timestamp_ms: i64, id: &str) -> String {
    format!("{:020}:{}", timestamp_ms.max(0) as u64, id)
}

/// Exclusive upper bound covering every `timestamp_key` at or before `timestamp_ms`.
pub fn timestamp_upper_bound(timestamp_ms: i64) -> String {
    prefix_end_bound(&format!("{:020}:", timestamp_ms.max(0) as u64))
}
