use bytes::Bytes;
use bytes::BytesMut;

pub(crate) fn is_majority(
    num: usize,
    count: usize,
) -> bool {
    num >= (count / 2) + 1
}

/// Smallest key strictly greater than `key` in byte order.
///
/// Used to resume a range read right after the last key already returned.
pub(crate) fn key_successor(key: &[u8]) -> Bytes {
    let mut next = BytesMut::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.extend_from_slice(&[0u8]);
    next.freeze()
}

/// `true` when `key` lies in `[start, end)`; an empty `end` is unbounded.
pub(crate) fn in_range(
    key: &[u8],
    start: &[u8],
    end: &[u8],
) -> bool {
    key >= start && (end.is_empty() || key < end)
}
