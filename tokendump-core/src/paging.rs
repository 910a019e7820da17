//! Paging helpers for batched remote lookups.

/// Partitions `items` into fixed-size pages.
///
/// Produces `ceil(items.len() / page_size)` pages; only the final page may be
/// short. Every item appears in exactly one page, in the original order.
///
/// # Panics
///
/// Panics if `page_size` is zero.
pub fn pages<T>(items: &[T], page_size: usize) -> impl Iterator<Item = &[T]> {
    assert!(page_size > 0, "page_size must be positive");
    items.chunks(page_size)
}
