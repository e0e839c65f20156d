//! Gateway-sized batching.
//!
//! Batches are consecutive, order-preserving slices of the input. The engine
//! relies on position `i` of a batch lining up with ticket `i` of the
//! gateway response, so nothing here may reorder or drop items.

/// Maximum number of messages the Expo push API accepts per request.
pub const MAX_MESSAGES_PER_BATCH: usize = 100;

/// Maximum number of ticket ids per receipt request.
pub const MAX_RECEIPT_IDS_PER_REQUEST: usize = 300;

/// Split `items` into consecutive batches of at most `max_size` elements.
///
/// A `max_size` of zero is treated as one.
pub fn batches<T>(items: &[T], max_size: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(max_size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batches_preserve_order_and_size() {
        let items: Vec<u32> = (0..250).collect();
        let chunks: Vec<&[u32]> = batches(&items, MAX_MESSAGES_PER_BATCH).collect();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 100);
        assert_eq!(chunks[1].len(), 100);
        assert_eq!(chunks[2].len(), 50);

        let flattened: Vec<u32> = chunks.concat();
        assert_eq!(flattened, items);
    }

    #[test]
    fn test_empty_input_yields_no_batches() {
        let items: Vec<u32> = Vec::new();
        assert_eq!(batches(&items, 10).count(), 0);
    }

    #[test]
    fn test_zero_size_does_not_panic() {
        let items = [1, 2, 3];
        assert_eq!(batches(&items, 0).count(), 3);
    }
}
