//! Batch splitting.

use crate::job::Batch;

/// Splits `items` into consecutive batches of `batch_size`, keeping input
/// order. The last batch may be smaller. A size of 0 is treated as 1.
pub fn split_batches(items: &[String], batch_size: usize) -> Vec<Batch> {
    items
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(index, chunk)| Batch::new(index, chunk.to_vec()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("item-{i}")).collect()
    }

    #[test]
    fn test_exact_multiple() {
        let batches = split_batches(&items(3000), 25);
        assert_eq!(batches.len(), 120);
        assert_eq!(batches.last().unwrap().items.len(), 25);
    }

    #[test]
    fn test_short_last_batch() {
        let batches = split_batches(&items(2990), 25);
        assert_eq!(batches.len(), 120);
        assert_eq!(batches.last().unwrap().items.len(), 15);
        assert_eq!(batches[118].items.len(), 25);
    }

    #[test]
    fn test_last_batch_of_ten() {
        let batches = split_batches(&items(2985), 25);
        assert_eq!(batches.len(), 120);
        assert_eq!(batches.last().unwrap().items.len(), 10);
    }

    #[test]
    fn test_order_preserved() {
        let batches = split_batches(&items(7), 3);
        let flat: Vec<String> = batches.iter().flat_map(|b| b.items.clone()).collect();
        assert_eq!(flat, items(7));
        assert_eq!(batches.iter().map(|b| b.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_input() {
        assert!(split_batches(&[], 25).is_empty());
    }
}
