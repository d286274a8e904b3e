//! Splitting an input sequence into per-worker chunks.

use crate::error::{Error, Result};

/// Split `items` into `parts` ordered chunks whose lengths differ by at most
/// one. The first `len % parts` chunks carry the extra element, so the
/// concatenation of all chunks in order reproduces the input exactly.
///
/// Zero-length chunks appear when there are fewer items than parts.
pub fn split<T>(items: Vec<T>, parts: usize) -> Result<Vec<Vec<T>>> {
    if parts == 0 {
        return Err(Error::Configuration(
            "worker count must be at least 1".into(),
        ));
    }

    let len = items.len();
    let base = len / parts;
    let extra = len % parts;

    let mut chunks = Vec::with_capacity(parts);
    let mut rest = items.into_iter();
    for index in 0..parts {
        let take = base + usize::from(index < extra);
        chunks.push(rest.by_ref().take(take).collect());
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_concatenate_to_input() {
        let chunks = split((0..11).collect(), 3).unwrap();
        assert_eq!(chunks.len(), 3);
        let rejoined: Vec<i32> = chunks.into_iter().flatten().collect();
        assert_eq!(rejoined, (0..11).collect::<Vec<_>>());
    }

    #[test]
    fn chunk_sizes_differ_by_at_most_one() {
        for len in 0..40usize {
            for parts in 1..10usize {
                let chunks = split((0..len).collect::<Vec<_>>(), parts).unwrap();
                let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
                assert_eq!(sizes.iter().sum::<usize>(), len);
                let max = sizes.iter().max().unwrap();
                let min = sizes.iter().min().unwrap();
                assert!(max - min <= 1, "len={len} parts={parts} sizes={sizes:?}");
            }
        }
    }

    #[test]
    fn more_parts_than_items_yields_empty_chunks() {
        let chunks = split(vec![1, 2], 5).unwrap();
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0], vec![1]);
        assert_eq!(chunks[1], vec![2]);
        assert!(chunks[2..].iter().all(Vec::is_empty));
    }

    #[test]
    fn zero_parts_is_a_configuration_error() {
        let result = split(vec![1, 2, 3], 0);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
