//! Label-flip poisoning.
//!
//! A malicious client flips every binary label it trains on. Evaluation
//! data is never touched.

/// Flip binary labels in place: `y -> 1 - y`.
///
/// Labels other than 0 and 1 are left unchanged.
pub fn flip_binary_labels(labels: &mut [usize]) {
    for y in labels.iter_mut() {
        *y = match *y {
            0 => 1,
            1 => 0,
            other => other,
        };
    }
}

/// Return a flipped copy of `labels`.
pub fn flipped(labels: &[usize]) -> Vec<usize> {
    let mut out = labels.to_vec();
    flip_binary_labels(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip_batch() {
        let mut batch = vec![0, 1, 1, 0];
        flip_binary_labels(&mut batch);
        assert_eq!(batch, vec![1, 0, 0, 1]);
    }

    #[test]
    fn test_flip_is_involution() {
        let batch = vec![0, 1, 1, 0, 1];
        assert_eq!(flipped(&flipped(&batch)), batch);
    }

    #[test]
    fn test_non_binary_labels_untouched() {
        assert_eq!(flipped(&[2, 0, 5]), vec![2, 1, 5]);
    }

    #[test]
    fn test_empty() {
        let mut empty: Vec<usize> = vec![];
        flip_binary_labels(&mut empty);
        assert!(empty.is_empty());
    }
}
