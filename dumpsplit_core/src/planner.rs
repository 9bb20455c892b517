use crate::error::{DumpError, Result};
use crate::format::MIN_TAIL_MARGIN;

/// How close to end of file the last split point may sit.
///
/// Large shards relative to the file get a margin proportional to the file
/// (a tenth of it) so tiny test files still split; otherwise the fixed
/// [`MIN_TAIL_MARGIN`] applies.
pub fn tail_margin(file_size: u64, shard_size: u64) -> u64 {
    if shard_size.saturating_mul(2) >= file_size {
        file_size / 10
    } else {
        MIN_TAIL_MARGIN
    }
}

/// Candidate split offsets for a file of `file_size` compressed bytes.
///
/// Offsets start at 0 and are spaced by `shard_size`. A last offset closer to
/// end of file than the tail margin is dropped, since the piece after it might
/// hold no block start or only a sliver of data. An empty result means the
/// file is not worth splitting at all.
pub fn split_offsets(file_size: u64, shard_size: u64) -> Result<Vec<u64>> {
    if shard_size == 0 {
        return Err(DumpError::planning("split size must be greater than zero"));
    }
    let margin = tail_margin(file_size, shard_size);
    if file_size <= shard_size.saturating_add(margin) {
        return Ok(Vec::new());
    }

    let mut offsets: Vec<u64> = (0..file_size).step_by(shard_size as usize).collect();
    if let Some(&last) = offsets.last() {
        if file_size - last < margin {
            offsets.pop();
        }
    }
    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proportional_margin_for_big_shards() {
        assert_eq!(tail_margin(1_000, 600), 100);
        assert_eq!(tail_margin(100_000_000, 30_000_000), MIN_TAIL_MARGIN);
    }

    #[test]
    fn margin_switches_at_exactly_half_the_file() {
        assert_eq!(tail_margin(1_000, 500), 100);
        assert_eq!(tail_margin(1_000, 499), MIN_TAIL_MARGIN);
        // half of 101 is 50.5, so 50 is below it
        assert_eq!(tail_margin(101, 51), 10);
        assert_eq!(tail_margin(101, 50), MIN_TAIL_MARGIN);
    }

    #[test]
    fn odd_sized_file_at_rounded_half_is_not_split() {
        assert!(split_offsets(101, 50).unwrap().is_empty());
        assert_eq!(split_offsets(1_000, 500).unwrap(), vec![0, 500]);
    }

    #[test]
    fn small_file_is_not_split() {
        assert!(split_offsets(1_000, 950).unwrap().is_empty());
        assert!(split_offsets(1_000, 5_000).unwrap().is_empty());
    }

    #[test]
    fn zero_shard_size_rejected() {
        assert!(split_offsets(1_000, 0).is_err());
    }
}
