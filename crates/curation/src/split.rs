use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tracing::debug;

use crate::{CurationError, FormattedRecord, Result};

pub const DEFAULT_SPLIT_SEED: u64 = 1234;

/// Size of the second partition: `round(total * fraction)`.
pub fn holdout_size(total: usize, fraction: f64) -> Result<usize> {
    if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
        return Err(CurationError::InvalidFraction(fraction));
    }
    Ok(((total as f64) * fraction).round() as usize)
}

/// Splits into `(first, second)` with `second.len() == round(len * fraction)`.
///
/// Membership comes from a seeded shuffle of indices; records keep their
/// relative order inside each partition.
pub fn split_dataset<T>(records: Vec<T>, fraction: f64, seed: u64) -> Result<(Vec<T>, Vec<T>)> {
    let total = records.len();
    let n_second = holdout_size(total, fraction)?;

    let mut order: Vec<usize> = (0..total).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let mut in_second = vec![false; total];
    for &i in &order[..n_second] {
        in_second[i] = true;
    }

    let mut first = Vec::with_capacity(total - n_second);
    let mut second = Vec::with_capacity(n_second);
    for (i, rec) in records.into_iter().enumerate() {
        if in_second[i] {
            second.push(rec);
        } else {
            first.push(rec);
        }
    }

    debug!(total, first = first.len(), second = second.len(), seed, "dataset split");
    Ok((first, second))
}

/// Stamps every record with its destination file.
pub fn retag(records: &mut [FormattedRecord], filename: &str) {
    for r in records {
        r.filename = filename.to_string();
    }
}
