//! Numeric aggregation primitives.

pub(crate) fn sum(nums: &[f64]) -> f64 {
    nums.iter().sum()
}

pub(crate) fn mean(nums: &[f64]) -> Option<f64> {
    if nums.is_empty() {
        return None;
    }
    Some(sum(nums) / nums.len() as f64)
}

pub(crate) fn median(nums: &[f64]) -> Option<f64> {
    if nums.is_empty() {
        return None;
    }
    let mut sorted = nums.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid] + sorted[mid - 1]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Population variance.
pub(crate) fn variance(nums: &[f64]) -> Option<f64> {
    let m = mean(nums)?;
    mean(&nums.iter().map(|x| (x - m) * (x - m)).collect::<Vec<_>>())
}

pub(crate) fn stdev(nums: &[f64]) -> Option<f64> {
    variance(nums).map(f64::sqrt)
}

pub(crate) fn max(nums: &[f64]) -> Option<f64> {
    nums.iter().copied().reduce(f64::max)
}

pub(crate) fn min(nums: &[f64]) -> Option<f64> {
    nums.iter().copied().reduce(f64::min)
}
