//! Ploidy comparison and reconciliation helpers shared by the chaining stages
//!

/// Allocated ploidy may exceed an SV's maximum ploidy by no more than this
pub const PLOIDY_CONSERVATION_TOLERANCE: f64 = 1e-6;

/// Absolute copy number difference under which two values are treated as equal
const COPY_NUMBER_ABS_DIFF_TOLERANCE: f64 = 0.5;

/// Relative copy number difference under which two values are treated as equal
const COPY_NUMBER_RELATIVE_DIFF_TOLERANCE: f64 = 0.15;

/// Test if two copy number or ploidy values are close enough to represent the same state
///
/// Values are equal if they are within either the absolute or relative difference tolerance.
///
pub fn copy_numbers_equal(cn1: f64, cn2: f64) -> bool {
    let diff = (cn1 - cn2).abs();
    if diff <= COPY_NUMBER_ABS_DIFF_TOLERANCE {
        return true;
    }
    let max_cn = cn1.abs().max(cn2.abs());
    max_cn > 0.0 && diff / max_cn <= COPY_NUMBER_RELATIVE_DIFF_TOLERANCE
}

/// Test if the ranges of two ploidy values, each extended by its uncertainty, intersect
///
pub fn ploidy_overlap(ploidy1: f64, uncertainty1: f64, ploidy2: f64, uncertainty2: f64) -> bool {
    ploidy1 - uncertainty1 <= ploidy2 + uncertainty2 && ploidy2 - uncertainty2 <= ploidy1 + uncertainty1
}

/// Combine two ploidy estimates by inverse-variance weighting
///
/// If either estimate has zero uncertainty it is treated as exact and returned directly. If both
/// are exact the mean is returned.
///
/// Returns a tuple of (ploidy, uncertainty)
///
pub fn combine_ploidy(
    ploidy1: f64,
    uncertainty1: f64,
    ploidy2: f64,
    uncertainty2: f64,
) -> (f64, f64) {
    match (uncertainty1 > 0.0, uncertainty2 > 0.0) {
        (false, false) => ((ploidy1 + ploidy2) / 2.0, 0.0),
        (false, true) => (ploidy1, 0.0),
        (true, false) => (ploidy2, 0.0),
        (true, true) => {
            let weight1 = 1.0 / (uncertainty1 * uncertainty1);
            let weight2 = 1.0 / (uncertainty2 * uncertainty2);
            let total_weight = weight1 + weight2;
            let ploidy = (ploidy1 * weight1 + ploidy2 * weight2) / total_weight;
            (ploidy, 1.0 / total_weight.sqrt())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_ulps_eq};

    #[test]
    fn test_copy_numbers_equal() {
        assert!(copy_numbers_equal(1.0, 1.4));
        assert!(!copy_numbers_equal(1.0, 2.0));
        assert!(copy_numbers_equal(10.0, 11.2));
        assert!(!copy_numbers_equal(10.0, 12.0));
        assert!(copy_numbers_equal(0.0, 0.0));
    }

    #[test]
    fn test_ploidy_overlap() {
        assert!(ploidy_overlap(1.0, 0.3, 1.5, 0.3));
        assert!(!ploidy_overlap(1.0, 0.1, 1.5, 0.1));
        assert!(ploidy_overlap(2.0, 0.0, 2.0, 0.0));
    }

    #[test]
    fn test_combine_ploidy() {
        let (ploidy, uncertainty) = combine_ploidy(1.0, 0.2, 2.0, 0.2);
        assert_abs_diff_eq!(ploidy, 1.5, epsilon = 1e-10);
        assert_abs_diff_eq!(uncertainty, 0.2 / 2f64.sqrt(), epsilon = 1e-10);

        // Weighting toward the more certain value:
        let (ploidy, _) = combine_ploidy(1.0, 0.1, 2.0, 0.2);
        assert_abs_diff_eq!(ploidy, 1.2, epsilon = 1e-10);

        // Exact values dominate:
        let (ploidy, uncertainty) = combine_ploidy(1.0, 0.0, 2.0, 0.2);
        assert_ulps_eq!(ploidy, 1.0);
        assert_ulps_eq!(uncertainty, 0.0);

        let (ploidy, uncertainty) = combine_ploidy(1.0, 0.3, 2.0, 0.0);
        assert_ulps_eq!(ploidy, 2.0);
        assert_ulps_eq!(uncertainty, 0.0);
    }
}
