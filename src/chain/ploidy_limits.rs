//! Allele ploidy profile for each cluster chromosome, used to block candidate links which would
//! cross a region where the cluster's own chromosome copy is absent
//!

use std::collections::BTreeMap;

use crate::cluster::{AlleleSegment, ChrBreakendMap, Cluster};
use crate::int_range::IntRange;
use crate::log_utils::debug_msg;

use super::ploidy_utils::copy_numbers_equal;

/// Candidate links may not cross a valid segment with cluster ploidy below this value
pub const MIN_CLUSTER_PLOIDY: f64 = 0.15;

/// Fraction of segments which must share an allele ploidy for it to be treated as the fixed
/// background allele
const FIXED_ALLELE_SEGMENT_FRACTION: f64 = 0.9;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackgroundAllele {
    Major,
    Minor,
}

#[derive(Clone, Debug)]
pub struct PloidySegment {
    pub range: IntRange,
    pub major_allele_ploidy: f64,
    pub minor_allele_ploidy: f64,

    /// Ploidy of the cluster's chromosome copy in this segment, after removing the background allele
    pub cluster_ploidy: f64,

    /// False if the segment input is malformed or disagrees with the fixed background allele
    pub is_valid: bool,
}

impl PloidySegment {
    fn allele_ploidy(&self, allele: BackgroundAllele) -> f64 {
        match allele {
            BackgroundAllele::Major => self.major_allele_ploidy,
            BackgroundAllele::Minor => self.minor_allele_ploidy,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChromosomePloidyProfile {
    pub segments: Vec<PloidySegment>,

    /// The allele which is not disrupted by the cluster, if one could be found
    pub background_allele: Option<BackgroundAllele>,

    pub background_ploidy: f64,
}

/// Find the value shared by at least the fixed allele fraction of all input values
///
/// Returns the mean of the agreeing values
///
fn find_fixed_ploidy(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut best: Option<(usize, f64)> = None;
    for &value in values.iter() {
        let agreeing = values
            .iter()
            .filter(|&&x| copy_numbers_equal(value, x))
            .collect::<Vec<_>>();
        let count = agreeing.len();
        if best.is_none_or(|(best_count, _)| count > best_count) {
            let mean = agreeing.iter().copied().sum::<f64>() / count as f64;
            best = Some((count, mean));
        }
    }

    let (count, mean) = best?;
    let min_count = (FIXED_ALLELE_SEGMENT_FRACTION * values.len() as f64).ceil() as usize;
    if count >= min_count { Some(mean) } else { None }
}

impl ChromosomePloidyProfile {
    /// Build the ploidy profile from all allele segments intersecting the cluster span
    ///
    fn new(allele_segments: &[AlleleSegment], span: &IntRange) -> Self {
        let mut segments = allele_segments
            .iter()
            .filter(|x| x.range.intersect_range(span))
            .map(|x| PloidySegment {
                range: x.range.clone(),
                major_allele_ploidy: x.major_allele_ploidy,
                minor_allele_ploidy: x.minor_allele_ploidy,
                cluster_ploidy: 0.0,
                is_valid: x.range.is_valid()
                    && x.major_allele_ploidy.is_finite()
                    && x.minor_allele_ploidy.is_finite()
                    && x.major_allele_ploidy >= 0.0
                    && x.minor_allele_ploidy >= 0.0,
            })
            .collect::<Vec<_>>();
        segments.sort_by_key(|x| x.range.clone());

        let mut background = None;
        for allele in [BackgroundAllele::Minor, BackgroundAllele::Major] {
            let values = segments
                .iter()
                .filter(|x| x.is_valid)
                .map(|x| x.allele_ploidy(allele))
                .collect::<Vec<_>>();
            if let Some(ploidy) = find_fixed_ploidy(&values) {
                background = Some((allele, ploidy));
                break;
            }
        }

        let Some((allele, background_ploidy)) = background else {
            return Self {
                segments,
                background_allele: None,
                background_ploidy: 0.0,
            };
        };

        for segment in segments.iter_mut().filter(|x| x.is_valid) {
            let allele_ploidy = segment.allele_ploidy(allele);
            if !copy_numbers_equal(allele_ploidy, background_ploidy) {
                segment.is_valid = false;
                continue;
            }
            segment.cluster_ploidy = (segment.major_allele_ploidy + segment.minor_allele_ploidy
                - background_ploidy)
                .max(0.0);
        }

        Self {
            segments,
            background_allele: Some(allele),
            background_ploidy,
        }
    }

    /// Return false if the range intersects a valid segment with cluster ploidy below the minimum
    ///
    /// Any overlap blocks the range, including a range lying entirely inside the low segment,
    /// since the cluster's chromosome copy is absent there.
    ///
    fn has_ploidy_support(&self, range: &IntRange) -> bool {
        if self.background_allele.is_none() {
            return true;
        }
        !self.segments.iter().any(|x| {
            x.is_valid && x.range.intersect_range(range) && x.cluster_ploidy < MIN_CLUSTER_PLOIDY
        })
    }
}

/// Read-only cluster ploidy oracle over all chromosomes of one cluster
///
#[derive(Default)]
pub struct PloidyLimits {
    profiles: BTreeMap<String, ChromosomePloidyProfile>,
}

impl PloidyLimits {
    pub fn new(cluster: &Cluster, chr_breakend_map: &ChrBreakendMap, debug: bool) -> Self {
        let mut profiles = BTreeMap::new();
        for (chrom, breakends) in chr_breakend_map.iter() {
            let Some(allele_segments) = cluster.allele_ploidy.get(chrom) else {
                continue;
            };
            let (Some(first), Some(last)) = (breakends.first(), breakends.last()) else {
                continue;
            };
            let span = IntRange::from_unordered_pair(
                cluster.breakend(*first).pos,
                cluster.breakend(*last).pos,
            );
            let profile = ChromosomePloidyProfile::new(allele_segments, &span);
            match profile.background_allele {
                Some(allele) => debug_msg!(
                    debug,
                    "Cluster {}: {chrom} background allele {allele:?} at ploidy {:.2}",
                    cluster.cluster_id,
                    profile.background_ploidy
                ),
                None => debug_msg!(
                    debug,
                    "Cluster {}: no fixed background allele found on {chrom}, cluster ploidy limits not applied",
                    cluster.cluster_id
                ),
            }
            profiles.insert(chrom.clone(), profile);
        }
        Self { profiles }
    }

    #[cfg(test)]
    pub fn profile(&self, chrom: &str) -> Option<&ChromosomePloidyProfile> {
        self.profiles.get(chrom)
    }

    /// Return false if the interval between two breakend positions crosses a cluster ploidy wall
    ///
    pub fn has_ploidy_support(&self, chrom: &str, lower_pos: i64, upper_pos: i64) -> bool {
        match self.profiles.get(chrom) {
            Some(profile) => {
                profile.has_ploidy_support(&IntRange::from_pair(lower_pos, upper_pos))
            }
            None => true,
        }
    }

    /// Percentage of all profiled segments with valid ploidy data
    ///
    pub fn valid_segment_percent(&self) -> f64 {
        let total = self.profiles.values().map(|x| x.segments.len()).sum::<usize>();
        if total == 0 {
            return 0.0;
        }
        let valid = self
            .profiles
            .values()
            .flat_map(|x| x.segments.iter())
            .filter(|x| x.is_valid)
            .count();
        100.0 * valid as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::test_utils::*;
    use approx::assert_ulps_eq;

    fn get_segment(start: i64, end: i64, major: f64, minor: f64) -> AlleleSegment {
        AlleleSegment {
            range: IntRange::from_pair(start, end),
            major_allele_ploidy: major,
            minor_allele_ploidy: minor,
        }
    }

    #[test]
    fn test_find_fixed_ploidy() {
        assert_eq!(find_fixed_ploidy(&[]), None);
        let values = vec![1.0; 10];
        assert_ulps_eq!(find_fixed_ploidy(&values).unwrap(), 1.0);

        let mut values = vec![1.0; 9];
        values.push(3.0);
        assert_ulps_eq!(find_fixed_ploidy(&values).unwrap(), 1.0);

        let values = [1.0, 1.0, 3.0];
        assert_eq!(find_fixed_ploidy(&values), None);
    }

    #[test]
    fn test_profile_minor_background() {
        let segments = vec![
            get_segment(0, 1000, 3.0, 1.0),
            get_segment(1000, 2000, 4.0, 1.0),
            get_segment(2000, 3000, 1.0, 1.0),
        ];
        let profile = ChromosomePloidyProfile::new(&segments, &IntRange::from_pair(0, 3000));
        assert_eq!(profile.background_allele, Some(BackgroundAllele::Minor));
        assert_ulps_eq!(profile.background_ploidy, 1.0);
        assert_ulps_eq!(profile.segments[0].cluster_ploidy, 3.0);
        assert_ulps_eq!(profile.segments[1].cluster_ploidy, 4.0);
        assert_ulps_eq!(profile.segments[2].cluster_ploidy, 1.0);
    }

    #[test]
    fn test_profile_without_background() {
        let segments = vec![
            get_segment(0, 1000, 3.0, 0.0),
            get_segment(1000, 2000, 4.0, 2.0),
            get_segment(2000, 3000, 1.0, 1.0),
        ];
        let profile = ChromosomePloidyProfile::new(&segments, &IntRange::from_pair(0, 3000));
        assert_eq!(profile.background_allele, None);
        assert!(profile.has_ploidy_support(&IntRange::from_pair(0, 3000)));
    }

    #[test]
    fn test_ploidy_wall() {
        let svs = vec![
            get_test_del("a", "chr1", 100, 500, 1.0),
            get_test_del("b", "chr1", 2500, 2900, 1.0),
        ];
        let mut input = get_test_cluster_input(svs, true);
        input.allele_ploidy.insert(
            "chr1".to_string(),
            vec![
                get_segment(0, 1000, 1.0, 1.0),
                get_segment(1000, 2000, 1.0, 0.05),
                get_segment(2000, 3000, 1.0, 1.0),
                get_segment(5000, 6000, 1.0, 0.0),
            ],
        );
        let cluster = Cluster::from_input(input).unwrap();
        let chr_map = cluster.get_chr_breakend_map(&cluster.all_sv_indexes());
        let limits = PloidyLimits::new(&cluster, &chr_map, false);

        let profile = limits.profile("chr1").unwrap();
        assert_eq!(profile.segments.len(), 3);
        assert_eq!(profile.background_allele, Some(BackgroundAllele::Major));

        assert!(limits.has_ploidy_support("chr1", 500, 900));
        assert!(!limits.has_ploidy_support("chr1", 500, 2500));
        assert!(limits.has_ploidy_support("chr2", 500, 2500));

        // Links which only touch or lie inside the low segment are also blocked
        assert!(!limits.has_ploidy_support("chr1", 1200, 1800));
        assert!(!limits.has_ploidy_support("chr1", 500, 1001));
        assert!(limits.has_ploidy_support("chr1", 500, 1000));
        assert_ulps_eq!(limits.valid_segment_percent(), 100.0);
    }

    #[test]
    fn test_invalid_segments() {
        let mut segments = (0..10)
            .map(|x| get_segment(x * 100, (x + 1) * 100, 2.0, 1.0))
            .collect::<Vec<_>>();
        segments[3].minor_allele_ploidy = 3.0;
        let profile = ChromosomePloidyProfile::new(&segments, &IntRange::from_pair(0, 1000));
        assert_eq!(profile.background_allele, Some(BackgroundAllele::Minor));
        assert!(!profile.segments[3].is_valid);
        assert_eq!(profile.segments.iter().filter(|x| x.is_valid).count(), 9);
    }
}
