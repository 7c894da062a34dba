//! Track stats for the whole chaining run
//!

use std::collections::BTreeMap;
use std::fs::File;

use camino::Utf8Path;
use log::info;
use serde::{Deserialize, Serialize};
use unwrap::unwrap;

use crate::chain::ClusterChainResult;
use crate::filenames::RUN_STATS_FILENAME;

#[derive(Default, Deserialize, Serialize)]
pub struct ClusterFailure {
    pub cluster_id: usize,
    pub message: String,
}

#[derive(Default, Deserialize, Serialize)]
pub struct ChainStats {
    pub cluster_count: usize,
    pub sv_count: usize,

    /// Clusters by final chaining status
    pub status_counts: BTreeMap<String, usize>,

    pub link_count: usize,

    /// Chains remaining after duplicate chains are collapsed
    pub unique_chain_count: usize,
    pub closed_chain_count: usize,
    pub unlinked_sv_count: usize,

    /// Links placed under each rule, summed over all clusters
    pub rule_counts: BTreeMap<String, usize>,

    pub failures: Vec<ClusterFailure>,
}

impl ChainStats {
    pub fn from_results(results: &[ClusterChainResult]) -> Self {
        let mut stats = Self {
            cluster_count: results.len(),
            ..Default::default()
        };
        for result in results.iter() {
            let diag = &result.diagnostics;
            stats.sv_count += result.sv_count;
            *stats
                .status_counts
                .entry(result.status.label().to_string())
                .or_default() += 1;
            stats.link_count += diag.link_count;
            stats.unique_chain_count += result.chains.len();
            stats.closed_chain_count += result.chains.iter().filter(|x| x.is_closed).count();
            stats.unlinked_sv_count += diag.unlinked_sv_count;
            for (rule, count) in diag.rule_counts.iter() {
                *stats.rule_counts.entry(rule.clone()).or_default() += count;
            }
            if let Some(failure) = result.status.failure() {
                stats.failures.push(ClusterFailure {
                    cluster_id: result.cluster_id,
                    message: failure.to_string(),
                });
            }
        }
        stats
    }
}

#[derive(Deserialize, Serialize)]
pub struct RunStats {
    pub chain_stats: ChainStats,
    pub total_chaining_time_secs: f64,
}

/// Write run_stats structure out in json format
pub fn write_run_stats(output_dir: &Utf8Path, run_stats: &RunStats) {
    let filename = output_dir.join(RUN_STATS_FILENAME);

    info!("Writing run statistics to file: '{filename}'");

    let f = unwrap!(
        File::create(&filename),
        "Unable to create run statistics json file: '{filename}'"
    );

    serde_json::to_writer_pretty(&f, &run_stats).unwrap();
}
