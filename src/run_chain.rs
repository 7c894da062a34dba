use std::collections::BTreeMap;

use camino::Utf8Path;
use itertools::Itertools;
use log::info;
use simple_error::{SimpleResult, bail};

use crate::chain::{ChainingConfig, ClusterChainResult, chain_clusters};
use crate::chain_output::write_chaining_output;
use crate::cli;
use crate::cluster::Cluster;
use crate::cluster_input::{InvalidCluster, read_clusters};
use crate::run_stats::{ChainStats, RunStats, write_run_stats};

type LoadedCluster = Result<Cluster, InvalidCluster>;

fn loaded_cluster_id(cluster: &LoadedCluster) -> usize {
    match cluster {
        Ok(x) => x.cluster_id,
        Err(x) => x.cluster_id,
    }
}

/// Reduce clusters to the single debug target cluster, if one is given
///
fn filter_target_cluster(
    clusters: Vec<LoadedCluster>,
    target_cluster_id: Option<usize>,
) -> SimpleResult<Vec<LoadedCluster>> {
    let Some(target_cluster_id) = target_cluster_id else {
        return Ok(clusters);
    };
    let clusters = clusters
        .into_iter()
        .filter(|x| loaded_cluster_id(x) == target_cluster_id)
        .collect::<Vec<_>>();
    if clusters.is_empty() {
        bail!("Target cluster id {target_cluster_id} not found in clusters input");
    }
    info!("Restricting chaining to target cluster {target_cluster_id}");
    Ok(clusters)
}

/// Chain all valid clusters, and report each invalid cluster as failed
///
/// Results are returned in cluster input order.
///
fn chain_loaded_clusters(
    loaded_clusters: Vec<LoadedCluster>,
    config: &ChainingConfig,
    assembled_links_only: bool,
    thread_count: usize,
) -> Vec<ClusterChainResult> {
    let input_order = loaded_clusters
        .iter()
        .enumerate()
        .map(|(index, x)| (loaded_cluster_id(x), index))
        .collect::<BTreeMap<_, _>>();

    let (clusters, invalid_clusters): (Vec<_>, Vec<_>) =
        loaded_clusters.into_iter().partition_result();

    let mut results = chain_clusters(&clusters, config, assembled_links_only, thread_count);
    results.extend(invalid_clusters.into_iter().map(|x| {
        ClusterChainResult::invalid_input(x.cluster_id, x.sv_count, x.message)
    }));
    results.sort_by_key(|x| input_order[&x.cluster_id]);
    results
}

pub fn run_chain(
    shared_settings: &cli::SharedSettings,
    settings: &cli::ChainSettings,
) -> SimpleResult<()> {
    cli::write_chain_settings(&settings.output_dir, settings);

    let clusters = read_clusters(Utf8Path::new(&settings.clusters_filename))?;
    let clusters = filter_target_cluster(clusters, settings.target_cluster_id)?;

    let config = settings.get_chaining_config();
    if settings.assembled_links_only {
        info!("Placing assembled links only");
    }

    let start = std::time::Instant::now();
    let results = chain_loaded_clusters(
        clusters,
        &config,
        settings.assembled_links_only,
        shared_settings.thread_count,
    );
    let total_chaining_time_secs = start.elapsed().as_secs_f64();

    write_chaining_output(&settings.output_dir, &results);

    let run_stats = RunStats {
        chain_stats: ChainStats::from_results(&results),
        total_chaining_time_secs,
    };
    write_run_stats(&settings.output_dir, &run_stats);

    Ok(())
}
