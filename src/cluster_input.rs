//! Read SV clusters from the upstream clustering stage
//!

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read};

use camino::Utf8Path;
use log::{info, warn};
use simple_error::{SimpleResult, bail, try_with};
use thousands::Separable;

use crate::cluster::{Cluster, ClusterInput};

/// A cluster which failed validation, kept so that it can be reported as a failed cluster
///
#[derive(Debug)]
pub struct InvalidCluster {
    pub cluster_id: usize,
    pub sv_count: usize,
    pub message: String,
}

/// Parse and validate all clusters from a json reader
///
/// Cluster ids must be unique, and malformed json fails the entire read. A cluster which parses
/// but fails validation is returned as an `InvalidCluster` in its input position.
///
fn parse_clusters(reader: impl Read) -> SimpleResult<Vec<Result<Cluster, InvalidCluster>>> {
    let inputs: Vec<ClusterInput> =
        try_with!(serde_json::from_reader(reader), "Unable to parse clusters json");

    let mut cluster_ids = BTreeSet::new();
    let mut clusters = Vec::with_capacity(inputs.len());
    for input in inputs {
        let cluster_id = input.cluster_id;
        if !cluster_ids.insert(cluster_id) {
            bail!("Duplicate cluster id in input: {cluster_id}");
        }
        let sv_count = input.svs.len();
        let cluster = Cluster::from_input(input).map_err(|e| InvalidCluster {
            cluster_id,
            sv_count,
            message: e.to_string(),
        });
        clusters.push(cluster);
    }
    Ok(clusters)
}

pub fn read_clusters(filename: &Utf8Path) -> SimpleResult<Vec<Result<Cluster, InvalidCluster>>> {
    info!("Reading SV clusters from file: '{filename}'");

    let file = try_with!(
        File::open(filename),
        "Unable to open clusters json file: '{filename}'"
    );
    let clusters = try_with!(
        parse_clusters(BufReader::new(file)),
        "Unable to read clusters json file: '{filename}'"
    );

    let sv_count = clusters
        .iter()
        .map(|x| match x {
            Ok(cluster) => cluster.svs.len(),
            Err(invalid) => invalid.sv_count,
        })
        .sum::<usize>();
    info!(
        "Read {} clusters containing {} SVs",
        clusters.len().separate_with_commas(),
        sv_count.separate_with_commas()
    );

    for invalid in clusters.iter().filter_map(|x| x.as_ref().err()) {
        warn!(
            "Cluster {} failed input validation: {}",
            invalid.cluster_id, invalid.message
        );
    }

    Ok(clusters)
}
