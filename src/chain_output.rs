//! Tabular output for chaining results
//!

use std::fs::File;
use std::io::{BufWriter, Write};

use camino::Utf8Path;
use itertools::Itertools;
use log::info;
use strum::IntoEnumIterator;
use unwrap::unwrap;

use crate::chain::{ChainingRule, ClusterChainResult};
use crate::filenames::{CHAINS_FILENAME, CLUSTER_SUMMARY_FILENAME, LINKS_FILENAME};

fn format_ploidy(x: f64) -> String {
    format!("{x:.3}")
}

fn write_chains(results: &[ClusterChainResult], f: &mut impl Write) -> std::io::Result<()> {
    writeln!(
        f,
        "cluster_id\tchain_id\tploidy\tploidy_uncertainty\tlink_count\tsv_count\tis_closed\t\
         internal_ti_count\texternal_ti_count\tdeletion_bridge_count\tassembled_link_count\t\
         duplicate_count\tsv_path"
    )?;
    for result in results.iter() {
        for chain in result.chains.iter() {
            let metrics = &chain.metrics;
            writeln!(
                f,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                result.cluster_id,
                chain.chain_id,
                format_ploidy(chain.ploidy),
                format_ploidy(chain.ploidy_uncertainty),
                chain.link_count,
                chain.sv_count,
                chain.is_closed,
                metrics.internal_ti_count,
                metrics.external_ti_count,
                metrics.deletion_bridge_count,
                metrics.assembled_link_count,
                chain.duplicate_count,
                chain.sv_path.join(","),
            )?;
        }
    }
    Ok(())
}

fn write_links(results: &[ClusterChainResult], f: &mut impl Write) -> std::io::Result<()> {
    writeln!(
        f,
        "cluster_id\tchain_id\tchain_position\tlink_reason\tlink_index\tlink_type\tfirst\tsecond\t\
         length\tis_assembled\trepeat_count\tploidy"
    )?;
    for result in results.iter() {
        for link in result.links.iter() {
            writeln!(
                f,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                result.cluster_id,
                link.chain_id,
                link.chain_position,
                link.link_reason,
                link.link_index,
                link.link_type,
                link.first,
                link.second,
                link.length,
                link.is_assembled,
                link.repeat_count,
                format_ploidy(link.ploidy),
            )?;
        }
    }
    Ok(())
}

fn write_cluster_summary(
    results: &[ClusterChainResult],
    f: &mut impl Write,
) -> std::io::Result<()> {
    let rule_header = ChainingRule::iter().map(|x| format!("{x}_links")).join("\t");
    writeln!(
        f,
        "cluster_id\tsv_count\tstatus\titerations\tlink_count\tchain_count\tunique_chain_count\t\
         unlinked_breakend_count\tunlinked_sv_count\tvalid_segment_percent\t{rule_header}\tfailure"
    )?;
    for result in results.iter() {
        let diag = &result.diagnostics;
        let rule_counts = ChainingRule::iter()
            .map(|x| diag.rule_counts.get(&x.to_string()).copied().unwrap_or(0))
            .join("\t");
        let failure = match result.status.failure() {
            Some(x) => x.to_string(),
            None => ".".to_string(),
        };
        writeln!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.1}\t{}\t{}",
            result.cluster_id,
            result.sv_count,
            result.status.label(),
            diag.iterations,
            diag.link_count,
            diag.chain_count,
            diag.unique_chain_count,
            diag.unlinked_breakend_count,
            diag.unlinked_sv_count,
            diag.valid_segment_percent,
            rule_counts,
            failure,
        )?;
    }
    Ok(())
}

/// Write chain, link and cluster summary tables to the output directory
///
pub fn write_chaining_output(output_dir: &Utf8Path, results: &[ClusterChainResult]) {
    type Writer = fn(&[ClusterChainResult], &mut BufWriter<File>) -> std::io::Result<()>;
    let tables: [(&str, &str, Writer); 3] = [
        ("chains", CHAINS_FILENAME, write_chains),
        ("links", LINKS_FILENAME, write_links),
        ("cluster summary", CLUSTER_SUMMARY_FILENAME, write_cluster_summary),
    ];

    for (label, filename, writer) in tables {
        let filename = output_dir.join(filename);
        info!("Writing {label} to file: '{filename}'");

        let f = unwrap!(
            File::create(&filename),
            "Unable to create {label} file: '{filename}'"
        );
        let mut f = BufWriter::new(f);
        unwrap!(
            writer(results, &mut f).and_then(|_| f.flush()),
            "Unable to write {label} file: '{filename}'"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainingConfig, chain_cluster};
    use crate::cluster::test_utils::*;

    fn get_test_results() -> Vec<ClusterChainResult> {
        let svs = vec![
            get_test_del("a", "chr1", 100, 300, 1.0),
            get_test_del("b", "chr1", 500, 700, 1.0),
        ];
        let cluster = get_test_cluster(svs, false);
        vec![chain_cluster(&cluster, &ChainingConfig::default(), false)]
    }

    #[test]
    fn test_write_chains() {
        let results = get_test_results();
        let mut buf = Vec::new();
        write_chains(&results, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("cluster_id\tchain_id\tploidy"));
        let fields = lines[1].split('\t').collect::<Vec<_>>();
        assert_eq!(fields.len(), 13);
        assert_eq!(fields[2], "1.000");
        assert_eq!(fields[4], "1");
        assert_eq!(fields[6], "false");
        assert_eq!(fields[12], "a,b");
    }

    #[test]
    fn test_write_links() {
        let results = get_test_results();
        let mut buf = Vec::new();
        write_links(&results, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        let fields = lines[1].split('\t').collect::<Vec<_>>();
        assert_eq!(fields.len(), 12);
        assert_eq!(fields[5], "TI");
        assert_eq!(fields[6], "a:e");
        assert_eq!(fields[7], "b:s");
        assert_eq!(fields[8], "200");
    }

    #[test]
    fn test_write_cluster_summary() {
        let results = get_test_results();
        let mut buf = Vec::new();
        write_cluster_summary(&results, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);

        let header_count = lines[0].split('\t').count();
        let fields = lines[1].split('\t').collect::<Vec<_>>();
        assert_eq!(fields.len(), header_count);
        assert_eq!(fields[2], "complete");
        assert_eq!(*fields.last().unwrap(), ".");
    }
}
