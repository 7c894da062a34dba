use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use const_format::concatcp;
use log::info;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, try_with};
use unwrap::unwrap;

use super::utils::check_required_filename;
use crate::chain::ChainingConfig;
use crate::filenames::SETTINGS_FILENAME;

#[derive(Args, Default, Deserialize, Serialize)]
pub struct ChainSettings {
    /// Directory for all chain command output (must not already exist)
    #[arg(long, value_name = "DIR", default_value = concatcp!(env!("CARGO_PKG_NAME"), "_chain_output"))]
    pub output_dir: Utf8PathBuf,

    /// SV clusters to chain, in JSON format
    ///
    /// The file contains a list of clusters, each with its SVs, SV ploidy estimates, assembly
    /// links, foldbacks and allele-specific ploidy segments.
    ///
    #[arg(long = "clusters", value_name = "FILE")]
    pub clusters_filename: String,

    /// Only place assembled links, skipping all rule-based chaining
    #[arg(long)]
    pub assembled_links_only: bool,

    /// Ignore allele-specific ploidy segments, so that candidate links are not limited by
    /// cluster ploidy walls
    ///
    #[arg(long)]
    pub disable_allele_ploidies: bool,

    /// Check all chain invariants after every link
    ///
    /// This is for debugging only and substantially increases runtime on large clusters.
    ///
    #[arg(hide = true, long)]
    pub validate_chains: bool,

    /// Remove all clusters except for the given cluster id and print its chaining trace to stderr
    ///
    #[arg(hide = true, long)]
    pub target_cluster_id: Option<usize>,
}

impl ChainSettings {
    pub fn get_chaining_config(&self) -> ChainingConfig {
        ChainingConfig {
            use_allele_ploidies: !self.disable_allele_ploidies,
            validate_chains: self.validate_chains,
            debug: self.target_cluster_id.is_some(),
        }
    }
}

/// Validate settings and update to parameters that can't be processed automatically by clap.
///
/// Assumes that the logger is not setup
///
pub fn validate_and_fix_chain_settings(mut settings: ChainSettings) -> SimpleResult<ChainSettings> {
    check_required_filename(&settings.clusters_filename, "clusters")?;

    settings.clusters_filename = try_with!(
        Utf8PathBuf::from(&settings.clusters_filename).canonicalize_utf8(),
        "Unable to canonicalize clusters file path: '{}'",
        settings.clusters_filename
    )
    .to_string();

    Ok(settings)
}

/// Write chain settings out in json format
pub fn write_chain_settings(output_dir: &Utf8Path, settings: &ChainSettings) {
    let filename = output_dir.join(SETTINGS_FILENAME);

    info!("Writing chain settings to file: '{filename}'");

    let f = unwrap!(
        std::fs::File::create(&filename),
        "Unable to create chain settings json file: '{filename}'"
    );

    serde_json::to_writer_pretty(&f, &settings).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chaining_config() {
        let mut settings = ChainSettings::default();
        let config = settings.get_chaining_config();
        assert!(config.use_allele_ploidies);
        assert!(!config.debug);

        settings.disable_allele_ploidies = true;
        settings.target_cluster_id = Some(3);
        let config = settings.get_chaining_config();
        assert!(!config.use_allele_ploidies);
        assert!(config.debug);
    }

    #[test]
    fn test_missing_clusters_file() {
        let settings = ChainSettings {
            clusters_filename: "./not_there/clusters.json".to_string(),
            ..Default::default()
        };
        assert!(validate_and_fix_chain_settings(settings).is_err());
    }
}
