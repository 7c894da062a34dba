pub const SETTINGS_FILENAME: &str = "chain.settings.json";
pub const RUN_STATS_FILENAME: &str = "run.stats.json";

pub const CHAINS_FILENAME: &str = "chains.tsv";
pub const LINKS_FILENAME: &str = "links.tsv";
pub const CLUSTER_SUMMARY_FILENAME: &str = "cluster_summary.tsv";
