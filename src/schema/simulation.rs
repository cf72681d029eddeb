//! Configuration of the external simulation used to evaluate a design.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How the external simulation is launched and where its results live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Project name, substituted for `{project}` in commands and file names.
    pub project_name: String,
    /// Project directory. Each evaluation runs in its own subdirectory.
    pub project_dir: PathBuf,
    /// Design element the parameters are applied to (e.g. a window id).
    #[serde(default)]
    pub target: Option<String>,
    /// Pattern or shape kind generated on the target (e.g. `"louvers"`).
    #[serde(default)]
    pub pattern: Option<String>,
    /// Program and arguments. `{project}`, `{project_dir}` and `{work_dir}`
    /// are substituted; the process runs inside the evaluation directory.
    pub command: Vec<String>,
    /// Delay after applying parameters, for dependent geometry to settle.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Per-evaluation timeout for the simulation process.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Stream process output line by line into the log while it runs.
    #[serde(default)]
    pub stream_output: bool,
    /// Remove an evaluation's directory once its metrics were read.
    /// Failed evaluations are always kept for inspection.
    #[serde(default)]
    pub cleanup_on_success: bool,
    /// Result files to parse into metrics.
    pub metric_files: Vec<MetricSource>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            project_name: "office".to_string(),
            project_dir: PathBuf::from("project"),
            target: Some("south_window".to_string()),
            pattern: Some("louvers".to_string()),
            command: vec![
                "sh".to_string(),
                "simulate.sh".to_string(),
                "{work_dir}".to_string(),
            ],
            settle_delay_ms: default_settle_delay_ms(),
            timeout_secs: default_timeout_secs(),
            stream_output: false,
            cleanup_on_success: false,
            metric_files: vec![
                MetricSource {
                    metric: "sda".to_string(),
                    file: "{project}_sDA_final.txt".to_string(),
                    extract: MetricExtract::Last,
                },
                MetricSource {
                    metric: "ase".to_string(),
                    file: "{project}_ASE_direct_only.txt".to_string(),
                    extract: MetricExtract::Last,
                },
            ],
        }
    }
}

fn default_settle_delay_ms() -> u64 {
    250
}
fn default_timeout_secs() -> u64 {
    1800
}

/// One metric read from one result file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSource {
    /// Metric id written into the metrics map.
    pub metric: String,
    /// File name relative to the evaluation directory; `{project}` is substituted.
    pub file: String,
    /// How the numeric content of the file is reduced to one value.
    #[serde(default)]
    pub extract: MetricExtract,
}

impl MetricSource {
    /// File name with the project name substituted.
    pub fn file_name(&self, project_name: &str) -> String {
        self.file.replace("{project}", project_name)
    }
}

/// Reduction applied to the numeric tokens of a result file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetricExtract {
    First,
    #[default]
    Last,
    Mean,
    Min,
    Max,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_substitution() {
        let config = SimulationConfig::default();
        assert_eq!(
            config.metric_files[0].file_name("atrium"),
            "atrium_sDA_final.txt"
        );
    }

    #[test]
    fn test_defaults_from_minimal_json() {
        let json = r#"{
            "project_name": "lab",
            "project_dir": "/tmp/lab",
            "command": ["run"],
            "metric_files": [{"metric": "sda", "file": "{project}.res"}]
        }"#;
        let config: SimulationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.settle_delay_ms, 250);
        assert_eq!(config.metric_files[0].extract, MetricExtract::Last);
        assert!(!config.stream_output);
    }
}
