//! On-disk naming of chunk lists, outputs, logs and merged artifacts

use crate::config::RunConfig;
use crate::types::DatasetId;
use std::path::{Path, PathBuf};

pub const BAD_ITEMS_REPORT: &str = "bad_files_found.txt";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    pub output_dir: PathBuf,
    pub partition_dir: PathBuf,
    pub log_dir: PathBuf,
    pub merge_dir: PathBuf,
    pub extension: String,
}

impl RunLayout {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            partition_dir: config.partition_dir(),
            log_dir: config.log_dir(),
            merge_dir: config.merge_dir(),
            extension: config.artifact_extension.clone(),
        }
    }

    fn chunk_stem(dataset: &DatasetId, index: u32) -> String {
        format!("{}_{}", dataset, index)
    }

    pub fn chunk_output(&self, dataset: &DatasetId, index: u32) -> PathBuf {
        self.output_dir.join(format!(
            "{}.{}",
            Self::chunk_stem(dataset, index),
            self.extension
        ))
    }

    pub fn chunk_log(&self, dataset: &DatasetId, index: u32) -> PathBuf {
        self.log_dir
            .join(format!("{}.log", Self::chunk_stem(dataset, index)))
    }

    pub fn chunk_list(&self, dataset: &DatasetId, index: u32) -> PathBuf {
        self.partition_dir
            .join(format!("{}.txt", Self::chunk_stem(dataset, index)))
    }

    pub fn final_artifact(&self, dataset: &DatasetId) -> PathBuf {
        self.merge_dir
            .join(format!("{}.{}", dataset, self.extension))
    }

    pub fn merge_log(&self, dataset: &DatasetId) -> PathBuf {
        self.log_dir.join("merge").join(format!("{}.log", dataset))
    }

    pub fn bad_items_report(&self) -> PathBuf {
        self.output_dir.join(BAD_ITEMS_REPORT)
    }

    pub fn summary_file(&self) -> PathBuf {
        self.output_dir.join(SUMMARY_FILE)
    }

    /// Directories that must exist before any job runs
    pub fn directories(&self) -> [&Path; 4] {
        [
            self.output_dir.as_path(),
            self.partition_dir.as_path(),
            self.log_dir.as_path(),
            self.merge_dir.as_path(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_follow_dataset_and_index() {
        let layout = RunLayout::from_config(&RunConfig::default());
        let ds = DatasetId::new("TTJets");

        assert_eq!(layout.chunk_output(&ds, 2), PathBuf::from("results/TTJets_2.root"));
        assert_eq!(layout.chunk_log(&ds, 2), PathBuf::from("results/log/TTJets_2.log"));
        assert_eq!(
            layout.chunk_list(&ds, 2),
            PathBuf::from("results/filelists_tmp/TTJets_2.txt")
        );
        assert_eq!(layout.final_artifact(&ds), PathBuf::from("results/hadd/TTJets.root"));
        assert_eq!(
            layout.merge_log(&ds),
            PathBuf::from("results/log/merge/TTJets.log")
        );
    }
}
