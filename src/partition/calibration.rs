//! Per-dataset calibration of the job-size threshold
//!
//! Calibration factors come from history (a previous run's measured ratios or
//! a skim-ratio table). The partitioner only ever sees the [`CalibrationSource`]
//! trait, so the heuristic behind a table can change without touching it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{RunError, RunResult};
use crate::types::DatasetId;

/// Lookup of a threshold multiplier for a dataset
pub trait CalibrationSource: Send + Sync {
    /// `None` means no history for this dataset: use the unscaled threshold
    fn factor(&self, dataset: &DatasetId) -> Option<f64>;
}

/// Source that never calibrates
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCalibration;

impl CalibrationSource for NoCalibration {
    fn factor(&self, _dataset: &DatasetId) -> Option<f64> {
        None
    }
}

/// How table rows are matched against dataset ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Row name equals the dataset id
    #[default]
    Exact,
    /// Row name occurs inside the dataset id; every matching row multiplies in
    Substring,
}

/// Extra divisor for datasets whose id contains `pattern`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationAdjustment {
    pub pattern: String,
    pub divisor: f64,
}

/// Configuration of a ratio-table calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub table: PathBuf,

    #[serde(default)]
    pub ratio_column: usize,

    #[serde(default = "default_name_column")]
    pub name_column: usize,

    #[serde(default)]
    pub match_mode: MatchMode,

    /// Multiplier applied on top of the table value
    #[serde(default = "default_safety_factor")]
    pub safety_factor: f64,

    #[serde(default)]
    pub adjustments: Vec<CalibrationAdjustment>,
}

impl CalibrationConfig {
    /// Exact-match table with default columns and no safety margin
    pub fn for_table(table: impl Into<PathBuf>) -> Self {
        Self {
            table: table.into(),
            ratio_column: 0,
            name_column: default_name_column(),
            match_mode: MatchMode::default(),
            safety_factor: default_safety_factor(),
            adjustments: Vec::new(),
        }
    }
}

fn default_name_column() -> usize {
    1
}

fn default_safety_factor() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq)]
struct RatioRow {
    name: String,
    ratio: f64,
}

/// Whitespace-separated table of `ratio ... name` rows
#[derive(Debug, Clone)]
pub struct RatioTable {
    rows: Vec<RatioRow>,
    match_mode: MatchMode,
    safety_factor: f64,
    adjustments: Vec<CalibrationAdjustment>,
}

impl RatioTable {
    /// Load the table named by `config`
    pub fn load(config: &CalibrationConfig) -> RunResult<Self> {
        let content =
            std::fs::read_to_string(&config.table).map_err(|e| RunError::io(&config.table, e))?;
        Ok(Self::parse(&content, config, &config.table))
    }

    /// Parse table text; malformed rows are skipped with a warning
    pub fn parse(content: &str, config: &CalibrationConfig, origin: &Path) -> Self {
        let mut rows = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let columns: Vec<&str> = line.split_whitespace().collect();
            let (Some(ratio), Some(name)) = (
                columns.get(config.ratio_column),
                columns.get(config.name_column),
            ) else {
                warn!(
                    "{}:{}: expected at least {} columns",
                    origin.display(),
                    lineno + 1,
                    config.ratio_column.max(config.name_column) + 1
                );
                continue;
            };
            match ratio.parse::<f64>() {
                Ok(ratio) if ratio.is_finite() && ratio > 0.0 => rows.push(RatioRow {
                    name: name.to_string(),
                    ratio,
                }),
                _ => warn!(
                    "{}:{}: ignoring unusable ratio {:?}",
                    origin.display(),
                    lineno + 1,
                    ratio
                ),
            }
        }
        debug!("Loaded {} calibration rows from {}", rows.len(), origin.display());

        Self {
            rows,
            match_mode: config.match_mode,
            safety_factor: config.safety_factor,
            adjustments: config.adjustments.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl CalibrationSource for RatioTable {
    fn factor(&self, dataset: &DatasetId) -> Option<f64> {
        let id = dataset.as_str();
        let matched: Vec<f64> = match self.match_mode {
            MatchMode::Exact => self
                .rows
                .iter()
                .filter(|row| row.name == id)
                .map(|row| row.ratio)
                .take(1)
                .collect(),
            MatchMode::Substring => self
                .rows
                .iter()
                .filter(|row| id.contains(row.name.as_str()))
                .map(|row| row.ratio)
                .collect(),
        };
        if matched.is_empty() {
            return None;
        }

        let mut factor: f64 = matched.iter().product::<f64>() * self.safety_factor;
        for adjustment in &self.adjustments {
            if adjustment.divisor > 0.0 && id.contains(adjustment.pattern.as_str()) {
                factor /= adjustment.divisor;
            }
        }
        Some(factor)
    }
}

/// Scale `threshold` by the dataset's factor, never below one unit
pub fn calibrated_threshold(
    threshold: u64,
    dataset: &DatasetId,
    source: &dyn CalibrationSource,
) -> u64 {
    match source.factor(dataset) {
        Some(factor) if factor.is_finite() && factor > 0.0 => {
            let scaled = (threshold as f64 * factor).round();
            scaled.clamp(1.0, u64::MAX as f64) as u64
        }
        _ => threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_ratio_config() -> CalibrationConfig {
        CalibrationConfig {
            table: PathBuf::from("job_ratios.txt"),
            ratio_column: 0,
            name_column: 1,
            match_mode: MatchMode::Exact,
            safety_factor: 0.8,
            adjustments: Vec::new(),
        }
    }

    #[test]
    fn test_exact_table_scales_with_safety_factor() {
        let table = RatioTable::parse(
            "2.5 TTJets\n# comment\n\n0.5 QCD_HT700\n",
            &job_ratio_config(),
            Path::new("job_ratios.txt"),
        );
        assert_eq!(table.len(), 2);

        let factor = table.factor(&DatasetId::new("TTJets")).unwrap();
        assert!((factor - 2.0).abs() < 1e-9);
        assert!(table.factor(&DatasetId::new("TTJets_ext1")).is_none());
    }

    #[test]
    fn test_substring_rows_multiply_and_adjust() {
        let config = CalibrationConfig {
            table: PathBuf::from("skim_ratios.txt"),
            ratio_column: 0,
            name_column: 2,
            match_mode: MatchMode::Substring,
            safety_factor: 1.0,
            adjustments: vec![CalibrationAdjustment {
                pattern: "FastSim".to_string(),
                divisor: 4.0,
            }],
        };
        let table = RatioTable::parse(
            "8 x SMS-T5ttcc\n2 x FastSim\n3 x JetHT\n",
            &config,
            Path::new("skim_ratios.txt"),
        );

        let factor = table.factor(&DatasetId::new("FastSim_SMS-T5ttcc")).unwrap();
        assert!((factor - 4.0).abs() < 1e-9);
        assert!((table.factor(&DatasetId::new("JetHT_Run2016B")).unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let table = RatioTable::parse(
            "abc TTJets\n-1 QCD\nlonely\n1.5 WJets\n",
            &job_ratio_config(),
            Path::new("job_ratios.txt"),
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_calibrated_threshold_falls_back_without_history() {
        let dataset = DatasetId::new("Unknown");
        assert_eq!(calibrated_threshold(1000, &dataset, &NoCalibration), 1000);
    }

    #[test]
    fn test_calibrated_threshold_never_zero() {
        let table = RatioTable::parse(
            "0.0000001 Tiny\n",
            &CalibrationConfig {
                safety_factor: 1.0,
                ..job_ratio_config()
            },
            Path::new("t"),
        );
        assert_eq!(calibrated_threshold(10, &DatasetId::new("Tiny"), &table), 1);
    }
}
