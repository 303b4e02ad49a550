//! Ground truth data model. Ingestion is treated as an external
//! collaborator — [`GroundTruthSource`] is the narrow interface;
//! [`CsvGroundTruthSource`] is the thinnest reference implementation
//! needed to drive tests and small runs.

use crate::{Error, Result, SimDate, SubpopId};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A mapping from subpop to statistic name to an ordered sequence of
/// `(date, value)` pairs. Missing observations are represented
/// explicitly as `None` and excluded from likelihood summation — never
/// zero-filled.
#[derive(Debug, Clone, Default)]
pub struct GroundTruth {
    series: BTreeMap<SubpopId, BTreeMap<String, Vec<(SimDate, Option<f64>)>>>,
}

impl GroundTruth {
    pub fn insert(&mut self, subpop: SubpopId, variable: String, points: Vec<(SimDate, Option<f64>)>) {
        self.series.entry(subpop).or_default().insert(variable, points);
    }

    pub fn series(&self, subpop: &str, variable: &str) -> Option<&[(SimDate, Option<f64>)]> {
        self.series.get(subpop)?.get(variable).map(Vec::as_slice)
    }

    /// The series with `None` entries dropped, suitable for the first
    /// positive-day scan used by seeding initialization.
    pub fn observed_only(&self, subpop: &str, variable: &str) -> Vec<(SimDate, f64)> {
        self.series(subpop, variable)
            .unwrap_or_default()
            .iter()
            .filter_map(|(d, v)| v.map(|v| (*d, v)))
            .collect()
    }

    pub fn subpops(&self) -> impl Iterator<Item = &SubpopId> {
        self.series.keys()
    }
}

pub trait GroundTruthSource: Send + Sync {
    fn load(&self, subpops: &[SubpopId]) -> Result<GroundTruth>;
}

/// A CSV with columns `subpop,date,variable,value` (a blank `value`
/// field is an explicit missing observation, not zero).
pub struct CsvGroundTruthSource {
    pub path: PathBuf,
}

impl GroundTruthSource for CsvGroundTruthSource {
    fn load(&self, subpops: &[SubpopId]) -> Result<GroundTruth> {
        let wanted: std::collections::HashSet<&str> = subpops.iter().map(String::as_str).collect();
        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut gt = GroundTruth::default();
        for record in reader.records() {
            let record = record.map_err(|e| Error::Configuration(format!("malformed ground truth row: {e}")))?;
            if record.len() < 4 {
                return Err(Error::Configuration(format!(
                    "ground truth row has {} fields, expected 4",
                    record.len()
                )));
            }
            let subpop = record[0].to_string();
            if !wanted.is_empty() && !wanted.contains(subpop.as_str()) {
                continue;
            }
            let date: SimDate = record[1]
                .parse()
                .map_err(|e| Error::Configuration(format!("bad date {}: {e}", &record[1])))?;
            let variable = record[2].to_string();
            let value = if record[3].trim().is_empty() {
                None
            } else {
                Some(record[3].parse::<f64>().map_err(|e| {
                    Error::Configuration(format!("bad value {}: {e}", &record[3]))
                })?)
            };
            gt.series
                .entry(subpop)
                .or_default()
                .entry(variable)
                .or_default()
                .push((date, value));
        }
        for subpop_series in gt.series.values_mut() {
            for points in subpop_series.values_mut() {
                points.sort_by_key(|(d, _)| *d);
            }
        }
        Ok(gt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_values_stay_explicit() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "subpop,date,variable,value").unwrap();
        writeln!(file, "A,2020-01-01,incidD,10").unwrap();
        writeln!(file, "A,2020-01-02,incidD,").unwrap();
        let source = CsvGroundTruthSource { path: file.path().to_path_buf() };
        let gt = source.load(&["A".to_string()]).unwrap();
        let series = gt.series("A", "incidD").unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[1].1, None);
        assert_eq!(gt.observed_only("A", "incidD").len(), 1);
    }

    #[test]
    fn filters_to_requested_subpops() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "subpop,date,variable,value").unwrap();
        writeln!(file, "A,2020-01-01,incidD,10").unwrap();
        writeln!(file, "B,2020-01-01,incidD,20").unwrap();
        let source = CsvGroundTruthSource { path: file.path().to_path_buf() };
        let gt = source.load(&["A".to_string()]).unwrap();
        assert!(gt.series("B", "incidD").is_none());
    }
}
