//! Per-replica-count result files.

use std::path::{Path, PathBuf};

use snafu::ResultExt;

use crate::{
    ab::LevelResult,
    error::{CsvSnafu, EncodeSnafu, OutputSnafu, Result},
};

/// Paths of the CSV and JSON reports for one replica count.
#[must_use]
pub fn report_paths(out_dir: &Path, tag: &str, replicas: u32) -> (PathBuf, PathBuf) {
    let stem = format!("{tag}_{replicas}");
    (out_dir.join(format!("{stem}.csv")), out_dir.join(format!("{stem}.json")))
}

/// Writes `results` as `<tag>_<replicas>.csv` and `<tag>_<replicas>.json`
/// under `out_dir`, returning both paths.
///
/// # Errors
///
/// Returns an error if either file cannot be written.
pub fn write_reports(
    out_dir: &Path,
    tag: &str,
    replicas: u32,
    results: &[LevelResult],
) -> Result<(PathBuf, PathBuf)> {
    let (csv_path, json_path) = report_paths(out_dir, tag, replicas);

    let mut writer = csv::Writer::from_path(&csv_path).context(CsvSnafu { path: &csv_path })?;
    for row in results {
        writer.serialize(row).context(CsvSnafu { path: &csv_path })?;
    }
    writer.flush().context(OutputSnafu { path: &csv_path })?;

    let json = serde_json::to_vec(results).context(EncodeSnafu { path: &json_path })?;
    std::fs::write(&json_path, json).context(OutputSnafu { path: &json_path })?;

    Ok((csv_path, json_path))
}
