//! ApacheBench invocation and output parsing.

use serde::{Deserialize, Serialize};

use crate::error::{LoadTestError, Result};

/// Concurrency levels swept per replica count, with the request total for each.
pub const LEVELS: [(u32, u32); 11] = [
    (10, 300),
    (15, 300),
    (20, 300),
    (30, 300),
    (50, 300),
    (80, 300),
    (100, 500),
    (150, 500),
    (200, 1000),
    (250, 1000),
    (300, 1000),
];

/// Socket timeout passed to `ab`, in seconds.
const SOCKET_TIMEOUT_SECS: u32 = 100;

/// Statistics for one concurrency level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelResult {
    /// Concurrent requests.
    pub con_level: u32,
    /// Mean requests per second.
    pub rps: f64,
    /// 98th percentile response time in milliseconds.
    #[serde(rename = "98p")]
    pub p98: u64,
    /// Longest response time in milliseconds.
    pub longest: u64,
}

/// Builds the `ab` argument list for a POST sweep step.
#[must_use]
pub fn ab_args(payload: &str, requests: u32, concurrency: u32, url: &str) -> Vec<String> {
    vec![
        "-p".to_string(),
        payload.to_string(),
        "-T".to_string(),
        "application/json".to_string(),
        "-m".to_string(),
        "POST".to_string(),
        "-n".to_string(),
        requests.to_string(),
        "-c".to_string(),
        concurrency.to_string(),
        "-s".to_string(),
        SOCKET_TIMEOUT_SECS.to_string(),
        "-r".to_string(),
        url.to_string(),
    ]
}

/// Extracts requests per second, the 98% percentile and the longest request
/// from `ab` output.
///
/// Statistics are read in report order: the percentile table is only searched
/// after the throughput line.
///
/// # Errors
///
/// Returns [`LoadTestError::AbOutput`] naming the first statistic not found.
pub fn parse_ab_output(con_level: u32, output: &str) -> Result<LevelResult> {
    let mut lines = output.lines();

    let rps = lines
        .by_ref()
        .find_map(|line| line.strip_prefix("Requests per second:"))
        .and_then(first_token)
        .and_then(|value| value.parse::<f64>().ok())
        .ok_or(LoadTestError::AbOutput { field: "Requests per second" })?;

    let p98 = percentile(&mut lines, "98%").ok_or(LoadTestError::AbOutput { field: "98%" })?;
    let longest =
        percentile(&mut lines, "100%").ok_or(LoadTestError::AbOutput { field: "100%" })?;

    Ok(LevelResult { con_level, rps, p98, longest })
}

fn first_token(rest: &str) -> Option<&str> {
    rest.split_whitespace().next()
}

fn percentile<'a>(lines: &mut impl Iterator<Item = &'a str>, label: &str) -> Option<u64> {
    lines
        .find_map(|line| line.trim_start().strip_prefix(label))
        .and_then(first_token)
        .and_then(|value| value.parse().ok())
}
