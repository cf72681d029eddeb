//! Metric extraction from simulation result files.

use crate::schema::MetricExtract;

/// Numeric tokens of a result file. Tokens are separated by whitespace or
/// any of `,;:=`; a trailing `%` is ignored and non-numeric tokens such as
/// headers are skipped.
pub fn numeric_tokens(text: &str) -> impl Iterator<Item = f64> + '_ {
    text.split(|c: char| c.is_whitespace() || ",;:=".contains(c))
        .filter_map(|token| token.trim_end_matches('%').parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Reduce the numeric content of a result file to one metric value.
pub fn extract_metric(text: &str, extract: MetricExtract) -> Result<f64, String> {
    let values: Vec<f64> = numeric_tokens(text).collect();
    if values.is_empty() {
        return Err("no numeric values".to_string());
    }

    let value = match extract {
        MetricExtract::First => values[0],
        MetricExtract::Last => values[values.len() - 1],
        MetricExtract::Mean => values.iter().sum::<f64>() / values.len() as f64,
        MetricExtract::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        MetricExtract::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    };
    Ok(value)
}
