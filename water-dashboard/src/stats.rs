use crate::api::WaterSeries;

/// The three figures shown under the consumption chart.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Summary {
    pub total: f64,
    pub average: f64,
    pub peak: f64,
}

impl Summary {
    pub fn from_values(values: &[f64]) -> Self {
        let total: f64 = values.iter().sum();
        let average = total / values.len().max(1) as f64;
        let peak = values.iter().copied().reduce(f64::max).unwrap_or(0.0);

        Self { total, average, peak }
    }
}

/// Pairs each value with its label index for plotting. Unequal arrays are
/// truncated to the shorter one.
pub fn chart_points(series: &WaterSeries) -> Vec<(f64, f64)> {
    series
        .labels
        .iter()
        .zip(series.data.iter())
        .enumerate()
        .map(|(i, (_, value))| (i as f64, *value))
        .collect()
}
