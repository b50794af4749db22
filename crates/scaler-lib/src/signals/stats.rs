//! Per-pod signal processing
//!
//! Turns raw ELU/heap series into pod snapshots and averages snapshots into
//! application-level pre/post scaling metrics.

use crate::models::{PodMetricsSeries, PodSnapshot, PreScalingMetrics, ScalingThresholds};

/// Process one pod's raw series against the active thresholds
pub fn process_pod(series: &PodMetricsSeries, thresholds: &ScalingThresholds) -> PodSnapshot {
    let elu: Vec<f64> = series.elu.iter().copied().filter(|v| v.is_finite()).collect();
    let heap = heap_ratios(series);

    let elu_mean = mean(&elu);
    let heap_mean = mean(&heap);

    PodSnapshot {
        elu_mean,
        heap_mean,
        elu_variability: std_dev(&elu),
        heap_variability: std_dev(&heap),
        elu_trend: linear_regression_slope(&elu),
        heap_trend: linear_regression_slope(&heap),
        unhealthy: elu_mean > thresholds.elu || heap_mean > thresholds.heap,
    }
}

/// Average a set of pod snapshots; empty input yields all zeros
pub fn aggregate(snapshots: &[PodSnapshot]) -> PreScalingMetrics {
    if snapshots.is_empty() {
        return PreScalingMetrics::default();
    }
    let avg = |f: fn(&PodSnapshot) -> f64| mean(&snapshots.iter().map(f).collect::<Vec<_>>());

    PreScalingMetrics {
        elu_mean: avg(|s| s.elu_mean),
        heap_mean: avg(|s| s.heap_mean),
        elu_trend: avg(|s| s.elu_trend),
        heap_trend: avg(|s| s.heap_trend),
        elu_variability: avg(|s| s.elu_variability),
        heap_variability: avg(|s| s.heap_variability),
    }
}

fn heap_ratios(series: &PodMetricsSeries) -> Vec<f64> {
    series
        .heap_used
        .iter()
        .zip(series.heap_total.iter())
        .filter(|(_, total)| **total > 0.0)
        .map(|(used, total)| used / total)
        .filter(|r| r.is_finite())
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (sum_sq / values.len() as f64).sqrt()
}

/// Calculate linear regression slope for trend detection
pub fn linear_regression_slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_x2: f64 = (0..values.len()).map(|i| (i as f64).powi(2)).sum();
    let denom = n * sum_x2 - sum_x.powi(2);
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denom
}
