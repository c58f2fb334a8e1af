//! Tolerance checks between a reconstructed array and its reference.

use crate::dataset::{DatasetError, NumericArray, load_dataset};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComparisonChecks {
    pub compare_dimensions: bool,
    pub compare_values: bool,
    pub compare_scales: bool,
    pub threshold_values: f64,
    pub threshold_scales: f64,
}

impl Default for ComparisonChecks {
    fn default() -> Self {
        Self {
            compare_dimensions: false,
            compare_values: false,
            compare_scales: false,
            threshold_values: 0.01,
            threshold_scales: 0.01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Dimensions,
    Values,
    Scales,
}

impl CheckKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dimensions => "dimensions",
            Self::Values => "values",
            Self::Scales => "scales",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub kind: CheckKind,
    pub enabled: bool,
    pub passed: bool,
    /// Shape equality for dimensions, the norm ratio for values and `s` for
    /// scales. `None` when the metric is undefined.
    pub measured: Option<f64>,
    pub threshold: Option<f64>,
    pub reason: Option<String>,
}

impl CheckReport {
    fn disabled(kind: CheckKind) -> Self {
        Self {
            kind,
            enabled: false,
            passed: true,
            measured: None,
            threshold: None,
            reason: None,
        }
    }

    fn undefined(kind: CheckKind, threshold: f64, reason: impl Into<String>) -> Self {
        Self {
            kind,
            enabled: true,
            passed: false,
            measured: None,
            threshold: Some(threshold),
            reason: Some(reason.into()),
        }
    }

    /// Operator-facing line, or `None` for a disabled check.
    pub fn progress_line(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let line = match (self.kind, self.measured) {
            (CheckKind::Dimensions, _) => format!(
                "   --Comparing dimensions: {}",
                if self.passed { "True" } else { "False" }
            ),
            (CheckKind::Values, Some(ratio)) => format!(
                "   --Comparing values, norm diff : {} (threshold: {})",
                ratio,
                self.threshold.unwrap_or_default()
            ),
            (CheckKind::Scales, Some(scale)) => format!(
                "   --Comparing image scales, ratio : {} ({}) (threshold: {})",
                scale,
                (1.0 - scale).abs(),
                self.threshold.unwrap_or_default()
            ),
            (kind, None) => format!(
                "   --Comparing {}: undefined ({})",
                kind.as_str(),
                self.reason.as_deref().unwrap_or("no value")
            ),
        };
        Some(line)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonOutcome {
    pub result_shape: Vec<usize>,
    pub reference_shape: Vec<usize>,
    pub dimensions: CheckReport,
    pub values: CheckReport,
    pub scales: CheckReport,
    pub passed: bool,
}

impl ComparisonOutcome {
    pub fn checks(&self) -> [&CheckReport; 3] {
        [&self.dimensions, &self.values, &self.scales]
    }

    pub fn progress_lines(&self) -> Vec<String> {
        self.checks()
            .into_iter()
            .filter_map(CheckReport::progress_line)
            .collect()
    }
}

/// Loads both datasets and compares them.
pub fn compare(
    result_path: impl AsRef<Path>,
    result_dataset: &str,
    reference_path: impl AsRef<Path>,
    reference_dataset: &str,
    checks: &ComparisonChecks,
) -> Result<ComparisonOutcome, DatasetError> {
    let result = load_dataset(result_path, result_dataset)?;
    let reference = load_dataset(reference_path, reference_dataset)?;
    Ok(compare_arrays(&result, &reference, checks))
}

/// Evaluates every enabled check; disabled checks pass vacuously.
pub fn compare_arrays(
    result: &NumericArray,
    reference: &NumericArray,
    checks: &ComparisonChecks,
) -> ComparisonOutcome {
    let shapes_match = result.shape() == reference.shape();
    let lengths_match = result.len() == reference.len();

    let dimensions = if checks.compare_dimensions {
        CheckReport {
            kind: CheckKind::Dimensions,
            enabled: true,
            passed: shapes_match,
            measured: Some(if shapes_match { 1.0 } else { 0.0 }),
            threshold: None,
            reason: (!shapes_match).then(|| {
                format!(
                    "result shape {:?} differs from reference shape {:?}",
                    result.shape(),
                    reference.shape()
                )
            }),
        }
    } else {
        CheckReport::disabled(CheckKind::Dimensions)
    };

    let length_reason = || {
        format!(
            "result has {} elements but reference has {}",
            result.len(),
            reference.len()
        )
    };

    let values = if !checks.compare_values {
        CheckReport::disabled(CheckKind::Values)
    } else if !lengths_match {
        CheckReport::undefined(CheckKind::Values, checks.threshold_values, length_reason())
    } else {
        value_check(result.values(), reference.values(), checks.threshold_values)
    };

    let scales = if !checks.compare_scales {
        CheckReport::disabled(CheckKind::Scales)
    } else if !lengths_match {
        CheckReport::undefined(CheckKind::Scales, checks.threshold_scales, length_reason())
    } else {
        scale_check(result.values(), reference.values(), checks.threshold_scales)
    };

    let passed = dimensions.passed && values.passed && scales.passed;
    debug!(
        shapes_match,
        values = ?values.measured,
        scales = ?scales.measured,
        passed,
        "comparison finished"
    );

    ComparisonOutcome {
        result_shape: result.shape().to_vec(),
        reference_shape: reference.shape().to_vec(),
        dimensions,
        values,
        scales,
        passed,
    }
}

fn value_check(result: &[f64], reference: &[f64], threshold: f64) -> CheckReport {
    let reference_norm = l2_norm(reference.iter().copied());
    if reference_norm == 0.0 {
        return CheckReport::undefined(
            CheckKind::Values,
            threshold,
            "reference norm is zero",
        );
    }
    let difference_norm = l2_norm(result.iter().zip(reference).map(|(r, f)| r - f));
    let ratio = difference_norm / reference_norm;
    CheckReport {
        kind: CheckKind::Values,
        enabled: true,
        passed: ratio < threshold,
        measured: Some(ratio),
        threshold: Some(threshold),
        reason: None,
    }
}

fn scale_check(result: &[f64], reference: &[f64], threshold: f64) -> CheckReport {
    let cross = dot(result, reference);
    if cross == 0.0 {
        return CheckReport::undefined(
            CheckKind::Scales,
            threshold,
            "result and reference are orthogonal",
        );
    }
    let scale = dot(result, result) / cross;
    CheckReport {
        kind: CheckKind::Scales,
        enabled: true,
        passed: (1.0 - scale).abs() < threshold,
        measured: Some(scale),
        threshold: Some(threshold),
        reason: None,
    }
}

fn l2_norm(values: impl Iterator<Item = f64>) -> f64 {
    values.map(|value| value * value).sum::<f64>().sqrt()
}

fn dot(left: &[f64], right: &[f64]) -> f64 {
    left.iter().zip(right).map(|(l, r)| l * r).sum()
}
