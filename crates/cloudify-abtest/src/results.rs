//! Results aggregation and statistical significance.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Aggregated outcome of one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantResult {
    pub name: String,
    pub participants: u64,
    pub conversions: u64,
    /// Conversion rate in percent, rounded to two decimals.
    pub conversion_rate: f64,
    pub total_value: f64,
}

/// Full results of a test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResults {
    pub variants: Vec<VariantResult>,
    /// Two-proportion z-test confidence in percent, capped at 99.9.
    /// Only computed for exactly two variants.
    pub confidence: Option<f64>,
}

/// Build per-variant results from grouped counts and compute
/// significance for two-variant tests.
///
/// `variant_names` fixes the output order (variants with no data show
/// zeros); `participant_counts` and `conversion_aggregates` come from
/// the store's group-by queries.
pub fn compute_results(
    variant_names: &[String],
    participant_counts: &HashMap<String, u64>,
    conversion_aggregates: &HashMap<String, (u64, f64)>,
) -> TestResults {
    let variants: Vec<VariantResult> = variant_names
        .iter()
        .map(|name| {
            let participants = participant_counts.get(name).copied().unwrap_or(0);
            let (conversions, total_value) =
                conversion_aggregates.get(name).copied().unwrap_or((0, 0.0));
            let conversion_rate = if participants > 0 {
                round2(conversions as f64 * 100.0 / participants as f64)
            } else {
                0.0
            };
            VariantResult {
                name: name.clone(),
                participants,
                conversions,
                conversion_rate,
                total_value,
            }
        })
        .collect();

    let confidence = match variants.as_slice() {
        [a, b] => two_proportion_confidence(
            a.conversions,
            a.participants,
            b.conversions,
            b.participants,
        ),
        _ => None,
    };

    TestResults {
        variants,
        confidence,
    }
}

/// Two-proportion z-test approximation, reported as a confidence
/// percentage capped at 99.9. Returns `None` when either side has no
/// participants or the pooled rate is degenerate.
fn two_proportion_confidence(c1: u64, n1: u64, c2: u64, n2: u64) -> Option<f64> {
    if n1 == 0 || n2 == 0 {
        return None;
    }
    let (n1f, n2f) = (n1 as f64, n2 as f64);
    let p1 = c1 as f64 / n1f;
    let p2 = c2 as f64 / n2f;
    let pooled = (c1 + c2) as f64 / (n1f + n2f);
    let variance = pooled * (1.0 - pooled) * (1.0 / n1f + 1.0 / n2f);
    if variance <= 0.0 {
        return None;
    }
    let z = (p1 - p2).abs() / variance.sqrt();
    // Two-sided: confidence that the difference is real.
    let confidence = (2.0 * normal_cdf(z) - 1.0) * 100.0;
    Some(round2(confidence.min(99.9)))
}

/// Standard normal CDF via the Abramowitz–Stegun erf approximation
/// (7.1.26, max absolute error ~1.5e-7).
fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
