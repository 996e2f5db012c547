//! Deterministic variant selection and targeting evaluation.

use sha2::{Digest, Sha256};

use cloudify_core::glob_match;
use cloudify_state::{Targeting, Variant};

use crate::error::{AbTestError, AbTestResult};

/// Per-request context consulted by targeting rules.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// ISO country code, uppercased.
    pub country: Option<String>,
    /// Device class string ("desktop" | "mobile" | "tablet").
    pub device: Option<String>,
    /// Browser family string ("chrome", "safari", …).
    pub browser: Option<String>,
    /// Request path for URL-pattern targeting.
    pub path: String,
}

/// Map a (test, visitor) pair to a stable draw in `[0, 100)`.
///
/// SHA-256 of `testId:visitorId`, top 32 bits taken as an unsigned
/// integer and scaled. Pure function of its inputs — two concurrent
/// assignment attempts compute the same draw.
pub fn deterministic_draw(test_id: &str, visitor_id: &str) -> f64 {
    let digest = Sha256::digest(format!("{test_id}:{visitor_id}").as_bytes());
    let top = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (top as f64) * 100.0 / (u32::MAX as f64 + 1.0)
}

/// Walk the variant list accumulating weights until the running total
/// exceeds the draw. Returns the last variant as a guard against
/// floating-point edge effects at 100.0.
pub fn pick_variant<'a>(variants: &'a [Variant], draw: f64) -> Option<&'a Variant> {
    let mut cumulative = 0.0;
    for variant in variants {
        cumulative += variant.weight as f64;
        if draw < cumulative {
            return Some(variant);
        }
    }
    variants.last()
}

/// Enforce the weight invariant: at least one variant, weights summing
/// to exactly 100. Rejected, never normalized.
pub fn validate_variants(variants: &[Variant]) -> AbTestResult<()> {
    if variants.is_empty() {
        return Err(AbTestError::NoVariants);
    }
    let sum: u32 = variants.iter().map(|v| v.weight).sum();
    if sum != 100 {
        return Err(AbTestError::InvalidWeights(sum));
    }
    Ok(())
}

/// Evaluate targeting rules in order. `percentage_roll` is the
/// caller-supplied uniform draw in `[0, 100)` for the probabilistic
/// gate — fresh per request, by design.
///
/// Returns false as soon as any rule fails; a failing rule skips the
/// test for this request without creating a participant.
pub fn matches_targeting(
    targeting: &Targeting,
    ctx: &RequestContext,
    percentage_roll: f64,
) -> bool {
    if !targeting.countries.is_empty() {
        let Some(country) = ctx.country.as_deref() else {
            return false;
        };
        if !targeting
            .countries
            .iter()
            .any(|c| c.eq_ignore_ascii_case(country))
        {
            return false;
        }
    }

    if !targeting.devices.is_empty() {
        let Some(device) = ctx.device.as_deref() else {
            return false;
        };
        if !targeting
            .devices
            .iter()
            .any(|d| d.eq_ignore_ascii_case(device))
        {
            return false;
        }
    }

    if !targeting.browsers.is_empty() {
        let Some(browser) = ctx.browser.as_deref() else {
            return false;
        };
        if !targeting
            .browsers
            .iter()
            .any(|b| b.eq_ignore_ascii_case(browser))
        {
            return false;
        }
    }

    if let Some(percentage) = targeting.percentage {
        if percentage_roll >= percentage {
            return false;
        }
    }

    if !targeting.url_patterns.is_empty()
        && !targeting
            .url_patterns
            .iter()
            .any(|pattern| glob_match(pattern, &ctx.path))
    {
        return false;
    }

    true
}

/// Uniform random draw in `[0, 100)` for the percentage gate.
pub fn random_percent() -> f64 {
    let mut bytes = [0u8; 4];
    if getrandom::getrandom(&mut bytes).is_err() {
        // No entropy source: admit everyone rather than silently
        // excluding the whole population.
        return 0.0;
    }
    (u32::from_be_bytes(bytes) as f64) * 100.0 / (u32::MAX as f64 + 1.0)
}
