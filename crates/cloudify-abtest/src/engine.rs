//! AbTestEngine — assignment, conversion tracking, and results over
//! the state store.

use serde::{Deserialize, Serialize};
use tracing::debug;

use cloudify_core::{epoch_secs, new_id, slugify};
use cloudify_state::{AbConversion, AbParticipant, AbTest, StateStore, Targeting, Variant};

use crate::assign::{
    deterministic_draw, matches_targeting, pick_variant, random_percent, validate_variants,
    RequestContext,
};
use crate::error::AbTestResult;
use crate::results::{compute_results, TestResults};

/// One variant assignment handed back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub test_id: String,
    pub test_slug: String,
    pub variant: String,
    /// Whether this request created the participant record (as opposed
    /// to reading back a sticky assignment).
    pub fresh: bool,
}

/// The A/B assignment engine.
#[derive(Clone)]
pub struct AbTestEngine {
    store: StateStore,
}

impl AbTestEngine {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Create a test (disabled until explicitly enabled). Validates
    /// the weight invariant before persisting.
    #[allow(clippy::too_many_arguments)]
    pub fn create_test(
        &self,
        project_id: &str,
        name: &str,
        variants: Vec<Variant>,
        targeting: Option<Targeting>,
        starts_at: Option<u64>,
        ends_at: Option<u64>,
        primary_metric: Option<String>,
        goal_url: Option<String>,
    ) -> AbTestResult<AbTest> {
        validate_variants(&variants)?;
        let now = epoch_secs();
        let test = AbTest {
            id: new_id(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            slug: slugify(name),
            enabled: false,
            variants,
            targeting,
            starts_at,
            ends_at,
            primary_metric,
            goal_url,
            created_at: now,
            updated_at: now,
        };
        self.store.put_ab_test(&test)?;
        debug!(id = %test.id, slug = %test.slug, "ab test created");
        Ok(test)
    }

    /// Persist an updated test, re-validating the weight invariant.
    pub fn update_test(&self, mut test: AbTest) -> AbTestResult<AbTest> {
        validate_variants(&test.variants)?;
        test.updated_at = epoch_secs();
        self.store.put_ab_test(&test)?;
        Ok(test)
    }

    /// Assign the visitor to every active test of the project.
    ///
    /// Sticky assignments are returned as-is; new assignments pass the
    /// targeting rules, then the deterministic hash draw, and persist
    /// a participant record. A test skipped by targeting leaves no
    /// record.
    pub fn assign_variants(
        &self,
        project_id: &str,
        visitor_id: &str,
        ctx: &RequestContext,
    ) -> AbTestResult<Vec<Assignment>> {
        let now = epoch_secs();
        let mut assignments = Vec::new();

        for test in self.store.list_ab_tests_for_project(project_id)? {
            if !test.is_active(now) {
                continue;
            }

            // Sticky: an existing participant record always wins.
            if let Some(existing) = self.store.get_participant(&test.id, visitor_id)? {
                assignments.push(Assignment {
                    test_id: test.id.clone(),
                    test_slug: test.slug.clone(),
                    variant: existing.variant,
                    fresh: false,
                });
                continue;
            }

            if let Some(targeting) = &test.targeting {
                if !matches_targeting(targeting, ctx, random_percent()) {
                    continue;
                }
            }

            let draw = deterministic_draw(&test.id, visitor_id);
            let Some(variant) = pick_variant(&test.variants, draw) else {
                continue;
            };

            let participant = AbParticipant {
                test_id: test.id.clone(),
                visitor_id: visitor_id.to_string(),
                variant: variant.name.clone(),
                assigned_at: now,
            };
            // A concurrent duplicate attempt computes the same variant,
            // so whichever insert wins the stored value is identical.
            let (stored, created) = self.store.insert_participant_if_absent(&participant)?;
            assignments.push(Assignment {
                test_id: test.id.clone(),
                test_slug: test.slug.clone(),
                variant: stored.variant,
                fresh: created,
            });
        }

        Ok(assignments)
    }

    /// Record a conversion for a visitor's stored variant.
    ///
    /// Returns false (and records nothing) when the visitor was never
    /// assigned to the test.
    pub fn track_conversion(
        &self,
        test_id: &str,
        visitor_id: &str,
        kind: &str,
        value: Option<f64>,
        metadata: Option<serde_json::Value>,
    ) -> AbTestResult<bool> {
        let Some(participant) = self.store.get_participant(test_id, visitor_id)? else {
            return Ok(false);
        };
        self.store.append_conversion(&AbConversion {
            id: new_id(),
            test_id: test_id.to_string(),
            visitor_id: visitor_id.to_string(),
            variant: participant.variant,
            kind: kind.to_string(),
            value,
            metadata,
            created_at: epoch_secs(),
        })?;
        Ok(true)
    }

    /// Aggregate participants and conversions into per-variant results
    /// with significance for two-variant tests.
    pub fn results(&self, test_id: &str) -> AbTestResult<Option<TestResults>> {
        let Some(test) = self.store.get_ab_test(test_id)? else {
            return Ok(None);
        };
        let participant_counts = self.store.count_participants_by_variant(test_id)?;
        let conversion_aggregates = self.store.aggregate_conversions(test_id)?;
        let variant_names: Vec<String> =
            test.variants.iter().map(|v| v.name.clone()).collect();
        Ok(Some(compute_results(
            &variant_names,
            &participant_counts,
            &conversion_aggregates,
        )))
    }
}
