//! redb table definitions for the Cloudify state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized
//! domain types). Composite keys follow `{parent_id}:{child}`;
//! appended records use zero-padded sequence numbers so prefix scans
//! come back in append order.

use redb::TableDefinition;

/// Deployments keyed by `{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Deployment log lines keyed by `{deployment_id}:{seq:010}`.
pub const DEPLOYMENT_LOGS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployment_logs");

/// Activity records keyed by `{project_id}:{seq:010}`.
pub const ACTIVITY: TableDefinition<&str, &[u8]> = TableDefinition::new("activity");

/// Edge functions keyed by `{function_id}`.
pub const EDGE_FUNCTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("edge_functions");

/// Edge invocations keyed by `{function_id}:{seq:010}` (append-only).
pub const EDGE_INVOCATIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("edge_invocations");

/// A/B tests keyed by `{test_id}`.
pub const AB_TESTS: TableDefinition<&str, &[u8]> = TableDefinition::new("ab_tests");

/// Participants keyed by `{test_id}:{visitor_id}` — the key itself is
/// the one-per-(test, visitor) unique constraint.
pub const AB_PARTICIPANTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("ab_participants");

/// Conversions keyed by `{test_id}:{seq:010}` (append-only).
pub const AB_CONVERSIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("ab_conversions");
