//! StateStore — redb-backed state persistence for Cloudify.
//!
//! Provides typed CRUD operations over deployments, logs, activity,
//! edge functions, invocations, and A/B test records. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for
//! testing).
//!
//! Deployment status changes go through [`StateStore::transition_deployment`],
//! which validates the transition against the lifecycle graph inside a
//! single write transaction. redb serializes write transactions, so a
//! stale transition attempt always observes the winner's committed
//! status and is rejected instead of resurrecting a terminal
//! deployment.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENT_LOGS).map_err(map_err!(Table))?;
        txn.open_table(ACTIVITY).map_err(map_err!(Table))?;
        txn.open_table(EDGE_FUNCTIONS).map_err(map_err!(Table))?;
        txn.open_table(EDGE_INVOCATIONS).map_err(map_err!(Table))?;
        txn.open_table(AB_TESTS).map_err(map_err!(Table))?;
        txn.open_table(AB_PARTICIPANTS).map_err(map_err!(Table))?;
        txn.open_table(AB_CONVERSIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or update a deployment record.
    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        let value = serde_json::to_vec(deployment).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(deployment.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %deployment.id, status = deployment.status.as_str(), "deployment stored");
        Ok(())
    }

    /// Get a deployment by id.
    pub fn get_deployment(&self, id: &str) -> StateResult<Option<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let deployment: Deployment =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(deployment))
            }
            None => Ok(None),
        }
    }

    /// List deployments for a project, newest first, with offset/limit
    /// pagination.
    pub fn list_deployments_for_project(
        &self,
        project_id: &str,
        offset: usize,
        limit: usize,
    ) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let deployment: Deployment =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if deployment.project_id == project_id {
                results.push(deployment);
            }
        }
        results.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(results.into_iter().skip(offset).take(limit).collect())
    }

    /// Atomically transition a deployment to a new status.
    ///
    /// The read, legality check, and write all happen inside one write
    /// transaction, so concurrent transition attempts serialize and
    /// the loser observes the winner's status. `finished_at` is set
    /// exactly when the new status is terminal; `url` is applied when
    /// provided (entering READY).
    pub fn transition_deployment(
        &self,
        id: &str,
        to: DeploymentStatus,
        url: Option<&str>,
        now: u64,
    ) -> StateResult<Deployment> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let mut deployment: Deployment = match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("deployment {id}"))),
            };

            let from = deployment.status;
            if from.is_terminal() {
                return Err(StateError::TerminalState {
                    id: id.to_string(),
                    status: from,
                });
            }
            if !from.can_transition_to(to) {
                return Err(StateError::IllegalTransition {
                    id: id.to_string(),
                    from,
                    to,
                });
            }

            deployment.status = to;
            if to.is_terminal() {
                deployment.finished_at = Some(now);
            }
            if let Some(url) = url {
                deployment.url = Some(url.to_string());
            }

            let value = serde_json::to_vec(&deployment).map_err(map_err!(Serialize))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
            updated = deployment;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, to = to.as_str(), "deployment transitioned");
        Ok(updated)
    }

    // ── Deployment logs ────────────────────────────────────────────

    /// Append a log line to a deployment. Sequence numbers are
    /// allocated inside the write transaction, so appends never race.
    pub fn append_deployment_log(
        &self,
        deployment_id: &str,
        level: LogLevel,
        message: &str,
        now: u64,
    ) -> StateResult<DeploymentLog> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let log;
        {
            let mut table = txn.open_table(DEPLOYMENT_LOGS).map_err(map_err!(Table))?;
            let seq = next_seq(&table, deployment_id)?;
            log = DeploymentLog {
                seq,
                level,
                message: message.to_string(),
                created_at: now,
            };
            let key = format!("{deployment_id}:{seq:010}");
            let value = serde_json::to_vec(&log).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(log)
    }

    /// List all log lines for a deployment in append order.
    pub fn list_deployment_logs(&self, deployment_id: &str) -> StateResult<Vec<DeploymentLog>> {
        let prefix = format!("{deployment_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENT_LOGS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let log: DeploymentLog =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(log);
            }
        }
        Ok(results)
    }

    // ── Activity ───────────────────────────────────────────────────

    /// Append an activity record for a project.
    pub fn append_activity(
        &self,
        project_id: &str,
        deployment_id: Option<&str>,
        action: &str,
        detail: &str,
        now: u64,
    ) -> StateResult<ActivityRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record;
        {
            let mut table = txn.open_table(ACTIVITY).map_err(map_err!(Table))?;
            let seq = next_seq(&table, project_id)?;
            record = ActivityRecord {
                id: format!("{project_id}:{seq:010}"),
                project_id: project_id.to_string(),
                deployment_id: deployment_id.map(str::to_string),
                action: action.to_string(),
                detail: detail.to_string(),
                created_at: now,
            };
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(record.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(record)
    }

    /// List activity for a project in append order.
    pub fn list_activity_for_project(&self, project_id: &str) -> StateResult<Vec<ActivityRecord>> {
        let prefix = format!("{project_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ACTIVITY).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let record: ActivityRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    // ── Edge functions ─────────────────────────────────────────────

    /// Insert or update an edge function.
    pub fn put_edge_function(&self, function: &EdgeFunction) -> StateResult<()> {
        let value = serde_json::to_vec(function).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(EDGE_FUNCTIONS).map_err(map_err!(Table))?;
            table
                .insert(function.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %function.id, "edge function stored");
        Ok(())
    }

    /// Get an edge function by id.
    pub fn get_edge_function(&self, id: &str) -> StateResult<Option<EdgeFunction>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EDGE_FUNCTIONS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let function: EdgeFunction =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(function))
            }
            None => Ok(None),
        }
    }

    /// List edge functions for a project in `(created_at, id)` order.
    ///
    /// This ordering is the documented route-matching tie-break: the
    /// oldest function whose pattern matches wins.
    pub fn list_edge_functions_for_project(
        &self,
        project_id: &str,
    ) -> StateResult<Vec<EdgeFunction>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EDGE_FUNCTIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let function: EdgeFunction =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if function.project_id == project_id {
                results.push(function);
            }
        }
        results.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(results)
    }

    /// Delete an edge function by id. Returns true if it existed.
    pub fn delete_edge_function(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(EDGE_FUNCTIONS).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Edge invocations ───────────────────────────────────────────

    /// Append an invocation audit record.
    pub fn append_invocation(&self, invocation: &EdgeInvocation) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(EDGE_INVOCATIONS).map_err(map_err!(Table))?;
            let seq = next_seq(&table, &invocation.function_id)?;
            let key = format!("{}:{seq:010}", invocation.function_id);
            let value = serde_json::to_vec(invocation).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List the most recent invocations for a function, newest first.
    pub fn list_invocations_for_function(
        &self,
        function_id: &str,
        limit: usize,
    ) -> StateResult<Vec<EdgeInvocation>> {
        let prefix = format!("{function_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EDGE_INVOCATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let invocation: EdgeInvocation =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(invocation);
            }
        }
        results.reverse();
        results.truncate(limit);
        Ok(results)
    }

    // ── A/B tests ──────────────────────────────────────────────────

    /// Insert or update an A/B test.
    pub fn put_ab_test(&self, test: &AbTest) -> StateResult<()> {
        let value = serde_json::to_vec(test).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(AB_TESTS).map_err(map_err!(Table))?;
            table
                .insert(test.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %test.id, "ab test stored");
        Ok(())
    }

    /// Get an A/B test by id.
    pub fn get_ab_test(&self, id: &str) -> StateResult<Option<AbTest>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(AB_TESTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let test: AbTest =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(test))
            }
            None => Ok(None),
        }
    }

    /// List all A/B tests for a project.
    pub fn list_ab_tests_for_project(&self, project_id: &str) -> StateResult<Vec<AbTest>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(AB_TESTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let test: AbTest =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if test.project_id == project_id {
                results.push(test);
            }
        }
        results.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(results)
    }

    /// Delete an A/B test and cascade to its participants and
    /// conversions. Returns true if the test existed.
    pub fn delete_ab_test(&self, id: &str) -> StateResult<bool> {
        let prefix = format!("{id}:");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut tests = txn.open_table(AB_TESTS).map_err(map_err!(Table))?;
            existed = tests.remove(id).map_err(map_err!(Write))?.is_some();

            let mut participants = txn.open_table(AB_PARTICIPANTS).map_err(map_err!(Table))?;
            remove_prefix(&mut participants, &prefix)?;

            let mut conversions = txn.open_table(AB_CONVERSIONS).map_err(map_err!(Table))?;
            remove_prefix(&mut conversions, &prefix)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, existed, "ab test deleted (cascade)");
        Ok(existed)
    }

    // ── Participants ───────────────────────────────────────────────

    /// Get the sticky assignment for a (test, visitor) pair.
    pub fn get_participant(
        &self,
        test_id: &str,
        visitor_id: &str,
    ) -> StateResult<Option<AbParticipant>> {
        let key = participant_key(test_id, visitor_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(AB_PARTICIPANTS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let participant: AbParticipant =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(participant))
            }
            None => Ok(None),
        }
    }

    /// Insert a participant unless one already exists for the
    /// (test, visitor) pair. Returns the stored participant and
    /// whether this call created it. The check-and-insert runs in one
    /// write transaction, making the unique constraint race-free.
    pub fn insert_participant_if_absent(
        &self,
        participant: &AbParticipant,
    ) -> StateResult<(AbParticipant, bool)> {
        let key = participant.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result;
        {
            let mut table = txn.open_table(AB_PARTICIPANTS).map_err(map_err!(Table))?;
            let existing = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice::<AbParticipant>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            match existing {
                Some(existing) => result = (existing, false),
                None => {
                    let value = serde_json::to_vec(participant).map_err(map_err!(Serialize))?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    result = (participant.clone(), true);
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(result)
    }

    /// Participant counts grouped by variant.
    pub fn count_participants_by_variant(
        &self,
        test_id: &str,
    ) -> StateResult<HashMap<String, u64>> {
        let prefix = format!("{test_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(AB_PARTICIPANTS).map_err(map_err!(Table))?;
        let mut counts = HashMap::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let participant: AbParticipant =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                *counts.entry(participant.variant).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    // ── Conversions ────────────────────────────────────────────────

    /// Append a conversion record.
    pub fn append_conversion(&self, conversion: &AbConversion) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(AB_CONVERSIONS).map_err(map_err!(Table))?;
            let seq = next_seq(&table, &conversion.test_id)?;
            let key = format!("{}:{seq:010}", conversion.test_id);
            let value = serde_json::to_vec(conversion).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List all conversions for a test in append order.
    pub fn list_conversions_for_test(&self, test_id: &str) -> StateResult<Vec<AbConversion>> {
        let prefix = format!("{test_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(AB_CONVERSIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let conversion: AbConversion =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(conversion);
            }
        }
        Ok(results)
    }

    /// Per-variant conversion count and total value.
    pub fn aggregate_conversions(
        &self,
        test_id: &str,
    ) -> StateResult<HashMap<String, (u64, f64)>> {
        let mut aggregates: HashMap<String, (u64, f64)> = HashMap::new();
        for conversion in self.list_conversions_for_test(test_id)? {
            let entry = aggregates.entry(conversion.variant).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += conversion.value.unwrap_or(0.0);
        }
        Ok(aggregates)
    }
}

/// Allocate the next sequence number for a `{prefix}:{seq:010}` keyed
/// table by scanning the existing prefix. Must be called inside the
/// write transaction that inserts the record.
fn next_seq<T: ReadableTable<&'static str, &'static [u8]>>(
    table: &T,
    prefix_id: &str,
) -> StateResult<u64> {
    let prefix = format!("{prefix_id}:");
    let mut max_seq = None;
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, _) = entry.map_err(map_err!(Read))?;
        if let Some(suffix) = key.value().strip_prefix(&prefix) {
            if let Ok(seq) = suffix.parse::<u64>() {
                max_seq = Some(max_seq.map_or(seq, |m: u64| m.max(seq)));
            }
        }
    }
    Ok(max_seq.map_or(0, |m| m + 1))
}

/// Remove every entry whose key starts with `prefix`. Returns the
/// number of removed entries.
fn remove_prefix(
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    prefix: &str,
) -> StateResult<u32> {
    let keys: Vec<String> = table
        .iter()
        .map_err(map_err!(Read))?
        .filter_map(|entry| {
            let (key, _) = entry.ok()?;
            let k = key.value().to_string();
            k.starts_with(prefix).then_some(k)
        })
        .collect();
    let count = keys.len() as u32;
    for key in &keys {
        table.remove(key.as_str()).map_err(map_err!(Write))?;
    }
    Ok(count)
}
