//! Enrollment storage with secondary indexes and compare-and-set writes.
//!
//! Tables:
//! - `enrollments:data` - id -> JSON record
//! - `enrollments:by_flow` - `{flow_id}:{id}` -> id
//! - `enrollments:by_user` - `{user_id}:{id}` -> id
//! - `enrollments:due` - `{next_process_at:020}:{id}` -> id, active records only
//!
//! Every mutation re-reads the record inside a redb write transaction. redb
//! serializes write transactions, which makes each of them a single mutation
//! point for the record and its indexes.

use crate::models::{EnrollmentGuard, EnrollmentStatus, FlowEnrollment, TriggerConfig};
use anyhow::Result;
use nurture_storage::range_utils::{prefix_range, timestamp_key, timestamp_upper_bound};
use nurture_storage::time_utils::{self, minutes_to_ms};
use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use std::sync::Arc;
use tracing::debug;

const ENROLLMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("enrollments:data");
const BY_FLOW: TableDefinition<&str, &str> = TableDefinition::new("enrollments:by_flow");
const BY_USER: TableDefinition<&str, &str> = TableDefinition::new("enrollments:by_user");
const DUE: TableDefinition<&str, &str> = TableDefinition::new("enrollments:due");

/// Re-entry rules taken from a flow's trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPolicy {
    pub allow_re_entry: bool,
    pub cooldown_ms: i64,
}

impl EntryPolicy {
    pub fn from_trigger(trigger: &TriggerConfig) -> Self {
        Self {
            allow_re_entry: trigger.allow_re_entry,
            cooldown_ms: minutes_to_ms(trigger.re_entry_cooldown_minutes),
        }
    }
}

/// Result of an enrollment attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(FlowEnrollment),
    /// The user is still travelling through the flow.
    AlreadyEnrolled { enrollment_id: String },
    /// The user went through the flow before and re-entry is off.
    ReEntryDisabled,
    /// Re-entry is allowed again at `until`.
    CoolingDown { until: i64 },
}

impl CreateOutcome {
    pub fn created(&self) -> Option<&FlowEnrollment> {
        match self {
            CreateOutcome::Created(enrollment) => Some(enrollment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnrollmentStore {
    db: Arc<Database>,
}

impl EnrollmentStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(ENROLLMENTS)?;
        write_txn.open_table(BY_FLOW)?;
        write_txn.open_table(BY_USER)?;
        write_txn.open_table(DUE)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    pub fn get(&self, id: &str) -> Result<Option<FlowEnrollment>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENROLLMENTS)?;

        if let Some(value) = table.get(id)? {
            Ok(Some(serde_json::from_slice(value.value())?))
        } else {
            Ok(None)
        }
    }

    /// Enrollments of a flow, optionally restricted to one status.
    pub fn list_by_flow(
        &self,
        flow_id: &str,
        status: Option<EnrollmentStatus>,
    ) -> Result<Vec<FlowEnrollment>> {
        let enrollments = self.list_indexed(BY_FLOW, flow_id)?;
        Ok(enrollments
            .into_iter()
            .filter(|e| e.flow_id == flow_id && status.is_none_or(|s| e.status == s))
            .collect())
    }

    pub fn list_by_user(&self, user_id: &str) -> Result<Vec<FlowEnrollment>> {
        let enrollments = self.list_indexed(BY_USER, user_id)?;
        Ok(enrollments
            .into_iter()
            .filter(|e| e.user_id == user_id)
            .collect())
    }

    fn list_indexed(
        &self,
        index: TableDefinition<'static, &'static str, &'static str>,
        owner: &str,
    ) -> Result<Vec<FlowEnrollment>> {
        let read_txn = self.db.begin_read()?;
        let index_table = read_txn.open_table(index)?;
        let data = read_txn.open_table(ENROLLMENTS)?;

        let (start, end) = prefix_range(&format!("{}:", owner));
        let mut enrollments = Vec::new();
        for item in index_table.range(start.as_str()..end.as_str())? {
            let (_, value) = item?;
            if let Some(bytes) = data.get(value.value())? {
                enrollments.push(serde_json::from_slice(bytes.value())?);
            }
        }
        Ok(enrollments)
    }

    /// Active enrollments with `next_process_at <= now`, earliest first.
    pub fn due(&self, now: i64, limit: usize) -> Result<Vec<FlowEnrollment>> {
        self.due_where(now, limit, |_| true)
    }

    /// Like [`Self::due`], skipping records `keep` rejects without counting
    /// them against `limit`.
    pub fn due_where(
        &self,
        now: i64,
        limit: usize,
        keep: impl Fn(&FlowEnrollment) -> bool,
    ) -> Result<Vec<FlowEnrollment>> {
        let read_txn = self.db.begin_read()?;
        let due = read_txn.open_table(DUE)?;
        let data = read_txn.open_table(ENROLLMENTS)?;

        let upper = timestamp_upper_bound(now);
        let mut enrollments = Vec::new();
        for item in due.range(..upper.as_str())? {
            if enrollments.len() >= limit {
                break;
            }
            let (_, value) = item?;
            if let Some(bytes) = data.get(value.value())? {
                let enrollment: FlowEnrollment = serde_json::from_slice(bytes.value())?;
                if keep(&enrollment) {
                    enrollments.push(enrollment);
                }
            }
        }
        Ok(enrollments)
    }

    pub fn count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENROLLMENTS)?;
        Ok(table.len()? as usize)
    }

    /// Unconditional write, keeping every index in step.
    pub fn upsert(&self, enrollment: &FlowEnrollment) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        let previous = read_record(&write_txn, &enrollment.id)?;
        write_record(&write_txn, previous.as_ref(), enrollment)?;
        write_txn.commit()?;
        Ok(())
    }

    /// Replace the record only if it still matches `guard`.
    ///
    /// Returns the stored record (revision bumped) or `None` when another
    /// writer got there first, the record is gone, or it already reached a
    /// terminal state.
    pub fn compare_and_swap(
        &self,
        guard: &EnrollmentGuard,
        next: &FlowEnrollment,
    ) -> Result<Option<FlowEnrollment>> {
        let write_txn = self.db.begin_write()?;
        let current = read_record(&write_txn, &next.id)?;

        let Some(current) = current.filter(|c| !c.status.is_terminal() && c.matches_guard(guard))
        else {
            write_txn.abort()?;
            debug!(enrollment_id = %next.id, "Compare-and-swap lost");
            return Ok(None);
        };

        let mut stored = next.clone();
        stored.revision = current.revision + 1;
        stored.updated_at = time_utils::now_ms();
        write_record(&write_txn, Some(&current), &stored)?;
        write_txn.commit()?;
        Ok(Some(stored))
    }

    /// Insert `candidate` unless the user's history in the flow forbids it.
    /// The check and the insert share one write transaction.
    pub fn create_if_eligible(
        &self,
        candidate: &FlowEnrollment,
        policy: EntryPolicy,
        now: i64,
    ) -> Result<CreateOutcome> {
        let write_txn = self.db.begin_write()?;
        let history: Vec<FlowEnrollment> =
            read_user_records(&write_txn, &candidate.user_id)?
                .into_iter()
                .filter(|e| e.flow_id == candidate.flow_id)
                .collect();

        let same_occurrence = candidate
            .trigger_key
            .as_ref()
            .and_then(|key| history.iter().find(|e| e.trigger_key.as_ref() == Some(key)));

        let outcome = if let Some(earlier) = same_occurrence {
            CreateOutcome::AlreadyEnrolled {
                enrollment_id: earlier.id.clone(),
            }
        } else if let Some(open) = history.iter().find(|e| !e.status.is_terminal()) {
            CreateOutcome::AlreadyEnrolled {
                enrollment_id: open.id.clone(),
            }
        } else if !history.is_empty() && !policy.allow_re_entry {
            CreateOutcome::ReEntryDisabled
        } else {
            // Cooldown runs from the last completed or exited run; errored runs don't count.
            let last_finished = history
                .iter()
                .filter(|e| {
                    matches!(e.status, EnrollmentStatus::Completed | EnrollmentStatus::Exited)
                })
                .map(|e| e.finished_at.unwrap_or(e.updated_at))
                .max();
            match last_finished {
                Some(finished) if now < finished.saturating_add(policy.cooldown_ms) => {
                    CreateOutcome::CoolingDown {
                        until: finished.saturating_add(policy.cooldown_ms),
                    }
                }
                _ => CreateOutcome::Created(candidate.clone()),
            }
        };

        if let CreateOutcome::Created(enrollment) = &outcome {
            write_record(&write_txn, None, enrollment)?;
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(outcome)
    }

    /// Remove every enrollment of a flow. Returns how many were removed.
    pub fn delete_by_flow(&self, flow_id: &str) -> Result<usize> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let (start, end) = prefix_range(&format!("{}:", flow_id));
            let mut by_flow = write_txn.open_table(BY_FLOW)?;
            let mut keys = Vec::new();
            for item in by_flow.range(start.as_str()..end.as_str())? {
                let (key, value) = item?;
                keys.push((key.value().to_string(), value.value().to_string()));
            }
            for (key, _) in &keys {
                by_flow.remove(key.as_str())?;
            }
            drop(by_flow);

            let mut removed = 0;
            for (_, id) in keys {
                if let Some(record) = read_record(&write_txn, &id)? {
                    remove_record(&write_txn, &record)?;
                    removed += 1;
                }
            }
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = match read_record(&write_txn, id)? {
            Some(record) => {
                remove_record(&write_txn, &record)?;
                write_txn
                    .open_table(BY_FLOW)?
                    .remove(flow_key(&record).as_str())?;
                true
            }
            None => false,
        };
        write_txn.commit()?;
        Ok(existed)
    }
}

fn flow_key(enrollment: &FlowEnrollment) -> String {
    format!("{}:{}", enrollment.flow_id, enrollment.id)
}

fn user_key(enrollment: &FlowEnrollment) -> String {
    format!("{}:{}", enrollment.user_id, enrollment.id)
}

fn due_key(enrollment: &FlowEnrollment) -> Option<String> {
    match (enrollment.status, enrollment.next_process_at) {
        (EnrollmentStatus::Active, Some(at)) => Some(timestamp_key(at, &enrollment.id)),
        _ => None,
    }
}

fn read_record(txn: &WriteTransaction, id: &str) -> Result<Option<FlowEnrollment>> {
    let table = txn.open_table(ENROLLMENTS)?;
    let bytes = table.get(id)?.map(|value| value.value().to_vec());
    match bytes {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn read_user_records(txn: &WriteTransaction, user_id: &str) -> Result<Vec<FlowEnrollment>> {
    let (start, end) = prefix_range(&format!("{}:", user_id));
    let ids = {
        let by_user = txn.open_table(BY_USER)?;
        let mut ids = Vec::new();
        for item in by_user.range(start.as_str()..end.as_str())? {
            let (_, value) = item?;
            ids.push(value.value().to_string());
        }
        ids
    };

    let mut records = Vec::new();
    for id in ids {
        if let Some(record) = read_record(txn, &id)?
            && record.user_id == user_id
        {
            records.push(record);
        }
    }
    Ok(records)
}

fn write_record(
    txn: &WriteTransaction,
    previous: Option<&FlowEnrollment>,
    next: &FlowEnrollment,
) -> Result<()> {
    let bytes = serde_json::to_vec(next)?;
    {
        let mut data = txn.open_table(ENROLLMENTS)?;
        data.insert(next.id.as_str(), bytes.as_slice())?;
    }
    {
        let mut due = txn.open_table(DUE)?;
        if let Some(old_key) = previous.and_then(due_key) {
            due.remove(old_key.as_str())?;
        }
        if let Some(new_key) = due_key(next) {
            due.insert(new_key.as_str(), next.id.as_str())?;
        }
    }
    if previous.is_none() {
        let mut by_flow = txn.open_table(BY_FLOW)?;
        by_flow.insert(flow_key(next).as_str(), next.id.as_str())?;
        drop(by_flow);
        let mut by_user = txn.open_table(BY_USER)?;
        by_user.insert(user_key(next).as_str(), next.id.as_str())?;
    }
    Ok(())
}

/// Drop the record with its due and user index entries. The caller owns the flow index.
fn remove_record(txn: &WriteTransaction, record: &FlowEnrollment) -> Result<()> {
    txn.open_table(ENROLLMENTS)?.remove(record.id.as_str())?;
    if let Some(key) = due_key(record) {
        txn.open_table(DUE)?.remove(key.as_str())?;
    }
    txn.open_table(BY_USER)?.remove(user_key(record).as_str())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nurture_storage::time_utils::MINUTE_MS;
    use tempfile::tempdir;

    fn setup() -> (EnrollmentStore, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("test.db")).unwrap());
        (EnrollmentStore::new(db).unwrap(), temp_dir)
    }

    fn policy(allow_re_entry: bool, cooldown_minutes: u64) -> EntryPolicy {
        EntryPolicy {
            allow_re_entry,
            cooldown_ms: minutes_to_ms(cooldown_minutes),
        }
    }

    #[test]
    fn test_upsert_and_indexes() {
        let (store, _temp_dir) = setup();
        let a = FlowEnrollment::new("flow-1", 1, "alice", "start", 100);
        let b = FlowEnrollment::new("flow-1", 1, "bob", "start", 200);
        let c = FlowEnrollment::new("flow-2", 1, "alice", "start", 300);
        for enrollment in [&a, &b, &c] {
            store.upsert(enrollment).unwrap();
        }

        assert_eq!(store.get(&a.id).unwrap().unwrap(), a);
        assert_eq!(store.list_by_flow("flow-1", None).unwrap().len(), 2);
        assert_eq!(store.list_by_user("alice").unwrap().len(), 2);
        assert!(
            store
                .list_by_flow("flow-1", Some(EnrollmentStatus::Completed))
                .unwrap()
                .is_empty()
        );
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_due_ordering_and_reindexing() {
        let (store, _temp_dir) = setup();
        let mut late = FlowEnrollment::new("flow", 1, "u1", "n", 500);
        let early = FlowEnrollment::new("flow", 1, "u2", "n", 100);
        store.upsert(&late).unwrap();
        store.upsert(&early).unwrap();

        let due: Vec<String> = store.due(1_000, 10).unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(due, vec![early.id.clone(), late.id.clone()]);
        assert_eq!(store.due(300, 10).unwrap().len(), 1);
        assert_eq!(store.due(1_000, 1).unwrap().len(), 1);

        // Moving the schedule removes the old due entry
        late.next_process_at = Some(5_000);
        store.upsert(&late).unwrap();
        assert_eq!(store.due(1_000, 10).unwrap().len(), 1);

        // Terminal records leave the due index
        late.complete(6_000);
        store.upsert(&late).unwrap();
        assert_eq!(store.due(i64::MAX, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_due_where_skips_without_consuming_limit() {
        let (store, _temp_dir) = setup();
        for user in ["u1", "u2", "u3"] {
            store
                .upsert(&FlowEnrollment::new("paused", 1, user, "n", 100))
                .unwrap();
        }
        let active = FlowEnrollment::new("running", 1, "u4", "n", 200);
        store.upsert(&active).unwrap();

        let due = store
            .due_where(1_000, 1, |e| e.flow_id == "running")
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, active.id);
    }

    #[test]
    fn test_compare_and_swap_single_winner() {
        let (store, _temp_dir) = setup();
        let enrollment = FlowEnrollment::new("flow", 1, "u1", "email", 0);
        store.upsert(&enrollment).unwrap();
        let guard = enrollment.guard();

        let mut first = enrollment.clone();
        first.move_to("delay", 10);
        let mut second = enrollment.clone();
        second.move_to("other", 10);

        let stored = store.compare_and_swap(&guard, &first).unwrap().unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.current_node_id, "delay");

        assert!(store.compare_and_swap(&guard, &second).unwrap().is_none());
        assert_eq!(store.get(&enrollment.id).unwrap().unwrap().current_node_id, "delay");
    }

    #[test]
    fn test_terminal_records_are_immutable() {
        let (store, _temp_dir) = setup();
        let mut enrollment = FlowEnrollment::new("flow", 1, "u1", "exit", 0);
        enrollment.exit("done", 5);
        store.upsert(&enrollment).unwrap();

        let mut revived = enrollment.clone();
        revived.status = EnrollmentStatus::Active;
        assert!(
            store
                .compare_and_swap(&enrollment.guard(), &revived)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_open_enrollment_blocks_entry() {
        let (store, _temp_dir) = setup();
        let first = FlowEnrollment::new("flow", 1, "u1", "start", 0);
        assert!(
            store
                .create_if_eligible(&first, policy(true, 0), 0)
                .unwrap()
                .created()
                .is_some()
        );

        let second = FlowEnrollment::new("flow", 1, "u1", "start", 10);
        assert_eq!(
            store.create_if_eligible(&second, policy(true, 0), 10).unwrap(),
            CreateOutcome::AlreadyEnrolled {
                enrollment_id: first.id.clone()
            }
        );

        // Other users and other flows are unaffected
        let other_user = FlowEnrollment::new("flow", 1, "u2", "start", 10);
        assert!(matches!(
            store.create_if_eligible(&other_user, policy(false, 0), 10).unwrap(),
            CreateOutcome::Created(_)
        ));
    }

    #[test]
    fn test_re_entry_rules() {
        let (store, _temp_dir) = setup();
        let mut done = FlowEnrollment::new("flow", 1, "u1", "start", 0);
        done.complete(1_000);
        store.upsert(&done).unwrap();

        let candidate = FlowEnrollment::new("flow", 1, "u1", "start", 2_000);
        assert_eq!(
            store.create_if_eligible(&candidate, policy(false, 0), 2_000).unwrap(),
            CreateOutcome::ReEntryDisabled
        );

        let at_30 = 1_000 + 30 * MINUTE_MS;
        assert_eq!(
            store.create_if_eligible(&candidate, policy(true, 60), at_30).unwrap(),
            CreateOutcome::CoolingDown {
                until: 1_000 + 60 * MINUTE_MS
            }
        );

        let at_61 = 1_000 + 61 * MINUTE_MS;
        assert!(matches!(
            store.create_if_eligible(&candidate, policy(true, 60), at_61).unwrap(),
            CreateOutcome::Created(_)
        ));
        assert_eq!(store.list_by_user("u1").unwrap().len(), 2);
    }

    #[test]
    fn test_errored_run_does_not_start_cooldown() {
        let (store, _temp_dir) = setup();
        let mut done = FlowEnrollment::new("flow", 1, "u1", "start", 0);
        done.complete(1_000);
        store.upsert(&done).unwrap();
        let mut failed = FlowEnrollment::new("flow", 1, "u1", "start", 2_000);
        failed.fail("loop budget exceeded", 5_000);
        store.upsert(&failed).unwrap();

        // 60 minutes after the completed run, 20 minutes after the errored one.
        let now = 1_000 + 60 * MINUTE_MS;
        assert!(now < 5_000 + 60 * MINUTE_MS);
        assert!(matches!(
            store.create_if_eligible(&FlowEnrollment::new("flow", 1, "u1", "start", now), policy(true, 60), now).unwrap(),
            CreateOutcome::Created(_)
        ));
    }

    #[test]
    fn test_same_occurrence_enrolls_once() {
        let (store, _temp_dir) = setup();
        let mut first = FlowEnrollment::new("flow", 1, "u1", "start", 0);
        first.trigger_key = Some("event:m1".to_string());
        assert!(store.create_if_eligible(&first, policy(true, 0), 0).unwrap().created().is_some());

        let mut finished = store.get(&first.id).unwrap().unwrap();
        finished.complete(10);
        store.upsert(&finished).unwrap();

        let mut replay = FlowEnrollment::new("flow", 1, "u1", "start", 20);
        replay.trigger_key = Some("event:m1".to_string());
        assert_eq!(
            store.create_if_eligible(&replay, policy(true, 0), 20).unwrap(),
            CreateOutcome::AlreadyEnrolled {
                enrollment_id: first.id.clone()
            }
        );

        let mut next = FlowEnrollment::new("flow", 1, "u1", "start", 20);
        next.trigger_key = Some("event:m2".to_string());
        assert!(store.create_if_eligible(&next, policy(true, 0), 20).unwrap().created().is_some());
    }

    #[test]
    fn test_delete_by_flow_cascades_indexes() {
        let (store, _temp_dir) = setup();
        let a = FlowEnrollment::new("flow-1", 1, "u1", "n", 0);
        let b = FlowEnrollment::new("flow-1", 1, "u2", "n", 0);
        let keep = FlowEnrollment::new("flow-2", 1, "u1", "n", 0);
        for enrollment in [&a, &b, &keep] {
            store.upsert(enrollment).unwrap();
        }

        assert_eq!(store.delete_by_flow("flow-1").unwrap(), 2);
        assert!(store.get(&a.id).unwrap().is_none());
        assert!(store.list_by_flow("flow-1", None).unwrap().is_empty());
        assert_eq!(store.list_by_user("u1").unwrap().len(), 1);
        assert_eq!(store.due(i64::MAX, 10).unwrap().len(), 1);

        assert!(store.delete(&keep.id).unwrap());
        assert!(!store.delete(&keep.id).unwrap());
        assert_eq!(store.count().unwrap(), 0);
    }
}
