// Persistent instance records, activity history and raised events

use rusqlite::{params, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use super::{OrchestrationError, RuntimeStatus};
use crate::storage::{now_timestamp, SharedConnection};

type StoreResult<T> = Result<T, OrchestrationError>;

/// One orchestration instance as persisted
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    pub id: String,
    pub name: String,
    pub input: Value,
    pub status: RuntimeStatus,
    pub output: Option<Value>,
    pub custom_status: Option<Value>,
    pub created_at: String,
    pub updated_at: String,
}

/// An external event raised against an instance
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceEvent {
    pub name: String,
    pub data: Value,
    pub received_at: String,
}

#[derive(Clone)]
pub struct InstanceStore {
    db: SharedConnection,
}

fn parse_json(text: Option<String>) -> StoreResult<Option<Value>> {
    match text {
        Some(t) => Ok(Some(serde_json::from_str(&t)?)),
        None => Ok(None),
    }
}

struct RawRecord {
    id: String,
    name: String,
    input: String,
    status: String,
    output: Option<String>,
    custom_status: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            input: row.get(2)?,
            status: row.get(3)?,
            output: row.get(4)?,
            custom_status: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_record(self) -> StoreResult<InstanceRecord> {
        // Unknown status strings only appear if the file was edited by hand
        let status = RuntimeStatus::parse(&self.status).unwrap_or(RuntimeStatus::Failed);
        Ok(InstanceRecord {
            input: serde_json::from_str(&self.input)?,
            output: parse_json(self.output)?,
            custom_status: parse_json(self.custom_status)?,
            id: self.id,
            name: self.name,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const INSTANCE_COLUMNS: &str =
    "id, name, input, status, output, custom_status, created_at, updated_at";

impl InstanceStore {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }

    /// Insert a fresh Pending instance
    pub async fn create(&self, id: &str, name: &str, input: &Value) -> StoreResult<InstanceRecord> {
        let now = now_timestamp();
        let input_json = serde_json::to_string(input)?;

        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO orchestration_instances (id, name, input, status, output, custom_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, NULL, NULL, ?5, ?5)",
            params![id, name, input_json, RuntimeStatus::Pending.as_str(), now],
        )
        .map_err(|e| match e.sqlite_error_code() {
            // Lost a race with another start for the same id
            Some(ErrorCode::ConstraintViolation) => OrchestrationError::AlreadyExists(id.to_string()),
            _ => OrchestrationError::Storage(e),
        })?;

        Ok(InstanceRecord {
            id: id.to_string(),
            name: name.to_string(),
            input: input.clone(),
            status: RuntimeStatus::Pending,
            output: None,
            custom_status: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<InstanceRecord>> {
        let raw = {
            let conn = self.db.lock().await;
            conn.query_row(
                &format!("SELECT {} FROM orchestration_instances WHERE id = ?1", INSTANCE_COLUMNS),
                params![id],
                RawRecord::from_row,
            )
            .optional()?
        };
        raw.map(RawRecord::into_record).transpose()
    }

    /// Pending or Running instances, oldest first
    pub async fn list_incomplete(&self) -> StoreResult<Vec<InstanceRecord>> {
        let raws = {
            let conn = self.db.lock().await;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM orchestration_instances
                 WHERE status IN ('Pending', 'Running')
                 ORDER BY created_at ASC",
                INSTANCE_COLUMNS
            ))?;
            let raws = stmt
                .query_map([], RawRecord::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            raws
        };
        raws.into_iter().map(RawRecord::into_record).collect()
    }

    /// Move a non-terminal instance to Running
    pub async fn mark_running(&self, id: &str) -> StoreResult<bool> {
        let conn = self.db.lock().await;
        let changed = conn.execute(
            "UPDATE orchestration_instances SET status = 'Running', updated_at = ?2
             WHERE id = ?1 AND status IN ('Pending', 'Running')",
            params![id, now_timestamp()],
        )?;
        Ok(changed > 0)
    }

    /// Record a terminal status. Returns false if the instance already finished,
    /// so the first terminal write wins.
    pub async fn finish(
        &self,
        id: &str,
        status: RuntimeStatus,
        output: &Value,
    ) -> StoreResult<bool> {
        let output_json = serde_json::to_string(output)?;
        let conn = self.db.lock().await;
        let changed = conn.execute(
            "UPDATE orchestration_instances SET status = ?2, output = ?3, updated_at = ?4
             WHERE id = ?1 AND status IN ('Pending', 'Running')",
            params![id, status.as_str(), output_json, now_timestamp()],
        )?;
        Ok(changed > 0)
    }

    pub async fn set_custom_status(&self, id: &str, value: &Value) -> StoreResult<()> {
        let json = serde_json::to_string(value)?;
        let conn = self.db.lock().await;
        conn.execute(
            "UPDATE orchestration_instances SET custom_status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, json, now_timestamp()],
        )?;
        Ok(())
    }

    /// Recorded activity outputs keyed by sequence number
    pub async fn load_history(&self, id: &str) -> StoreResult<HashMap<u64, (String, Value)>> {
        let rows = {
            let conn = self.db.lock().await;
            let mut stmt = conn.prepare(
                "SELECT seq, activity, output FROM orchestration_history WHERE instance_id = ?1",
            )?;
            let rows = stmt
                .query_map(params![id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut history = HashMap::with_capacity(rows.len());
        for (seq, activity, output) in rows {
            history.insert(seq as u64, (activity, serde_json::from_str(&output)?));
        }
        Ok(history)
    }

    pub async fn append_history(
        &self,
        id: &str,
        seq: u64,
        activity: &str,
        output: &Value,
    ) -> StoreResult<()> {
        let json = serde_json::to_string(output)?;
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO orchestration_history (instance_id, seq, activity, output, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, seq as i64, activity, json, now_timestamp()],
        )?;
        Ok(())
    }

    pub async fn add_event(&self, id: &str, name: &str, data: &Value) -> StoreResult<()> {
        let json = serde_json::to_string(data)?;
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO orchestration_events (instance_id, name, data, received_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, name, json, now_timestamp()],
        )?;
        Ok(())
    }

    pub async fn events(&self, id: &str) -> StoreResult<Vec<InstanceEvent>> {
        let rows = {
            let conn = self.db.lock().await;
            let mut stmt = conn.prepare(
                "SELECT name, data, received_at FROM orchestration_events
                 WHERE instance_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter()
            .map(|(name, data, received_at)| {
                Ok(InstanceEvent {
                    name,
                    data: serde_json::from_str(&data)?,
                    received_at,
                })
            })
            .collect()
    }

    /// Delete an instance with its history and events
    pub async fn purge(&self, id: &str) -> StoreResult<bool> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM orchestration_history WHERE instance_id = ?1", params![id])?;
        tx.execute("DELETE FROM orchestration_events WHERE instance_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM orchestration_instances WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }
}
