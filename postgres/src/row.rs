//! Row <-> domain-type conversions. Kept in one place so the query
//! modules only deal with SQL and domain types, never raw [`PgRow`]
//! column names.

use clawderpunk_core::envelope::{Envelope, EventType, Severity};
use clawderpunk_core::event_log::EventLogError;
use clawderpunk_core::memory::{Bucket, EntryStatus, MemoryEntry};
use clawderpunk_core::memory_store::MemoryStoreError;
use serde_json::Value;
use sqlx::Row;
use sqlx::postgres::PgRow;

pub fn envelope_from_row(row: &PgRow) -> Result<Envelope, EventLogError> {
    let event_type_str: String = row.try_get("event_type").map_err(db_err)?;
    let severity_str: String = row.try_get("severity").map_err(db_err)?;
    let payload: Value = row.try_get("payload").map_err(db_err)?;
    let payload_map = match payload {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };

    Envelope::try_new(
        row.try_get("event_id").map_err(db_err)?,
        row.try_get("ts").map_err(db_err)?,
        row.try_get("workspace_id").map_err(db_err)?,
        row.try_get("satellite_id").map_err(db_err)?,
        row.try_get("trace_id").map_err(db_err)?,
        EventType::parse(&event_type_str).map_err(|e| EventLogError::Storage(e.to_string()))?,
        Severity::parse(&severity_str).map_err(|e| EventLogError::Storage(e.to_string()))?,
        row.try_get("confidence").map_err(db_err)?,
        payload_map,
    )
    .map_err(|e| EventLogError::Storage(format!("stored envelope failed validation: {e}")))
}

pub fn memory_entry_from_row(row: &PgRow) -> Result<MemoryEntry, MemoryStoreError> {
    let bucket_str: String = row.try_get("bucket").map_err(store_err)?;
    let status_str: String = row.try_get("status").map_err(store_err)?;
    let value: Value = row.try_get("value").map_err(store_err)?;
    let value_map = match value {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };

    let status = match status_str.as_str() {
        "candidate" => EntryStatus::Candidate,
        "promoted" => EntryStatus::Promoted {
            promoted_at: row.try_get("promoted_at").map_err(store_err)?,
        },
        "retracted" => EntryStatus::Retracted {
            retracted_at: row.try_get("retracted_at").map_err(store_err)?,
        },
        other => {
            return Err(MemoryStoreError::Storage(format!(
                "unknown stored status: {other}"
            )));
        }
    };

    Ok(MemoryEntry {
        entry_id: row.try_get("entry_id").map_err(store_err)?,
        workspace_id: row.try_get("workspace_id").map_err(store_err)?,
        bucket: Bucket::parse(&bucket_str).map_err(|e| MemoryStoreError::Storage(e.to_string()))?,
        key: row.try_get("key").map_err(store_err)?,
        value: value_map,
        status,
        confidence: row.try_get("confidence").map_err(store_err)?,
        source_event_id: row.try_get("source_event_id").map_err(store_err)?,
        expires_at: row.try_get("expires_at").map_err(store_err)?,
        created_at: row.try_get("created_at").map_err(store_err)?,
        updated_at: row.try_get("updated_at").map_err(store_err)?,
    })
}

fn db_err(e: sqlx::Error) -> EventLogError {
    EventLogError::Storage(e.to_string())
}

fn store_err(e: sqlx::Error) -> MemoryStoreError {
    MemoryStoreError::Storage(e.to_string())
}
