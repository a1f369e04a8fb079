//! ErrorLog / Telemetry append-only diagnostic streams.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Row};
use serde_json::Value;
use uuid::Uuid;

use super::{connect, parse_datetime, ErrorLogEntry, Result, Severity, TelemetryEvent};

pub struct TelemetryRepository {
    db_path: PathBuf,
}

impl TelemetryRepository {
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    pub fn log_error(
        &self,
        worker: &str,
        operation: &str,
        severity: Severity,
        context: Value,
    ) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute(
            "INSERT INTO error_logs (id, worker, operation, severity, context, resolved, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                format!("err-{}", Uuid::new_v4()),
                worker,
                operation,
                severity.as_str(),
                serde_json::to_string(&context)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Indexed via the partial index on `error_logs(created_at) WHERE
    /// resolved = 0` ("partial index on unresolved error logs").
    pub fn unresolved(&self, limit: i64) -> Result<Vec<ErrorLogEntry>> {
        let conn = connect(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT id, worker, operation, severity, context, resolved, created_at
             FROM error_logs WHERE resolved = 0
             ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], row_to_error_log)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn record_step(&self, step: &str, status: &str, context: Value) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute(
            "INSERT INTO telemetry_events (id, step, status, context, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                format!("tel-{}", Uuid::new_v4()),
                step,
                status,
                serde_json::to_string(&context)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn recent_events(&self, step: &str, limit: i64) -> Result<Vec<TelemetryEvent>> {
        let conn = connect(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT id, step, status, context, created_at
             FROM telemetry_events WHERE step = ?1
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![step, limit], row_to_telemetry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn row_to_error_log(row: &Row) -> rusqlite::Result<ErrorLogEntry> {
    let severity_str: String = row.get(3)?;
    let context: String = row.get(4)?;
    Ok(ErrorLogEntry {
        id: row.get(0)?,
        worker: row.get(1)?,
        operation: row.get(2)?,
        severity: Severity::from_str(&severity_str).unwrap_or(Severity::Error),
        context: serde_json::from_str(&context).unwrap_or(Value::Null),
        resolved: row.get::<_, i64>(5)? != 0,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn row_to_telemetry(row: &Row) -> rusqlite::Result<TelemetryEvent> {
    let context: String = row.get(3)?;
    Ok(TelemetryEvent {
        id: row.get(0)?,
        step: row.get(1)?,
        status: row.get(2)?,
        context: serde_json::from_str(&context).unwrap_or(Value::Null),
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}
