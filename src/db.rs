//! Scan persistence
//!
//! Narrow DAO over sqlite. The engine and monitor only ever touch scans
//! through this handle; collection fields are stored as JSON text columns.

mod schema;

pub use schema::*;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Scan not found: {0}")]
    ScanNotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

const SCAN_COLUMNS: &str = "uuid, scan_type, domain, status, number_of_domains, subdomains, \
     screenshots_path, sensitive_patterns, error_message, failed_tools, created_at, updated_at";

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Insert a new scan aggregate.
    pub fn save(&self, scan: &Scan) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO scans (uuid, scan_type, domain, status, number_of_domains, subdomains,
                                screenshots_path, sensitive_patterns, error_message, failed_tools,
                                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                scan.uuid,
                scan.scan_type,
                scan.domain,
                scan.status.to_string(),
                scan.number_of_domains as i64,
                encode_json(&scan.subdomains),
                scan.screenshots_path,
                scan.sensitive_patterns,
                scan.error_message,
                encode_json(&scan.failed_tools),
                scan.created_at.to_rfc3339(),
                scan.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Persist the current state of a scan aggregate.
    pub fn update(&self, scan: &Scan) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let updated = conn.execute(
            "UPDATE scans SET scan_type = ?1, domain = ?2, status = ?3, number_of_domains = ?4,
                              subdomains = ?5, screenshots_path = ?6, sensitive_patterns = ?7,
                              error_message = ?8, failed_tools = ?9, updated_at = ?10
             WHERE uuid = ?11",
            params![
                scan.scan_type,
                scan.domain,
                scan.status.to_string(),
                scan.number_of_domains as i64,
                encode_json(&scan.subdomains),
                scan.screenshots_path,
                scan.sensitive_patterns,
                scan.error_message,
                encode_json(&scan.failed_tools),
                now.to_rfc3339(),
                scan.uuid,
            ],
        )?;

        if updated == 0 {
            return Err(DbError::ScanNotFound(scan.uuid.clone()));
        }
        Ok(())
    }

    /// Get a scan by its uuid.
    pub fn get_by_uuid(&self, uuid: &str) -> DbResult<Scan> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("SELECT {SCAN_COLUMNS} FROM scans WHERE uuid = ?1"))?;

        stmt.query_row(params![uuid], scan_from_row).map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::ScanNotFound(uuid.to_string()),
            other => DbError::Sqlite(other),
        })
    }

    /// List all scans, newest first.
    pub fn list(&self) -> DbResult<Vec<Scan>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCAN_COLUMNS} FROM scans ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map([], scan_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// List one page of scans, newest first. Pages are 1-based.
    pub fn list_paginated(&self, page: usize, limit: usize) -> DbResult<Vec<Scan>> {
        let page = page.max(1);
        let offset = (page - 1) * limit;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCAN_COLUMNS} FROM scans ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], scan_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Delete a scan.
    pub fn delete(&self, uuid: &str) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM scans WHERE uuid = ?1", params![uuid])?;
        if deleted == 0 {
            return Err(DbError::ScanNotFound(uuid.to_string()));
        }
        Ok(())
    }
}

fn scan_from_row(row: &Row<'_>) -> rusqlite::Result<Scan> {
    Ok(Scan {
        uuid: row.get(0)?,
        scan_type: row.get(1)?,
        domain: row.get(2)?,
        status: parse_status(&row.get::<_, String>(3)?),
        number_of_domains: row.get::<_, i64>(4)? as usize,
        subdomains: decode_json(&row.get::<_, String>(5)?),
        screenshots_path: row.get(6)?,
        sensitive_patterns: row.get(7)?,
        error_message: row.get(8)?,
        failed_tools: decode_json(&row.get::<_, String>(9)?),
        created_at: parse_datetime(&row.get::<_, String>(10)?),
        updated_at: parse_datetime(&row.get::<_, String>(11)?),
    })
}

fn encode_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

fn decode_json<T: serde::de::DeserializeOwned + Default>(raw: &str) -> T {
    serde_json::from_str(raw).unwrap_or_default()
}

fn parse_status(s: &str) -> ScanStatus {
    match s {
        "queued" => ScanStatus::Queued,
        "running" => ScanStatus::Running,
        "completed" => ScanStatus::Completed,
        "completed_with_warnings" => ScanStatus::CompletedWithWarnings,
        "failed" => ScanStatus::Failed,
        _ => ScanStatus::Queued,
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_get_scan() {
        let db = Database::open_in_memory().unwrap();

        let scan = Scan::new("scan-1", "full", "example.com");
        db.save(&scan).unwrap();

        let fetched = db.get_by_uuid("scan-1").unwrap();
        assert_eq!(fetched.uuid, "scan-1");
        assert_eq!(fetched.scan_type, "full");
        assert_eq!(fetched.domain, "example.com");
        assert_eq!(fetched.status, ScanStatus::Queued);
        assert!(fetched.subdomains.is_empty());
    }

    #[test]
    fn test_update_roundtrips_collections() {
        let db = Database::open_in_memory().unwrap();

        let mut scan = Scan::new("scan-2", "full", "example.com");
        db.save(&scan).unwrap();

        scan.status = ScanStatus::CompletedWithWarnings;
        scan.subdomains = vec![
            Subdomain::discovered("https://a.example.com"),
            Subdomain::discovered("https://b.example.com"),
        ];
        scan.number_of_domains = 2;
        scan.failed_tools = vec![FailedTool {
            tool_name: "nuclei".into(),
            error: "exit code 1".into(),
        }];
        db.update(&scan).unwrap();

        let fetched = db.get_by_uuid("scan-2").unwrap();
        assert_eq!(fetched.status, ScanStatus::CompletedWithWarnings);
        assert_eq!(fetched.number_of_domains, 2);
        assert_eq!(fetched.subdomains.len(), 2);
        assert_eq!(fetched.subdomains[0].domain, "https://a.example.com");
        assert_eq!(fetched.subdomains[0].status, SubdomainStatus::Discovered);
        assert_eq!(fetched.failed_tools.len(), 1);
        assert_eq!(fetched.failed_tools[0].tool_name, "nuclei");
    }

    #[test]
    fn test_missing_scan_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_by_uuid("nope"),
            Err(DbError::ScanNotFound(_))
        ));
        assert!(matches!(db.delete("nope"), Err(DbError::ScanNotFound(_))));
    }

    #[test]
    fn test_list_paginated() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..5 {
            let mut scan = Scan::new(format!("scan-{i}"), "full", "example.com");
            // Stagger creation times so ordering is deterministic.
            scan.created_at = Utc::now() + chrono::Duration::seconds(i);
            db.save(&scan).unwrap();
        }

        let all = db.list().unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].uuid, "scan-4");

        let page2 = db.list_paginated(2, 2).unwrap();
        assert_eq!(page2.len(), 2);
        assert_eq!(page2[0].uuid, "scan-2");
        assert_eq!(page2[1].uuid, "scan-1");
    }
}
