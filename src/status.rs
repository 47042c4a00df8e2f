//! Scan status transitions
//!
//! Thin helpers over the DAO. Every transition takes the per-scan write lock
//! so it never interleaves with a monitor update.

use crate::db::{Database, DbResult, FailedTool, ScanStatus};
use crate::locks::scan_lock;

#[derive(Clone)]
pub struct StatusManager {
    db: Database,
}

impl StatusManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn update_status(&self, uuid: &str, status: ScanStatus) -> DbResult<()> {
        let lock = scan_lock(uuid);
        let _guard = lock.lock().await;

        let mut scan = self.db.get_by_uuid(uuid)?;
        if scan.status.is_terminal() {
            tracing::warn!(scan = uuid, current = %scan.status, requested = %status, "Ignoring transition on terminal scan");
            return Ok(());
        }
        tracing::info!(scan = uuid, from = %scan.status, to = %status, "Scan status transition");
        scan.status = status;
        self.db.update(&scan)
    }

    pub async fn mark_running(&self, uuid: &str) -> DbResult<()> {
        self.update_status(uuid, ScanStatus::Running).await
    }

    pub async fn mark_completed(&self, uuid: &str) -> DbResult<()> {
        self.update_status(uuid, ScanStatus::Completed).await
    }

    pub async fn mark_completed_with_warnings(
        &self,
        uuid: &str,
        failed_tools: Vec<FailedTool>,
    ) -> DbResult<()> {
        let lock = scan_lock(uuid);
        let _guard = lock.lock().await;

        let mut scan = self.db.get_by_uuid(uuid)?;
        if scan.status.is_terminal() {
            tracing::warn!(scan = uuid, current = %scan.status, "Ignoring transition on terminal scan");
            return Ok(());
        }
        tracing::info!(
            scan = uuid,
            failed = failed_tools.len(),
            "Scan completed with warnings"
        );
        scan.status = ScanStatus::CompletedWithWarnings;
        scan.failed_tools = failed_tools;
        self.db.update(&scan)
    }

    pub async fn mark_failed(&self, uuid: &str, reason: &str) -> DbResult<()> {
        let lock = scan_lock(uuid);
        let _guard = lock.lock().await;

        let mut scan = self.db.get_by_uuid(uuid)?;
        if scan.status.is_terminal() {
            tracing::warn!(scan = uuid, current = %scan.status, "Ignoring transition on terminal scan");
            return Ok(());
        }
        tracing::error!(scan = uuid, reason, "Scan failed");
        scan.status = ScanStatus::Failed;
        scan.error_message = Some(reason.to_string());
        self.db.update(&scan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Scan;

    #[tokio::test]
    async fn transitions_and_failure_details() {
        let db = Database::open_in_memory().unwrap();
        db.save(&Scan::new("s1", "full", "example.com")).unwrap();
        let manager = StatusManager::new(db.clone());

        manager.mark_running("s1").await.unwrap();
        assert_eq!(db.get_by_uuid("s1").unwrap().status, ScanStatus::Running);

        manager
            .mark_completed_with_warnings(
                "s1",
                vec![FailedTool {
                    tool_name: "nmap".into(),
                    error: "exit code 1".into(),
                }],
            )
            .await
            .unwrap();
        let scan = db.get_by_uuid("s1").unwrap();
        assert_eq!(scan.status, ScanStatus::CompletedWithWarnings);
        assert_eq!(scan.failed_tools.len(), 1);
    }

    #[tokio::test]
    async fn failure_records_the_reason() {
        let db = Database::open_in_memory().unwrap();
        db.save(&Scan::new("s2", "full", "example.com")).unwrap();
        let manager = StatusManager::new(db.clone());

        manager.mark_failed("s2", "cancelled").await.unwrap();
        let scan = db.get_by_uuid("s2").unwrap();
        assert_eq!(scan.status, ScanStatus::Failed);
        assert_eq!(scan.error_message.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn terminal_scans_are_immutable() {
        let db = Database::open_in_memory().unwrap();
        db.save(&Scan::new("s3", "full", "example.com")).unwrap();
        let manager = StatusManager::new(db.clone());

        manager.mark_completed("s3").await.unwrap();
        manager.mark_failed("s3", "too late").await.unwrap();

        let scan = db.get_by_uuid("s3").unwrap();
        assert_eq!(scan.status, ScanStatus::Completed);
        assert!(scan.error_message.is_none());
    }

    #[tokio::test]
    async fn unknown_scan_errors() {
        let db = Database::open_in_memory().unwrap();
        let manager = StatusManager::new(db);
        assert!(manager.mark_running("ghost").await.is_err());
    }
}
