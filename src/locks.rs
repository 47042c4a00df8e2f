//! Per-scan write serialisation
//!
//! Process-wide map from scan uuid to its write mutex. Everything that does
//! a load-modify-persist on a scan aggregate (artifact processor, subdomain
//! monitor, status manager) holds this lock across the triple.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

static LOCKS: OnceLock<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>> = OnceLock::new();

fn map() -> &'static Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
    LOCKS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Look up (or create) the write lock for a scan.
pub fn scan_lock(uuid: &str) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = map().lock().unwrap();
    locks.entry(uuid.to_string()).or_default().clone()
}

/// Drop a terminal scan's lock entry. Outstanding holders keep their `Arc`.
pub fn forget_scan_lock(uuid: &str) {
    map().lock().unwrap().remove(uuid);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_uuid_yields_same_lock() {
        let a = scan_lock("lock-test-1");
        let b = scan_lock("lock-test-1");
        assert!(Arc::ptr_eq(&a, &b));
        forget_scan_lock("lock-test-1");
    }

    #[test]
    fn different_uuids_are_independent() {
        let a = scan_lock("lock-test-2");
        let b = scan_lock("lock-test-3");
        assert!(!Arc::ptr_eq(&a, &b));
        forget_scan_lock("lock-test-2");
        forget_scan_lock("lock-test-3");
    }

    #[tokio::test]
    async fn serialises_critical_sections() {
        let lock = scan_lock("lock-test-4");
        let guard = lock.lock().await;
        let second = scan_lock("lock-test-4");
        assert!(second.try_lock().is_err());
        drop(guard);
        assert!(second.try_lock().is_ok());
        forget_scan_lock("lock-test-4");
    }
}
