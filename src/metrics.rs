//! Process-wide counters for world graph and ledger activity.
//! Cheap enough to bump on every mutation; read via [`snapshot`].
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

static EXITS_CREATED: AtomicU64 = AtomicU64::new(0);
static EXITS_REMOVED: AtomicU64 = AtomicU64::new(0);
static REVERSE_FAILURES: AtomicU64 = AtomicU64::new(0);
static ITEMS_CREATED: AtomicU64 = AtomicU64::new(0);
static ITEMS_REMOVED: AtomicU64 = AtomicU64::new(0);
static PLACEMENTS: AtomicU64 = AtomicU64::new(0);
static CYCLES_REJECTED: AtomicU64 = AtomicU64::new(0);
static CONSISTENCY_FAILURES: AtomicU64 = AtomicU64::new(0);

static REJECTIONS: OnceLock<Mutex<HashMap<String, u64>>> = OnceLock::new();

pub fn inc_exits_created() {
    EXITS_CREATED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_exits_removed() {
    EXITS_REMOVED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_reverse_failures() {
    REVERSE_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_items_created() {
    ITEMS_CREATED.fetch_add(1, Ordering::Relaxed);
}

pub fn add_items_removed(count: u64) {
    ITEMS_REMOVED.fetch_add(count, Ordering::Relaxed);
}

pub fn inc_placements() {
    PLACEMENTS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_cycles_rejected() {
    CYCLES_REJECTED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_consistency_failures() {
    CONSISTENCY_FAILURES.fetch_add(1, Ordering::Relaxed);
}

fn rejection_lock() -> &'static Mutex<HashMap<String, u64>> {
    REJECTIONS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Count a rejected operation under a short error kind (e.g. "duplicate_direction").
pub fn record_rejection(kind: &str) -> u64 {
    let Ok(mut guard) = rejection_lock().lock() else {
        return 0;
    };
    let counter = guard.entry(kind.to_string()).or_default();
    *counter = counter.saturating_add(1);
    *counter
}

pub fn rejections_snapshot() -> HashMap<String, u64> {
    rejection_lock()
        .lock()
        .map(|guard| guard.clone())
        .unwrap_or_default()
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub exits_created: u64,
    pub exits_removed: u64,
    pub reverse_failures: u64,
    pub items_created: u64,
    pub items_removed: u64,
    pub placements: u64,
    pub cycles_rejected: u64,
    pub consistency_failures: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        exits_created: EXITS_CREATED.load(Ordering::Relaxed),
        exits_removed: EXITS_REMOVED.load(Ordering::Relaxed),
        reverse_failures: REVERSE_FAILURES.load(Ordering::Relaxed),
        items_created: ITEMS_CREATED.load(Ordering::Relaxed),
        items_removed: ITEMS_REMOVED.load(Ordering::Relaxed),
        placements: PLACEMENTS.load(Ordering::Relaxed),
        cycles_rejected: CYCLES_REJECTED.load(Ordering::Relaxed),
        consistency_failures: CONSISTENCY_FAILURES.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Counters are global and other tests bump them concurrently, so only
    // lower bounds are asserted.
    #[test]
    fn counters_only_grow() {
        let before = snapshot();
        inc_exits_created();
        inc_reverse_failures();
        add_items_removed(3);
        let after = snapshot();
        assert!(after.exits_created >= before.exits_created + 1);
        assert!(after.reverse_failures >= before.reverse_failures + 1);
        assert!(after.items_removed >= before.items_removed + 3);
    }

    #[test]
    fn rejections_are_keyed_by_kind() {
        let first = record_rejection("metrics_test_kind");
        let second = record_rejection("metrics_test_kind");
        assert_eq!(second, first + 1);
        assert!(rejections_snapshot()["metrics_test_kind"] >= 2);
    }
}
