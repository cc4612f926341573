//! Admission and eviction policy for the cached table

use std::hash::Hash;

use crate::config::CacheConfig;
use crate::tables::{CachedEntry, Tables};

/// Outcome of offering a completed load to the cached table
pub(crate) enum Admission<K> {
    /// Committed; `evicted` lists the keys pushed out to restore the budgets
    Committed { evicted: Vec<K> },
    /// Does not fit the byte budget (or retention is disabled)
    Rejected,
}

/// Whether an entry of `size_bytes` may enter the cached table
pub(crate) fn admits(config: &CacheConfig, size_bytes: usize) -> bool {
    config.retains() && size_bytes <= config.maximum_size_bytes
}

/// Insert `entry` as most recently used, then evict back within budget
pub(crate) fn touch<K>(tables: &mut Tables<K>, key: K, entry: CachedEntry) -> Admission<K>
where
    K: Hash + Eq + Clone,
{
    if !admits(&tables.config, entry.size_bytes) {
        return Admission::Rejected;
    }

    tables.current_size_bytes += entry.size_bytes;
    if let Some(replaced) = tables.cached.insert(key, entry) {
        tables.current_size_bytes -= replaced.size_bytes;
    }

    Admission::Committed {
        evicted: enforce_budgets(tables),
    }
}

/// Evict least recently used entries until both budgets hold
///
/// Terminates with the budgets satisfied or the cached table empty.
pub(crate) fn enforce_budgets<K>(tables: &mut Tables<K>) -> Vec<K>
where
    K: Hash + Eq + Clone,
{
    let mut evicted = Vec::new();
    while tables.current_size_bytes > tables.config.maximum_size_bytes
        || tables.cached.len() > tables.config.maximum_size
    {
        let Some((key, entry)) = tables.cached.pop_lru() else {
            break;
        };
        tables.current_size_bytes -= entry.size_bytes;
        evicted.push(key);
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use imagestream::ImageStreamCompleter;

    fn entry(size_bytes: usize) -> CachedEntry {
        CachedEntry {
            completer: ImageStreamCompleter::new(),
            size_bytes,
        }
    }

    fn tables(maximum_size: usize, maximum_size_bytes: usize) -> Tables<u32> {
        Tables::new(CacheConfig {
            maximum_size,
            maximum_size_bytes,
        })
    }

    fn evicted(admission: Admission<u32>) -> Vec<u32> {
        match admission {
            Admission::Committed { evicted } => evicted,
            Admission::Rejected => panic!("entry was rejected"),
        }
    }

    #[test]
    fn test_count_budget_evicts_lru() {
        let mut tables = tables(2, 1000);

        assert!(evicted(touch(&mut tables, 1, entry(400))).is_empty());
        assert!(evicted(touch(&mut tables, 2, entry(400))).is_empty());
        assert_eq!(evicted(touch(&mut tables, 3, entry(100))), vec![1]);

        assert_eq!(tables.cached.len(), 2);
        assert_eq!(tables.current_size_bytes, 500);
        tables.debug_check();
    }

    #[test]
    fn test_byte_budget_evicts_until_fit() {
        let mut tables = tables(10, 1000);

        touch(&mut tables, 1, entry(300));
        touch(&mut tables, 2, entry(300));
        touch(&mut tables, 3, entry(300));
        assert_eq!(evicted(touch(&mut tables, 4, entry(800))), vec![1, 2, 3]);

        assert_eq!(tables.current_size_bytes, 800);
        tables.debug_check();
    }

    #[test]
    fn test_promoted_entry_survives() {
        let mut tables = tables(2, 1000);

        touch(&mut tables, 1, entry(10));
        touch(&mut tables, 2, entry(10));
        tables.cached.promote(&1);

        assert_eq!(evicted(touch(&mut tables, 3, entry(10))), vec![2]);
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let mut tables = tables(10, 1000);

        assert!(matches!(
            touch(&mut tables, 1, entry(1001)),
            Admission::Rejected
        ));
        assert!(tables.cached.is_empty());
        assert_eq!(tables.current_size_bytes, 0);
    }

    #[test]
    fn test_exact_fit_admitted() {
        let mut tables = tables(10, 1000);
        assert!(evicted(touch(&mut tables, 1, entry(1000))).is_empty());
        assert_eq!(tables.current_size_bytes, 1000);
    }

    #[test]
    fn test_retouch_replaces_size() {
        let mut tables = tables(10, 1000);

        touch(&mut tables, 1, entry(100));
        touch(&mut tables, 1, entry(250));

        assert_eq!(tables.cached.len(), 1);
        assert_eq!(tables.current_size_bytes, 250);
        tables.debug_check();
    }

    #[test]
    fn test_disabled_retention_rejects() {
        let mut tables = tables(0, 1000);
        assert!(!admits(&tables.config, 1));
        assert!(matches!(touch(&mut tables, 1, entry(1)), Admission::Rejected));
    }

    #[test]
    fn test_shrinking_budget() {
        let mut tables = tables(10, 1000);
        for key in 0..5 {
            touch(&mut tables, key, entry(100));
        }

        tables.config.maximum_size_bytes = 250;
        assert_eq!(enforce_budgets(&mut tables), vec![0, 1, 2]);
        assert_eq!(tables.current_size_bytes, 200);

        tables.config.maximum_size = 1;
        assert_eq!(enforce_budgets(&mut tables), vec![3]);
        tables.debug_check();
    }
}
