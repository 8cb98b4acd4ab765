//! Cache types

use serde::{Deserialize, Serialize};

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub max_size: u64,
    pub hits: u64,
    pub misses: u64,
    pub evicted: u64,
}

/// Outcome of one eviction pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionReport {
    /// Bytes on disk when the pass started
    pub size_before: u64,
    /// Bytes on disk by the pass's own accounting when it finished
    pub size_after: u64,
    /// Size the pass evicts down to once `max_size` is exceeded
    pub target_size: u64,
    pub removed_files: usize,
    pub freed_bytes: u64,
}

impl EvictionReport {
    /// True if the pass had to delete anything
    pub fn evicted(&self) -> bool {
        self.removed_files > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.evicted, 0);
    }

    #[test]
    fn test_cache_stats_serialization() {
        let stats = CacheStats {
            entries: 3,
            total_size: 1200,
            max_size: 1000,
            hits: 7,
            misses: 2,
            evicted: 1,
        };

        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"total_size\":1200"));

        let restored: CacheStats = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.evicted, 1);
    }

    #[test]
    fn test_noop_report_did_not_evict() {
        assert!(!EvictionReport::default().evicted());
    }
}
