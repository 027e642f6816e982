//! Prepared statement management and caching.
//!
//! Each connection keeps an LRU cache of server-side prepared statements
//! keyed by query text, so hot queries skip the Parse round trip.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::row::RowDescription;
use crate::types::Oid;

/// A prepared statement that has been parsed by the server.
///
/// Created via Parse and executed any number of times with Bind + Execute.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Server-side name for this statement (e.g. "__pgkit_1")
    pub name: String,
    /// The SQL query text
    pub query: String,
    /// Parameter type OIDs (from ParameterDescription)
    pub param_types: Vec<Oid>,
    /// Result column descriptions (from RowDescription), shared with every
    /// result produced by this statement
    pub columns: Arc<RowDescription>,
}

impl PreparedStatement {
    pub fn new(name: String, query: String) -> Self {
        Self {
            name,
            query,
            param_types: Vec::new(),
            columns: RowDescription::empty(),
        }
    }

    pub fn set_param_types(&mut self, types: Vec<Oid>) {
        self.param_types = types;
    }

    pub fn set_columns(&mut self, columns: Arc<RowDescription>) {
        self.columns = columns;
    }

    /// Check if this statement returns rows.
    pub fn returns_rows(&self) -> bool {
        !self.columns.is_empty()
    }
}

/// O(1) LRU cache for prepared statements, one per connection.
///
/// Statements are stored as `Arc<PreparedStatement>` so a cache hit is a
/// reference count increment rather than a full clone.
pub struct StatementCache {
    cache: LruCache<String, Arc<PreparedStatement>>,
    next_id: u32,
}

impl StatementCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to at least 1");
        Self {
            cache: LruCache::new(cap),
            next_id: 0,
        }
    }

    /// Get a cached prepared statement by query text without touching the
    /// LRU order.
    pub fn get(&self, query: &str) -> Option<Arc<PreparedStatement>> {
        self.cache.peek(query).map(Arc::clone)
    }

    /// Get and mark as recently used.
    pub fn get_and_touch(&mut self, query: &str) -> Option<Arc<PreparedStatement>> {
        self.cache.get(query).map(Arc::clone)
    }

    #[inline]
    pub fn contains(&self, query: &str) -> bool {
        self.cache.contains(query)
    }

    /// Insert a statement; returns the name of the statement evicted to
    /// make room, if any, so the caller can Close it on the server.
    pub fn insert(
        &mut self,
        query: String,
        statement: Arc<PreparedStatement>,
    ) -> Option<String> {
        let will_evict = self.cache.len() >= self.cache.cap().get() && !self.cache.contains(&query);
        let evicted = if will_evict {
            self.cache.peek_lru().map(|(_, stmt)| stmt.name.clone())
        } else {
            None
        };
        self.cache.put(query, statement);
        evicted
    }

    pub fn remove(&mut self, query: &str) -> Option<Arc<PreparedStatement>> {
        self.cache.pop(query)
    }

    /// Generate a unique statement name for this connection.
    pub fn next_statement_name(&mut self) -> String {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        format!("__pgkit_{}", id)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(name: &str, query: &str) -> Arc<PreparedStatement> {
        Arc::new(PreparedStatement::new(name.to_string(), query.to_string()))
    }

    #[test]
    fn insert_and_get() {
        let mut cache = StatementCache::new(10);
        assert!(cache.is_empty());

        cache.insert("SELECT 1".to_string(), stmt("s1", "SELECT 1"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("SELECT 1").unwrap().name, "s1");
        assert!(cache.get("SELECT 2").is_none());
    }

    #[test]
    fn lru_eviction_reports_evicted_name() {
        let mut cache = StatementCache::new(2);
        cache.insert("q1".to_string(), stmt("s1", "q1"));
        cache.insert("q2".to_string(), stmt("s2", "q2"));

        // Touch q1 so q2 becomes the eviction candidate
        cache.get_and_touch("q1");

        let evicted = cache.insert("q3".to_string(), stmt("s3", "q3"));
        assert_eq!(evicted, Some("s2".to_string()));
        assert!(cache.get("q1").is_some());
        assert!(cache.get("q2").is_none());
        assert!(cache.get("q3").is_some());
    }

    #[test]
    fn unique_statement_names() {
        let mut cache = StatementCache::new(10);
        let names: Vec<String> = (0..10).map(|_| cache.next_statement_name()).collect();
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), 10);
        for name in &names {
            assert!(name.starts_with("__pgkit_"));
        }
    }

    #[test]
    fn statement_row_metadata() {
        let mut statement = PreparedStatement::new("s1".to_string(), "SELECT 1".to_string());
        assert!(!statement.returns_rows());
        statement.set_param_types(vec![Oid::INT4]);
        assert_eq!(statement.param_types, vec![Oid::INT4]);
    }
}
