use crate::Result;
use crate::tpl::ast::Template;
use crate::tpl::parser::parse_template;
use dashmap::DashMap;
use log::trace;
use std::sync::Arc;

/// Parsed templates keyed by their source text.
///
/// Entries are immutable once inserted and handed out as `Arc`s, so any
/// number of renders can walk the same AST concurrently. When the cache is
/// full it is emptied before the next insert.
pub(crate) struct TemplateCache {
    /// Source text to its parsed AST
    entries: DashMap<String, Arc<Template>>,
    /// Entry count that triggers a full clear; at least 1
    capacity: usize,
}

impl TemplateCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns the cached AST for `source`, parsing and storing it on a miss.
    /// Templates that fail to parse are never cached.
    pub fn get_or_parse(&self, source: &str) -> Result<Arc<Template>> {
        if let Some(cached) = self.entries.get(source) {
            trace!("Template cache hit: len={}", source.len());
            return Ok(cached.value().clone());
        }

        trace!("Template cache miss: len={}", source.len());
        let template = Arc::new(parse_template(source)?);
        if self.entries.len() >= self.capacity {
            self.entries.clear();
        }
        // Two threads may parse the same text at once; keep whichever landed first.
        let entry = self
            .entries
            .entry(source.to_string())
            .or_insert(template);
        Ok(entry.value().clone())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_source_shares_ast() {
        let cache = TemplateCache::new(8);
        let a = cache.get_or_parse("hello ${name}").unwrap();
        let b = cache.get_or_parse("hello ${name}").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_parse_errors_are_not_cached() {
        let cache = TemplateCache::new(8);
        assert!(cache.get_or_parse("${").is_err());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_capacity_bounds_entries() {
        let cache = TemplateCache::new(2);
        cache.get_or_parse("a").unwrap();
        cache.get_or_parse("b").unwrap();
        cache.get_or_parse("c").unwrap();
        assert!(cache.len() <= 2);

        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
