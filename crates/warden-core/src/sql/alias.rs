//! Table alias allocation.

use std::collections::HashMap;

/// Whether a join serves caller-facing reads or permission checks.
///
/// Read joins are restricted to rows the caller may see; system joins
/// evaluate permission filters and see every row. The same relation path
/// joined under both scopes gets two distinct aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AliasScope {
    Read,
    System,
}

/// Alias registry of one statement.
///
/// A join is identified by its scope, the alias it hangs off, and the
/// relational segment (`author`, or `item:headings` for any-to-one), so the
/// same path reached twice reuses its join.
#[derive(Debug, Default)]
pub struct AliasMap {
    joins: HashMap<(AliasScope, String, String), String>,
    next: usize,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alias of a join, and whether it was just allocated.
    pub fn join(&mut self, scope: AliasScope, parent: &str, segment: &str) -> (String, bool) {
        let key = (scope, parent.to_string(), segment.to_string());
        if let Some(alias) = self.joins.get(&key) {
            return (alias.clone(), false);
        }
        let alias = self.fresh("j");
        self.joins.insert(key, alias.clone());
        (alias, true)
    }

    /// A new alias that is never reused, for sub-selects.
    pub fn fresh(&mut self, prefix: &str) -> String {
        self.next += 1;
        format!("_{prefix}{}", self.next)
    }
}
