//! In-memory state registry implementation
//!
//! Uses DashMap for lock-free concurrent access. Suitable for testing and
//! embedded scenarios where no host registry is available.

use crate::traits::{MemberScope, StateRegistry};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;

#[derive(Debug, Default, Clone)]
struct RegistryEntry {
    state: Option<String>,
    parents: HashSet<String>,
    is_group: bool,
}

/// In-memory state registry with concurrent access support
#[derive(Default)]
pub struct MemoryRegistry {
    entries: DashMap<String, RegistryEntry>,
}

impl MemoryRegistry {
    /// Create a new empty in-memory registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plain (non-group) item
    pub fn add_item(&self, name: &str) {
        self.entries.entry(name.to_string()).or_default();
    }

    /// Register a group-typed item
    pub fn add_group(&self, name: &str) {
        self.entries.entry(name.to_string()).or_default().is_group = true;
    }

    /// Set the current state of a target, creating it if unknown
    pub fn set_state(&self, name: &str, state: &str) {
        self.entries.entry(name.to_string()).or_default().state = Some(state.to_string());
    }

    /// Add `item` as a direct member of `group`
    ///
    /// Creates both entries if missing; the group entry is marked as a group.
    pub fn add_to_group(&self, item: &str, group: &str) {
        self.entries.entry(group.to_string()).or_default().is_group = true;
        self.entries
            .entry(item.to_string())
            .or_default()
            .parents
            .insert(group.to_string());
    }

    /// Remove a target, returning whether it existed
    pub fn remove(&self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Get statistics about stored data
    pub fn stats(&self) -> MemoryRegistryStats {
        let group_count = self.entries.iter().filter(|e| e.value().is_group).count();
        MemoryRegistryStats {
            entry_count: self.entries.len(),
            group_count,
        }
    }
}

/// Statistics about memory registry usage
#[derive(Debug, Clone)]
pub struct MemoryRegistryStats {
    pub entry_count: usize,
    pub group_count: usize,
}

#[async_trait]
impl StateRegistry for MemoryRegistry {
    async fn current_state(&self, name: &str) -> Result<Option<String>> {
        Ok(self.entries.get(name).and_then(|e| e.state.clone()))
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.entries.contains_key(name))
    }

    async fn is_member(&self, item: &str, group: &str, scope: MemberScope) -> Result<bool> {
        if item == group {
            return Ok(false);
        }
        let Some(entry) = self.entries.get(item) else {
            return Ok(false);
        };
        if !entry.parents.contains(group) {
            return Ok(false);
        }
        let member = match scope {
            MemberScope::All => true,
            MemberScope::Items => !entry.is_group,
            MemberScope::Groups => entry.is_group,
        };
        Ok(member)
    }
}
