//! Trait definitions for the state-registry abstraction

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Scope filter for group-membership resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberScope {
    /// Every direct member, item or sub-group
    All,
    /// Direct members that are not themselves groups
    Items,
    /// Direct members that are themselves groups
    Groups,
}

/// Unified State Registry Trait
///
/// Provides the lookup interface the rule engine needs from the host
/// platform:
/// - Current state of a named item or thing
/// - Existence checks
/// - Group membership with scope filtering
///
/// Implementations:
/// - `MemoryRegistry`: In-memory backend for testing and embedded use
/// - A host-registry adapter in production deployments
#[async_trait]
pub trait StateRegistry: Send + Sync + 'static {
    /// Get the current state of a named target
    ///
    /// Returns `None` when the target is unknown or carries no state yet.
    async fn current_state(&self, name: &str) -> Result<Option<String>>;

    /// Check whether a named target is known to the registry
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Check whether `item` is a direct member of `group` under `scope`
    ///
    /// An unknown item or group answers `false`, never an error. A group is
    /// never a member of itself.
    async fn is_member(&self, item: &str, group: &str, scope: MemberScope) -> Result<bool>;
}
