//! Hearth State Registry Abstraction
//!
//! Provides a unified interface for looking up the current state of named
//! items and things, and for resolving group membership.
//!
//! # Key Components
//!
//! - **StateRegistry trait**: Core trait for state and membership lookups
//! - **MemberScope**: Filter for group-membership resolution
//! - **MemoryRegistry**: In-memory backend for tests and embedded use

pub mod memory_impl;

pub mod traits;

// Re-exports
pub use memory_impl::{MemoryRegistry, MemoryRegistryStats};
pub use traits::{MemberScope, StateRegistry};

/// Helper functions for common operations
pub mod helpers {
    use super::{MemoryRegistry, StateRegistry};
    use std::sync::Arc;

    /// Create an in-memory registry for unit testing
    ///
    /// This creates a MemoryRegistry that doesn't require any external
    /// services. Suitable for unit tests of engine components.
    pub fn create_test_registry() -> Arc<dyn StateRegistry> {
        Arc::new(MemoryRegistry::new())
    }

    /// Create a concrete MemoryRegistry for unit testing
    ///
    /// Use this when you need direct access to MemoryRegistry mutators
    /// (e.g., for seeding states and group structure in tests).
    pub fn create_test_memory_registry() -> Arc<MemoryRegistry> {
        Arc::new(MemoryRegistry::new())
    }
}
