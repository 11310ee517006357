//! # Confsync Testing Utils
//!
//! Shared testing utilities for the confsync workspace.
//!
//! - **Builders**: fixture builders for every authoritative entity
//! - **Mocks**: an in-memory `ConfigRepository` and a fault-injecting cache wrapper
//! - **Containers**: PostgreSQL and Redis test containers
//! - **Helpers**: waiting on conditions and collecting change events
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! confsync-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod containers;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use containers::*;
pub use helpers::*;
pub use mocks::*;
