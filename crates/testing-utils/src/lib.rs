//! # Distribution Testing Utils
//!
//! Shared testing utilities for the distribution workspace: hand-written
//! test doubles for the agent's collaborators, request builders and
//! async waiting helpers.
//!
//! ```toml
//! [dev-dependencies]
//! distribution-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
