//! Shared test utilities for blogsync integration tests.
//!
//! This module provides:
//! - `TestHarness`, a context wired to an in-memory remote and scripted hosting
//! - Builders for blog configurations and deployments

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{wait_for_terminal, ScriptedHosting, TestHarness, BLOG_ID};
