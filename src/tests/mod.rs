//! Test modules for the Kaula MCP client.
//!
//! This module contains crate-level testing infrastructure:
//! - Configuration loading and validation tests
//! - Error type and reporter tests
//! - Session tests driving a `Peer` against a scripted server
//! - Shared fixtures and proptest strategies

pub mod error_tests;

pub use test_utils::{jsonrpc_method_strategy, ScriptedServer, TestFixture};
