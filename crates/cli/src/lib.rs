//! Library interface for the doccontrol CLI
//!
//! This module exposes the command handlers for integration testing while
//! keeping argument parsing and process setup in main.rs.

pub mod commands;
pub mod keys;

// Re-export commonly needed types for tests
pub use anyhow::Result;
pub use doccontrol_core::config::Config;
