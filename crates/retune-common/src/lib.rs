//! # retune-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the entire Retune workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate and provides the resource-limit vocabulary that the cgroup
//! writer, the config store, and the update orchestrator all speak.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
