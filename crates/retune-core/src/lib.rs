//! # retune-core
//!
//! Kernel-facing primitives for the Retune runtime.
//!
//! This crate provides:
//! - **Cgroup filesystem access**: the [`CgroupFs`](cgroup::CgroupFs) seam,
//!   a host implementation over the legacy (v1) hierarchy, and an in-memory
//!   emulation of the kernel's cross-file checks.
//! - **Value codecs** for the memory and CPU controllers, including the
//!   "unlimited" sentinels each file reports.
//! - **The cgroup writer**: single-value writes with errno classification.
//! - **Cgroup directory lifecycle** for containers.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
