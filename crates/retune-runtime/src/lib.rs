//! Live resource reconfiguration for the Retune runtime.
//!
//! An update flows through [`validate`] (resolve a partial request against
//! the committed limits), [`ordering`] (drive the cgroup writes in an order
//! the kernel accepts at every step), and [`store`] (commit the new version),
//! all under the per-container lock from [`lock`]. [`update`] owns that
//! pipeline; [`inspect`] only ever reads committed versions.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod engine;
pub mod exec;
pub mod inspect;
pub mod lock;
pub mod ordering;
pub mod state;
pub mod store;
pub mod update;
pub mod validate;
