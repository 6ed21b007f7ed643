//! # hierperms testkit
//!
//! Testing utilities for hierperms.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: An engine on a [`ManualClock`] plus a ready-made server hierarchy
//! - **Generators**: Proptest strategies for tokens, metadata and whole hierarchies
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use hierperms_testkit::generators::{snapshot_from_params, HierarchyParams};
//!
//! proptest! {
//!     #[test]
//!     fn loads_without_panicking(params: HierarchyParams) {
//!         let snapshot = snapshot_from_params(&params);
//!         hierperms_core::load_snapshot(&snapshot, 0);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! Quickly set up test scenarios:
//!
//! ```rust
//! use hierperms_testkit::fixtures::{user_id, TestFixture};
//!
//! let fixture = TestFixture::server();
//! fixture.join(user_id(1), "mod");
//! assert!(fixture.engine.has_permission(&user_id(1), &["kick", "build"]));
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{user_id, ManualClock, TestFixture, FIXTURE_EPOCH};
pub use generators::{snapshot_from_params, HierarchyParams};
